//! # 文件系统状态层
//!
//! 建立在块缓存之上的只读语义：
//! 每次 inode 获取都从 0 号块引导超级块几何，再钉住对应的 inode 块，
//! 就地解释其中的记录；数据访问经直接/一级/二级索引翻译成块编号，
//! 逐块取缓存引用完成拷贝。
//!
//! 引用与锁都用守卫表达：inode 引用存续期间所在块保持钉住，
//! inode 锁守卫又借用 inode 引用，因此"持锁必持块引用"由借用检查保证。

use alloc::sync::Arc;
use core::ops::Deref;

use crate::block_cache::{BlockRef, BufCache};
use crate::layout::{
    BlockIndex, DirEntry, Inode, IndirectBlock, SuperBlock, INODES_PER_BLOCK, INODE_SIZE,
};
use crate::{BLOCK_SIZE, ROOT_INUM, SUPERBLOCK_OFFSET};

/// 装载 inode 块时清零每条记录的内存态字段，
/// 否则锁操作会读到磁盘上的陈旧字节
fn clean_inode_block(buf: &mut [u8]) {
    debug_assert_eq!(buf.len(), BLOCK_SIZE);
    for i in 0..INODES_PER_BLOCK {
        let ino = unsafe { &mut *buf.as_mut_ptr().add(i * INODE_SIZE).cast::<Inode>() };
        *ino.mlock.get_mut() = 0;
        *ino.mref.get_mut() = 0;
    }
}

pub struct ChickadeeFs {
    cache: Arc<BufCache>,
}

impl ChickadeeFs {
    pub fn new(cache: Arc<BufCache>) -> Self {
        Self { cache }
    }

    #[inline]
    pub fn cache(&self) -> &BufCache {
        &self.cache
    }

    /// 取得编号为 `inum` 的 inode 引用；编号非法或缓存无空间时返回 `None`
    pub fn get_inode(&self, inum: u32) -> Option<InodeRef<'_>> {
        // 超级块引导：只取几何信息，随手放掉 0 号块
        let (inode_bn, ninodes) = {
            let sb_block = self.cache.get(0, None)?;
            sb_block.map(SUPERBLOCK_OFFSET, |sb: &SuperBlock| {
                debug_assert!(sb.is_valid());
                (sb.inode_bn, sb.ninodes)
            })
        };

        if inum == 0 || inum >= ninodes {
            return None;
        }

        let bn = inode_bn + inum / INODES_PER_BLOCK as u32;
        let block = self.cache.get(bn, Some(clean_inode_block))?;
        Some(InodeRef {
            block,
            offset: inum as usize % INODES_PER_BLOCK * INODE_SIZE,
        })
    }

    /// 取得文件 `off` 字节偏移处的数据块引用及其有效字节数。
    /// `off` 必须按块对齐；越过文件尾或落在空洞上返回 `None`。
    ///
    /// 翻译期间的索引块引用在取数据块之前全部放掉，
    /// 调用中同时持有的翻译引用不超过两个。
    pub fn get_data_page<'a>(
        &'a self,
        ino: &InodeReadGuard<'_>,
        off: usize,
    ) -> Option<(BlockRef<'a>, usize)> {
        assert_eq!(off % BLOCK_SIZE, 0);

        if off >= ino.size as usize {
            return None;
        }

        let databn = match BlockIndex::classify(off / BLOCK_SIZE) {
            BlockIndex::Direct(i) => ino.direct[i],
            BlockIndex::Indirect(i) => {
                if ino.indirect == 0 {
                    return None;
                }
                let indirect = self.cache.get(ino.indirect, None)?;
                indirect.map(0, |entries: &IndirectBlock| entries[i])
            }
            BlockIndex::Indirect2 { outer, inner } => {
                if ino.indirect2 == 0 {
                    return None;
                }
                let indirect2 = self.cache.get(ino.indirect2, None)?;
                let mid = indirect2.map(0, |entries: &IndirectBlock| entries[outer]);
                if mid == 0 {
                    return None;
                }
                let indirect = self.cache.get(mid, None)?;
                let bn = indirect.map(0, |entries: &IndirectBlock| entries[inner]);
                drop(indirect);
                drop(indirect2);
                bn
            }
            BlockIndex::OutOfRange => return None,
        };

        // 编号 0 是空洞
        if databn == 0 {
            return None;
        }

        let data = self.cache.get(databn, None)?;
        let valid = BLOCK_SIZE.min(ino.size as usize - off);
        Some((data, valid))
    }

    /// 在目录下查找名字，返回对应的 inode 编号；0 代表不存在
    pub fn lookup(&self, dir: &InodeReadGuard<'_>, name: &str) -> u32 {
        assert!(dir.is_dir());

        let mut diroff = 0;
        loop {
            // 空洞或目录尾都视作查找结束
            let Some((page, bsz)) = self.get_data_page(dir, diroff) else {
                return 0;
            };

            let mut i = 0;
            while i * DirEntry::SIZE < bsz {
                let entry: &DirEntry = page.view(i * DirEntry::SIZE);
                if entry.inum() != 0 && entry.name_matches(name) {
                    return entry.inum();
                }
                i += 1;
            }

            diroff += BLOCK_SIZE;
        }
    }

    /// 从根目录下名为 `name` 的文件中，自偏移 `off` 起读入 `buf`，
    /// 返回实际读取的字节数
    pub fn read_root_file(&self, name: &str, buf: &mut [u8], off: usize) -> usize {
        // 先查根目录拿到文件的 inode 编号
        let Some(root) = self.get_inode(ROOT_INUM) else {
            return 0;
        };
        let inum = {
            let root = root.lock_read();
            self.lookup(&root, name)
        };
        drop(root);

        let Some(ino) = self.get_inode(inum) else {
            return 0;
        };
        let ino_guard = ino.lock_read();

        let mut nread = 0;
        let mut off = off;
        let mut remaining = buf.len();
        while remaining > 0 {
            let mut ncopy = 0;

            let blockoff = off - off % BLOCK_SIZE;
            if let Some((data, bsz)) = self.get_data_page(&ino_guard, blockoff) {
                let boff = off - blockoff;
                if bsz > boff {
                    ncopy = (bsz - boff).min(remaining);
                    buf[nread..nread + ncopy].copy_from_slice(&data[boff..boff + ncopy]);
                }
            }

            if ncopy == 0 {
                break;
            }
            nread += ncopy;
            off += ncopy;
            remaining -= ncopy;
        }

        nread
    }
}

/// inode 的缓存引用：就地指向常驻页内的记录，
/// 存续期间所在块保持钉住。释放即 [`Drop`]。
pub struct InodeRef<'a> {
    block: BlockRef<'a>,
    offset: usize,
}

impl InodeRef<'_> {
    fn inode(&self) -> &Inode {
        self.block.view(self.offset)
    }

    /// 取读锁；写者独占时让出重试
    pub fn lock_read(&self) -> InodeReadGuard<'_> {
        self.inode().lock_read(self.block.cache().scheduler());
        InodeReadGuard { ino: self }
    }

    /// 取写锁
    pub fn lock_write(&self) -> InodeWriteGuard<'_> {
        self.inode().lock_write(self.block.cache().scheduler());
        InodeWriteGuard { ino: self }
    }
}

impl Deref for InodeRef<'_> {
    type Target = Inode;

    fn deref(&self) -> &Inode {
        self.inode()
    }
}

/// inode 读锁守卫，释放即解锁。
/// 借用着 [`InodeRef`]，锁存续期间所在块必然钉住。
pub struct InodeReadGuard<'a> {
    ino: &'a InodeRef<'a>,
}

impl Deref for InodeReadGuard<'_> {
    type Target = Inode;

    fn deref(&self) -> &Inode {
        self.ino.inode()
    }
}

impl Drop for InodeReadGuard<'_> {
    fn drop(&mut self) {
        self.ino.inode().unlock_read();
    }
}

/// inode 写锁守卫，释放即解锁
pub struct InodeWriteGuard<'a> {
    ino: &'a InodeRef<'a>,
}

impl Deref for InodeWriteGuard<'_> {
    type Target = Inode;

    fn deref(&self) -> &Inode {
        self.ino.inode()
    }
}

impl Drop for InodeWriteGuard<'_> {
    fn drop(&mut self) {
        self.ino.inode().unlock_write();
    }
}
