//! 间接索引块
//! - 一级：整个块连续存储**块编号**，每个编号都指向一个**数据块**
//! - 二级：整个块连续存储**块编号**，每个编号都指向一个一级索引块
//!
//! 编号为 0 的块是**空洞**：不占磁盘空间，读到即止。
//!
//! ## 块索引编码
//!
//! 剔去低级容量后，索引除以一级块的可编号数量得外层位置，
//! 取模得内层位置。
//!
//! ## 内存态字段
//!
//! `mlock`/`mref` 只在内存中有意义，装载 inode 块时由清理回调清零；
//! `mlock` 是读写锁字：0 空闲，正数为读者计数，全 1 为写者独占。

use core::hint::spin_loop;
use core::sync::atomic::{AtomicU32, Ordering};
use core::{mem, ptr, slice};

use crate::sched::Scheduler;
use crate::BLOCK_SIZE;

/// 间接索引块的编号容量
pub const INDIRECT_COUNT: usize = BLOCK_SIZE / mem::size_of::<u32>();
/// 间接索引块
pub type IndirectBlock = [u32; INDIRECT_COUNT];

/// 直接索引块可编号数量
pub const DIRECT_COUNT: usize = 9;
/// 直接索引时的编号容量
const DIRECT_CAP: usize = DIRECT_COUNT;
/// 用上一级索引时的编号容量
pub const INDIRECT1_CAP: usize = DIRECT_CAP + INDIRECT_COUNT;
/// 用上二级索引时的编号容量
pub const INDIRECT2_CAP: usize = INDIRECT1_CAP + INDIRECT_COUNT * INDIRECT_COUNT;

/// inode 记录大小
pub const INODE_SIZE: usize = 64;
/// 每块 inode 数
pub const INODES_PER_BLOCK: usize = BLOCK_SIZE / INODE_SIZE;

/// 普通文件
pub const KIND_REGULAR: u32 = 1;
/// 目录
pub const KIND_DIRECTORY: u32 = 2;

/// 写者独占时的锁字值
const WRITE_LOCKED: u32 = u32::MAX;

/// 逻辑块索引在三级映射中的位置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockIndex {
    /// `direct` 数组的下标
    Direct(usize),
    /// 一级索引块内的下标
    Indirect(usize),
    /// 二级索引块的外层、内层下标
    Indirect2 { outer: usize, inner: usize },
    OutOfRange,
}

impl BlockIndex {
    pub fn classify(bi: usize) -> Self {
        if bi < DIRECT_CAP {
            Self::Direct(bi)
        } else if bi < INDIRECT1_CAP {
            Self::Indirect(bi - DIRECT_CAP)
        } else if bi < INDIRECT2_CAP {
            let index = bi - INDIRECT1_CAP;
            Self::Indirect2 {
                outer: index / INDIRECT_COUNT,
                inner: index % INDIRECT_COUNT,
            }
        } else {
            Self::OutOfRange
        }
    }
}

/// 在常驻缓存页内就地解释的 inode 记录
#[repr(C)]
pub struct Inode {
    /// 类型
    pub kind: u32,
    // 不用usize是为了严控布局
    pub size: u32,
    /// 硬链接个数
    pub nlink: u32,
    /// 内存态读写锁字
    pub mlock: AtomicU32,
    /// 内存态引用字段，本核心只负责清零
    pub mref: AtomicU32,
    /// 直接索引块，包含 DIRECT_COUNT 个块编号
    pub direct: [u32; DIRECT_COUNT],
    /// 指向一个一级索引块
    pub indirect: u32,
    /// 指向一个二级索引块
    pub indirect2: u32,
}

impl Inode {
    pub fn new(
        kind: u32,
        size: u32,
        direct: [u32; DIRECT_COUNT],
        indirect: u32,
        indirect2: u32,
    ) -> Self {
        Self {
            kind,
            size,
            nlink: 1,
            mlock: AtomicU32::new(0),
            mref: AtomicU32::new(0),
            direct,
            indirect,
            indirect2,
        }
    }

    #[inline]
    pub fn is_dir(&self) -> bool {
        self.kind == KIND_DIRECTORY
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        unsafe { slice::from_raw_parts(ptr::from_ref(self).cast(), INODE_SIZE) }
    }
}

/// 读写锁操作。
/// 调用者必须持有本 inode 所在块的缓存引用，且解锁前不得释放：
/// 锁字随页驻留，页被回收后锁字也就不存在了。
impl Inode {
    pub(crate) fn lock_read(&self, sched: &dyn Scheduler) {
        let mut v = self.mlock.load(Ordering::Relaxed);
        loop {
            if v == WRITE_LOCKED {
                // 写者独占中，让出重试
                sched.yield_now();
                v = self.mlock.load(Ordering::Relaxed);
            } else {
                match self
                    .mlock
                    .compare_exchange_weak(v, v + 1, Ordering::Acquire, Ordering::Relaxed)
                {
                    Ok(_) => return,
                    Err(current) => {
                        v = current;
                        spin_loop();
                    }
                }
            }
        }
    }

    pub(crate) fn unlock_read(&self) {
        let mut v = self.mlock.load(Ordering::Relaxed);
        assert!(v != 0 && v != WRITE_LOCKED, "unlock_read of an unheld inode lock");
        while let Err(current) =
            self.mlock
                .compare_exchange_weak(v, v - 1, Ordering::Release, Ordering::Relaxed)
        {
            v = current;
            spin_loop();
        }
    }

    pub(crate) fn lock_write(&self, sched: &dyn Scheduler) {
        while self
            .mlock
            .compare_exchange_weak(0, WRITE_LOCKED, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            sched.yield_now();
        }
    }

    pub(crate) fn unlock_write(&self) {
        assert_eq!(
            self.mlock.load(Ordering::Relaxed),
            WRITE_LOCKED,
            "unlock_write of an unheld inode lock"
        );
        self.mlock.store(0, Ordering::Release);
    }
}
