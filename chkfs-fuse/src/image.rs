use std::io;
use std::mem;
use std::path::Path;

use chkfs::layout::{
    DirEntry, Inode, SuperBlock, DIRECT_COUNT, INDIRECT_COUNT, INODES_PER_BLOCK, INODE_SIZE,
    KIND_DIRECTORY, KIND_REGULAR,
};
use chkfs::{BLOCK_SIZE, ROOT_INUM, SUPERBLOCK_OFFSET};

/// 在内存中组装一个 chickadeefs 镜像。
///
/// 布局：0 号块（超级块） | inode 区域 | 数据区域。
/// 根目录（1 号 inode）随构造建立，登记名字时自动扩展其数据块。
/// 测试可以直接登记 inode 记录与索引块，构造空洞、稀疏的二级索引文件等。
pub struct ImageBuilder {
    image: Vec<u8>,
    nblocks: u32,
    ninodes: u32,
    inode_bn: u32,
    next_inum: u32,
    next_bn: u32,
    root_direct: [u32; DIRECT_COUNT],
    root_size: u32,
}

impl ImageBuilder {
    pub fn new(nblocks: u32, ninodes: u32) -> Self {
        assert!(ninodes >= 2, "need at least the root inode");
        let inode_bn = 1;
        let data_bn = inode_bn + ninodes.div_ceil(INODES_PER_BLOCK as u32);
        assert!(data_bn < nblocks);

        let mut builder = Self {
            image: vec![0; nblocks as usize * BLOCK_SIZE],
            nblocks,
            ninodes,
            inode_bn,
            next_inum: ROOT_INUM + 1,
            next_bn: data_bn,
            root_direct: [0; DIRECT_COUNT],
            root_size: 0,
        };

        let sb = SuperBlock::new(nblocks, ninodes, inode_bn, data_bn);
        builder.write_bytes(SUPERBLOCK_OFFSET, sb.as_bytes());
        builder.sync_root_inode();
        builder
    }

    /// 分配一个数据块并写入内容，返回块编号
    pub fn alloc_data(&mut self, content: &[u8]) -> u32 {
        assert!(content.len() <= BLOCK_SIZE);
        let bn = self.alloc_bn();
        self.write_bytes(bn as usize * BLOCK_SIZE, content);
        bn
    }

    /// 分配一个索引块，依次填入块编号
    pub fn alloc_indirect(&mut self, entries: &[u32]) -> u32 {
        assert!(entries.len() <= INDIRECT_COUNT);
        let bn = self.alloc_bn();
        for (i, entry) in entries.iter().enumerate() {
            self.write_bytes(
                bn as usize * BLOCK_SIZE + i * mem::size_of::<u32>(),
                &entry.to_ne_bytes(),
            );
        }
        bn
    }

    /// 登记一个 inode 记录，返回分配的编号
    pub fn add_inode(
        &mut self,
        kind: u32,
        size: u32,
        direct: [u32; DIRECT_COUNT],
        indirect: u32,
        indirect2: u32,
    ) -> u32 {
        let inum = self.next_inum;
        assert!(inum < self.ninodes, "inode table full");
        self.next_inum += 1;
        self.write_inode_record(inum, &Inode::new(kind, size, direct, indirect, indirect2));
        inum
    }

    /// 往 inode 记录的 `mlock` 字段写入任意字节，
    /// 模拟磁盘上的陈旧值
    pub fn scribble_mlock(&mut self, inum: u32, value: u32) {
        let offset = self.inode_offset(inum) + mem::offset_of!(Inode, mlock);
        self.write_bytes(offset, &value.to_ne_bytes());
    }

    /// 在根目录登记一个名字
    pub fn add_root_entry(&mut self, name: &str, inum: u32) {
        let slot = self.root_size as usize / DirEntry::SIZE;
        let bi = slot * DirEntry::SIZE / BLOCK_SIZE;
        assert!(bi < DIRECT_COUNT, "root directory full");
        if self.root_direct[bi] == 0 {
            self.root_direct[bi] = self.alloc_data(&[]);
        }

        let entry = DirEntry::new(name, inum);
        let offset =
            self.root_direct[bi] as usize * BLOCK_SIZE + slot * DirEntry::SIZE % BLOCK_SIZE;
        self.write_bytes(offset, entry.as_bytes());

        self.root_size += DirEntry::SIZE as u32;
        self.sync_root_inode();
    }

    /// 打包一个普通文件：分配数据块与所需索引块，并登记到根目录
    pub fn add_file(&mut self, name: &str, data: &[u8]) -> u32 {
        let mut direct = [0; DIRECT_COUNT];
        let mut spill = Vec::new();
        for (i, chunk) in data.chunks(BLOCK_SIZE).enumerate() {
            let bn = self.alloc_data(chunk);
            if i < DIRECT_COUNT {
                direct[i] = bn;
            } else {
                spill.push(bn);
            }
        }
        assert!(spill.len() <= INDIRECT_COUNT, "file too large for the packer");
        let indirect = if spill.is_empty() {
            0
        } else {
            self.alloc_indirect(&spill)
        };

        let inum = self.add_inode(KIND_REGULAR, data.len() as u32, direct, indirect, 0);
        self.add_root_entry(name, inum);
        inum
    }

    pub fn build(self) -> Vec<u8> {
        self.image
    }

    pub fn write_to(&self, path: impl AsRef<Path>) -> io::Result<()> {
        std::fs::write(path, &self.image)
    }
}

impl ImageBuilder {
    fn write_bytes(&mut self, offset: usize, bytes: &[u8]) {
        self.image[offset..offset + bytes.len()].copy_from_slice(bytes);
    }

    fn alloc_bn(&mut self) -> u32 {
        assert!(self.next_bn < self.nblocks, "image full");
        let bn = self.next_bn;
        self.next_bn += 1;
        bn
    }

    fn inode_offset(&self, inum: u32) -> usize {
        assert!(inum > 0 && inum < self.ninodes);
        (self.inode_bn + inum / INODES_PER_BLOCK as u32) as usize * BLOCK_SIZE
            + inum as usize % INODES_PER_BLOCK * INODE_SIZE
    }

    fn write_inode_record(&mut self, inum: u32, ino: &Inode) {
        let offset = self.inode_offset(inum);
        self.write_bytes(offset, ino.as_bytes());
    }

    fn sync_root_inode(&mut self) {
        let root = Inode::new(KIND_DIRECTORY, self.root_size, self.root_direct, 0, 0);
        self.write_inode_record(ROOT_INUM, &root);
    }
}
