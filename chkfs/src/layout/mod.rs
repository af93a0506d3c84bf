//! # 磁盘数据结构层
//!
//! chickadeefs 的磁盘布局：
//! 0 号块（内含超级块） | inode 区域 | 数据块区域
//!
//! 所有结构都按磁盘字节序在缓存页内**就地**解释，
//! 布局常量是格式的一部分，不可改动。

mod super_block;
pub use super_block::SuperBlock;

mod inode;
pub use inode::{
    BlockIndex, Inode, IndirectBlock, DIRECT_COUNT, INDIRECT1_CAP, INDIRECT2_CAP, INDIRECT_COUNT,
    INODES_PER_BLOCK, INODE_SIZE, KIND_DIRECTORY, KIND_REGULAR,
};

/// 目录项，也属于磁盘文件系统数据结构
mod dir_entry;
pub use dir_entry::{DirEntry, NAME_MAX_LEN};
