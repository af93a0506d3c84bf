use core::{ptr, slice};

/// 文件名上限；最后一字节留给 \0
pub const NAME_MAX_LEN: usize = 123;

/// 目录项：目录的数据块就是它的紧凑数组
#[derive(Debug, Clone)]
#[repr(C)]
pub struct DirEntry {
    /// 0 代表空槽位
    inum: u32,
    name: [u8; NAME_MAX_LEN + 1],
}

impl DirEntry {
    /// 目录项大小恒为128字节
    pub const SIZE: usize = 128;

    pub fn new(name: &str, inum: u32) -> Self {
        let bytes = name.as_bytes();
        assert!(bytes.len() <= NAME_MAX_LEN, "file name too long");
        let mut buf = [0; NAME_MAX_LEN + 1];
        buf[..bytes.len()].copy_from_slice(bytes);

        Self { inum, name: buf }
    }

    #[inline]
    pub fn inum(&self) -> u32 {
        self.inum
    }

    /// 名字字段里 \0 之前的字节
    pub fn name(&self) -> &[u8] {
        let len = self
            .name
            .iter()
            .position(|&c| c == 0)
            .unwrap_or(self.name.len());
        &self.name[..len]
    }

    /// C 字符串等值比较，截断到字段长度
    #[inline]
    pub fn name_matches(&self, name: &str) -> bool {
        self.name() == name.as_bytes()
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        unsafe { slice::from_raw_parts(ptr::from_ref(self).cast(), Self::SIZE) }
    }
}
