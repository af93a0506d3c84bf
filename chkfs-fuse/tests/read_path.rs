//! 端到端读取：根目录查找加各级索引下的数据拷贝

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chkfs::layout::{DIRECT_COUNT, INDIRECT_COUNT, KIND_REGULAR};
use chkfs::BLOCK_SIZE;
use chkfs_fuse::ImageBuilder;

use common::fresh;

fn hello_image() -> Vec<u8> {
    let mut builder = ImageBuilder::new(64, 64);
    builder.add_file("hello", b"hello world");
    builder.build()
}

#[test]
fn small_file() {
    let (_device, _cache, fs) = fresh(hello_image());
    let mut buf = [0; 64];
    assert_eq!(fs.read_root_file("hello", &mut buf, 0), 11);
    assert_eq!(&buf[..11], b"hello world");
}

#[test]
fn offset_within_one_block() {
    let (_device, _cache, fs) = fresh(hello_image());
    let mut buf = [0; 4];
    assert_eq!(fs.read_root_file("hello", &mut buf, 6), 4);
    assert_eq!(&buf, b"worl");
}

#[test]
fn read_spanning_two_blocks() {
    let mut data = vec![b'a'; BLOCK_SIZE];
    data.extend_from_slice(b"bbbbb");
    let mut builder = ImageBuilder::new(64, 64);
    builder.add_file("two", &data);
    let (_device, _cache, fs) = fresh(builder.build());

    let mut buf = vec![0; BLOCK_SIZE + 64];
    assert_eq!(fs.read_root_file("two", &mut buf, 0), BLOCK_SIZE + 5);
    assert_eq!(&buf[..BLOCK_SIZE], &data[..BLOCK_SIZE]);
    assert_eq!(&buf[BLOCK_SIZE..BLOCK_SIZE + 5], b"bbbbb");
}

/// 末块只返回 size 余数那么多字节
#[test]
fn last_block_truncated_to_size() {
    let mut data = vec![b'a'; BLOCK_SIZE];
    data.extend_from_slice(b"bbbbb");
    let mut builder = ImageBuilder::new(64, 64);
    builder.add_file("two", &data);
    let (_device, _cache, fs) = fresh(builder.build());

    let mut buf = [0; 64];
    assert_eq!(fs.read_root_file("two", &mut buf, BLOCK_SIZE), 5);
    assert_eq!(&buf[..5], b"bbbbb");
}

#[test]
fn size_on_block_boundary() {
    let data = vec![b'c'; BLOCK_SIZE];
    let mut builder = ImageBuilder::new(64, 64);
    builder.add_file("full", &data);
    let (_device, _cache, fs) = fresh(builder.build());

    let mut buf = vec![0; 2 * BLOCK_SIZE];
    assert_eq!(fs.read_root_file("full", &mut buf, 0), BLOCK_SIZE);
}

#[test]
fn hole_terminates_read() {
    let mut builder = ImageBuilder::new(64, 64);
    let inum = builder.add_inode(KIND_REGULAR, BLOCK_SIZE as u32, [0; DIRECT_COUNT], 0, 0);
    builder.add_root_entry("holey", inum);
    let (_device, _cache, fs) = fresh(builder.build());

    let mut buf = [0; 64];
    assert_eq!(fs.read_root_file("holey", &mut buf, 0), 0);
}

/// 空洞之后还有数据也读不到：返回的恰是空洞之前的字节
#[test]
fn hole_mid_file() {
    let mut builder = ImageBuilder::new(64, 64);
    let bn = builder.alloc_data(&[b'z'; BLOCK_SIZE]);
    let mut direct = [0; DIRECT_COUNT];
    direct[1] = bn;
    let inum = builder.add_inode(KIND_REGULAR, 2 * BLOCK_SIZE as u32, direct, 0, 0);
    builder.add_root_entry("gap", inum);
    let (_device, _cache, fs) = fresh(builder.build());

    let mut buf = vec![0; 2 * BLOCK_SIZE];
    assert_eq!(fs.read_root_file("gap", &mut buf, 0), 0);
    // 从第二块起读则一切正常
    assert_eq!(fs.read_root_file("gap", &mut buf, BLOCK_SIZE), BLOCK_SIZE);
    assert_eq!(buf[0], b'z');
}

#[test]
fn missing_name_leaves_cache_idle() {
    let (_device, cache, fs) = fresh(hello_image());
    let mut buf = [0; 64];
    assert_eq!(fs.read_root_file("nope", &mut buf, 0), 0);
    assert_eq!(cache.pinned_slots(), 0);
}

#[test]
fn read_past_eof() {
    let (_device, _cache, fs) = fresh(hello_image());
    let mut buf = [0; 64];
    assert_eq!(fs.read_root_file("hello", &mut buf, 4096), 0);
    assert_eq!(fs.read_root_file("hello", &mut buf, 11), 0);
}

#[test]
fn single_indirect() {
    let mut data = vec![b'x'; DIRECT_COUNT * BLOCK_SIZE];
    data.extend_from_slice(b"IND");
    let mut builder = ImageBuilder::new(64, 64);
    builder.add_file("far", &data);
    let (_device, _cache, fs) = fresh(builder.build());

    let mut buf = [0; 16];
    assert_eq!(fs.read_root_file("far", &mut buf, DIRECT_COUNT * BLOCK_SIZE), 3);
    assert_eq!(&buf[..3], b"IND");
}

/// 翻译期间索引块引用在取数据块前放掉：
/// 任意时刻钉住的槽不超过 inode 块 + 一个翻译/数据块
#[test]
fn translation_releases_indirect_before_data() {
    let mut data = vec![b'x'; DIRECT_COUNT * BLOCK_SIZE];
    data.extend_from_slice(b"IND");
    let mut builder = ImageBuilder::new(64, 64);
    builder.add_file("far", &data);
    let (device, cache, fs) = fresh(builder.build());

    let peak = Arc::new(AtomicUsize::new(0));
    {
        let cache = Arc::downgrade(&cache);
        let peak = peak.clone();
        device.set_probe(move |_| {
            if let Some(cache) = cache.upgrade() {
                peak.fetch_max(cache.pinned_slots(), Ordering::Relaxed);
            }
        });
    }

    let mut buf = [0; 16];
    assert_eq!(fs.read_root_file("far", &mut buf, DIRECT_COUNT * BLOCK_SIZE), 3);
    assert!(peak.load(Ordering::Relaxed) <= 2);
}

#[test]
fn double_indirect() {
    let mut builder = ImageBuilder::new(64, 64);
    let marker = builder.alloc_data(b"DBL!");
    let inner = builder.alloc_indirect(&[marker]);
    let outer = builder.alloc_indirect(&[inner]);
    let off = (DIRECT_COUNT + INDIRECT_COUNT) * BLOCK_SIZE;
    let inum = builder.add_inode(KIND_REGULAR, (off + 4) as u32, [0; DIRECT_COUNT], 0, outer);
    builder.add_root_entry("deep", inum);
    let (device, cache, fs) = fresh(builder.build());

    let peak = Arc::new(AtomicUsize::new(0));
    {
        let cache = Arc::downgrade(&cache);
        let peak = peak.clone();
        device.set_probe(move |_| {
            if let Some(cache) = cache.upgrade() {
                peak.fetch_max(cache.pinned_slots(), Ordering::Relaxed);
            }
        });
    }

    let mut buf = [0; 16];
    assert_eq!(fs.read_root_file("deep", &mut buf, off), 4);
    assert_eq!(&buf[..4], b"DBL!");
    // inode 块 + 至多两个翻译块
    assert!(peak.load(Ordering::Relaxed) <= 3);
    assert_eq!(cache.pinned_slots(), 0);
}
