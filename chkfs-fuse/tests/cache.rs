//! 缓存不变量：槽唯一、单次装载、满表失败、清零即回收

mod common;

use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, Mutex};
use std::thread;
use std::time::Duration;

use chkfs::{BufCache, GlobalPageAllocator, PageAllocator, BLOCK_SIZE};
use chkfs_fuse::{CountingDevice, MemDisk, ThreadScheduler};

use common::fresh_with;

/// 每一块填上自己的块编号，方便校验内容
fn numbered_image(nblocks: usize) -> Vec<u8> {
    let mut image = vec![0; nblocks * BLOCK_SIZE];
    for bn in 0..nblocks {
        image[bn * BLOCK_SIZE..(bn + 1) * BLOCK_SIZE].fill(bn as u8);
    }
    image
}

#[test]
fn same_block_shares_slot() {
    let (device, cache, _fs) = fresh_with(CountingDevice::new(MemDisk::new(numbered_image(16))));

    let first = cache.get(5, None).unwrap();
    let second = cache.get(5, None).unwrap();
    assert_eq!(first.as_ptr(), second.as_ptr());
    assert_eq!(cache.pinned_slots(), 1);
    assert_eq!(device.reads_of(5), 1);
    assert!(first.iter().all(|&b| b == 5));
}

#[test]
fn matched_get_put_leaves_slots_clear() {
    let (device, cache, _fs) = fresh_with(CountingDevice::new(MemDisk::new(numbered_image(16))));

    let refs: Vec<_> = (0..3).map(|bn| cache.get(bn, None).unwrap()).collect();
    assert_eq!(cache.pinned_slots(), 3);
    drop(refs);
    assert_eq!(cache.pinned_slots(), 0);

    // 引用清零即回收：再取会重新读盘
    let _again = cache.get(1, None).unwrap();
    assert_eq!(device.reads_of(1), 2);
    assert_eq!(device.total_reads(), 4);
}

#[test]
fn cache_full_then_release() {
    let (_device, cache, _fs) = fresh_with(CountingDevice::new(MemDisk::new(numbered_image(16))));

    let mut refs: Vec<_> = (0..BufCache::CAPACITY)
        .map(|bn| cache.get(bn as u32, None).unwrap())
        .collect();
    assert!(cache.get(BufCache::CAPACITY as u32, None).is_none());

    refs.pop();
    let block = cache.get(BufCache::CAPACITY as u32, None).unwrap();
    assert_eq!(block[0], BufCache::CAPACITY as u8);
}

/// 配额耗尽的页分配器
struct QuotaAllocator {
    remaining: AtomicUsize,
    inner: GlobalPageAllocator,
}

impl PageAllocator for QuotaAllocator {
    fn alloc(&self) -> Option<NonNull<u8>> {
        self.remaining
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1))
            .ok()?;
        self.inner.alloc()
    }

    unsafe fn free(&self, page: NonNull<u8>) {
        self.inner.free(page);
    }
}

#[test]
fn alloc_failure_rolls_back_claim() {
    let device = Arc::new(CountingDevice::new(MemDisk::new(numbered_image(16))));
    let cache = BufCache::new(
        device,
        Arc::new(ThreadScheduler),
        Arc::new(QuotaAllocator {
            remaining: AtomicUsize::new(1),
            inner: GlobalPageAllocator,
        }),
    );

    let block = cache.get(3, None).unwrap();
    assert!(cache.get(4, None).is_none());
    assert_eq!(cache.pinned_slots(), 1);
    drop(block);
    assert_eq!(cache.pinned_slots(), 0);
}

/// 同一块的并发未命中：设备只读一次，全部拿到同一页
#[test]
fn concurrent_duplicate_miss() {
    const TASKS: usize = 8;

    let device = Arc::new(CountingDevice::with_delay(
        MemDisk::new(numbered_image(16)),
        Duration::from_millis(30),
    ));
    let cache = BufCache::new(
        device.clone(),
        Arc::new(ThreadScheduler),
        Arc::new(GlobalPageAllocator),
    );

    let start = Barrier::new(TASKS);
    let hold = Barrier::new(TASKS);
    let ptrs = Mutex::new(Vec::new());
    thread::scope(|s| {
        for _ in 0..TASKS {
            s.spawn(|| {
                start.wait();
                let block = cache.get(7, None).expect("cache has room");
                assert!(block.iter().all(|&b| b == 7));
                ptrs.lock().unwrap().push(block.as_ptr() as usize);
                // 全员到齐前都别放引用，免得槽被回收又重读
                hold.wait();
            });
        }
    });

    let ptrs = ptrs.into_inner().unwrap();
    assert_eq!(ptrs.len(), TASKS);
    assert!(ptrs.windows(2).all(|pair| pair[0] == pair[1]));
    assert_eq!(device.reads_of(7), 1);
    assert_eq!(cache.pinned_slots(), 0);
}
