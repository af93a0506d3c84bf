#![allow(dead_code)]

use std::sync::Arc;

use chkfs::{BufCache, ChickadeeFs, GlobalPageAllocator};
use chkfs_fuse::{CountingDevice, MemDisk, ThreadScheduler};

pub type TestDevice = CountingDevice<MemDisk>;

/// 新建一整套：计数设备、缓存、文件系统状态
pub fn fresh(image: Vec<u8>) -> (Arc<TestDevice>, Arc<BufCache>, ChickadeeFs) {
    fresh_with(CountingDevice::new(MemDisk::new(image)))
}

pub fn fresh_with(device: TestDevice) -> (Arc<TestDevice>, Arc<BufCache>, ChickadeeFs) {
    let device = Arc::new(device);
    let cache = Arc::new(BufCache::new(
        device.clone(),
        Arc::new(ThreadScheduler),
        Arc::new(GlobalPageAllocator),
    ));
    let fs = ChickadeeFs::new(cache.clone());
    (device, cache, fs)
}
