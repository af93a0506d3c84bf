use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};
use std::thread;
use std::time::Duration;

use chkfs::{BlockDevice, WaitQueue, BLOCK_SIZE};

/// 以内存为介质的块设备驱动，测试用
pub struct MemDisk {
    data: Mutex<Vec<u8>>,
    wait_queue: WaitQueue,
}

impl MemDisk {
    pub fn new(mut image: Vec<u8>) -> Self {
        // 补齐到块边界
        let len = image.len().div_ceil(BLOCK_SIZE) * BLOCK_SIZE;
        image.resize(len, 0);
        Self {
            data: Mutex::new(image),
            wait_queue: WaitQueue::new(),
        }
    }
}

impl BlockDevice for MemDisk {
    fn read_block(&self, bn: u32, buf: &mut [u8]) {
        let data = self.data.lock().unwrap();
        let start = bn as usize * BLOCK_SIZE;
        buf.copy_from_slice(&data[start..start + BLOCK_SIZE]);
    }

    fn wait_queue(&self) -> &WaitQueue {
        &self.wait_queue
    }
}

type ReadProbe = Box<dyn Fn(u32) + Send + Sync>;

/// 包装任意驱动，统计每块的读取次数；
/// 可注入每次读取前的探针与人为延迟，放大并发窗口
pub struct CountingDevice<D> {
    inner: D,
    reads: Mutex<HashMap<u32, usize>>,
    delay: Option<Duration>,
    probe: OnceLock<ReadProbe>,
}

impl<D> CountingDevice<D> {
    pub fn new(inner: D) -> Self {
        Self {
            inner,
            reads: Mutex::new(HashMap::new()),
            delay: None,
            probe: OnceLock::new(),
        }
    }

    pub fn with_delay(inner: D, delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::new(inner)
        }
    }

    /// 注入探针，每次设备读取前调用；只能设置一次
    pub fn set_probe(&self, probe: impl Fn(u32) + Send + Sync + 'static) {
        if self.probe.set(Box::new(probe)).is_err() {
            panic!("probe already set");
        }
    }

    /// 某一块被设备读取的次数
    pub fn reads_of(&self, bn: u32) -> usize {
        self.reads.lock().unwrap().get(&bn).copied().unwrap_or(0)
    }

    pub fn total_reads(&self) -> usize {
        self.reads.lock().unwrap().values().sum()
    }
}

impl<D: BlockDevice> BlockDevice for CountingDevice<D> {
    fn read_block(&self, bn: u32, buf: &mut [u8]) {
        *self.reads.lock().unwrap().entry(bn).or_insert(0) += 1;
        if let Some(probe) = self.probe.get() {
            probe(bn);
        }
        if let Some(delay) = self.delay {
            thread::sleep(delay);
        }
        self.inner.read_block(bn, buf);
    }

    fn wait_queue(&self) -> &WaitQueue {
        self.inner.wait_queue()
    }
}
