//! chickadeefs 的宿主机一侧：
//! 块设备驱动（文件、内存）、线程调度器、镜像构造器。
//! 内核里由驱动与任务管理器承担的接口，在这里全部用 std 实现，
//! 集成测试与打包工具共用。

mod image;
pub use image::ImageBuilder;

mod mem_disk;
pub use mem_disk::{CountingDevice, MemDisk};

mod sched;
pub use sched::ThreadScheduler;

use std::fs::File;
use std::io::Read;
use std::io::{Seek, SeekFrom};
use std::sync::Mutex;

use chkfs::BlockDevice;
use chkfs::WaitQueue;
use chkfs::BLOCK_SIZE;

/// 以宿主机文件为介质的块设备驱动
pub struct BlockFile {
    file: Mutex<File>,
    wait_queue: WaitQueue,
}

impl BlockFile {
    pub fn new(file: File) -> Self {
        Self {
            file: Mutex::new(file),
            wait_queue: WaitQueue::new(),
        }
    }
}

impl BlockDevice for BlockFile {
    fn read_block(&self, bn: u32, buf: &mut [u8]) {
        let mut file = self.file.lock().unwrap();
        file.seek(SeekFrom::Start(bn as u64 * BLOCK_SIZE as u64))
            .expect("seeking error");
        assert_eq!(file.read(buf).unwrap(), BLOCK_SIZE, "not a complete block!");
    }

    fn wait_queue(&self) -> &WaitQueue {
        &self.wait_queue
    }
}
