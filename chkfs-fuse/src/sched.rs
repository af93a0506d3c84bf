use std::sync::Arc;
use std::thread::{self, Thread};

use chkfs::{Scheduler, TaskHandle};

struct ThreadTask(Thread);

impl TaskHandle for ThreadTask {
    fn wake(&self) {
        // unpark 票据保证先唤醒后挂起不丢失
        self.0.unpark();
    }
}

/// 用宿主机线程扮演内核任务的调度器
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadScheduler;

impl Scheduler for ThreadScheduler {
    fn current_task(&self) -> Arc<dyn TaskHandle> {
        Arc::new(ThreadTask(thread::current()))
    }

    fn yield_now(&self) {
        thread::yield_now();
    }

    fn block_current(&self) {
        thread::park();
    }
}
