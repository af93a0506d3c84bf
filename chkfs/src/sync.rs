//! # 等待队列
//!
//! 装载同一块的任务间靠它传递“重新检查”的信号：
//! 等候者把自己挂上队列、放开槽锁、陷入休眠；
//! 装载者完成后唤醒全部等候者，各自重新上锁并重验标志位。

use alloc::collections::VecDeque;
use alloc::sync::Arc;

use spin::{Mutex, MutexGuard};

use crate::sched::{Scheduler, TaskHandle};

pub struct WaitQueue {
    waiters: Mutex<VecDeque<Arc<dyn TaskHandle>>>,
}

impl WaitQueue {
    pub const fn new() -> Self {
        Self {
            waiters: Mutex::new(VecDeque::new()),
        }
    }

    /// 唤醒全部等候者
    pub fn wake_all(&self) {
        while let Some(task) = self.waiters.lock().pop_front() {
            task.wake();
        }
    }

    /// 挂起当前任务直到谓词成立。
    ///
    /// 挂起期间释放 `guard`，醒来后重新取 `lock` 并重验谓词，
    /// 休眠前的状态不作数。入队在放锁之前完成，
    /// 配合 [`TaskHandle::wake`] 的票据语义，不会错过间隙里的唤醒。
    pub fn wait_until<'a, T, F>(
        &self,
        sched: &dyn Scheduler,
        lock: &'a Mutex<T>,
        mut guard: MutexGuard<'a, T>,
        pred: F,
    ) -> MutexGuard<'a, T>
    where
        F: Fn(&T) -> bool,
    {
        loop {
            if pred(&guard) {
                return guard;
            }
            self.waiters.lock().push_back(sched.current_task());
            drop(guard);
            sched.block_current();
            guard = lock.lock();
        }
    }
}

impl Default for WaitQueue {
    fn default() -> Self {
        Self::new()
    }
}
