//! # 块缓存层
//!
//! 固定容量的槽表，把块编号映射到常驻内存的页缓冲，
//! 向并发的内核任务保证：
//! - 同一块在表中至多占一个带引用的槽；
//! - 同一次常驻期间设备只被读一次，其余请求者等待装载完成；
//! - 持有引用期间页指针稳定，引用清零即释放页并清空槽。
//!
//! 锁序固定为**全局锁 → 槽锁**。命中/占槽在全局锁下决定，
//! 随后在放开全局锁之前先取下槽锁（锁交接），
//! 保证后来者无法越过一个仍在装载的槽。读盘不持任何锁，
//! 仅靠 `Loading` 标志挡住其它装载者。

use alloc::sync::Arc;
use core::array;
use core::mem;
use core::ops::Deref;
use core::ptr::NonNull;
use core::slice;

use enumflags2::{bitflags, BitFlags};
use log::warn;
use spin::Mutex;

use crate::block_dev::BlockDevice;
use crate::page::PageAllocator;
use crate::sched::Scheduler;
use crate::{DataBlock, BLOCK_SIZE};

/// 装载前对新页做的一次性变换，用于清零磁盘记录里的内存态字段。
/// 在槽锁下、任何读者看到 `Loaded` 之前恰好运行一次；不得阻塞。
pub type CleanBlockFn = fn(&mut [u8]);

/// 槽数上限
const CAPACITY: usize = 10;

/// 槽的装载状态；二者皆无代表空槽
#[bitflags]
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotFlag {
    /// 有任务正在读盘
    Loading = 1 << 0,
    /// 页内容已就绪
    Loaded = 1 << 1,
}

/// 全局锁保护的槽元数据；`bn` 仅在 `refcnt > 0` 时有意义
#[derive(Debug, Default, Clone, Copy)]
struct SlotMeta {
    bn: u32,
    refcnt: u32,
}

/// 槽锁保护的装载状态
#[derive(Default)]
struct SlotState {
    flags: BitFlags<SlotFlag>,
    page: Option<Page>,
}

/// 槽独占的页缓冲
struct Page(NonNull<u8>);

// 页由槽独占，跨任务转移是安全的
unsafe impl Send for Page {}

impl Page {
    fn bytes_mut(&mut self) -> &mut [u8] {
        unsafe { slice::from_raw_parts_mut(self.0.as_ptr(), BLOCK_SIZE) }
    }
}

pub struct BufCache {
    device: Arc<dyn BlockDevice>,
    sched: Arc<dyn Scheduler>,
    allocator: Arc<dyn PageAllocator>,
    /// 全局锁：序列化命中查找与占槽
    meta: Mutex<[SlotMeta; CAPACITY]>,
    /// 槽锁：序列化装载状态的迁移
    slots: [Mutex<SlotState>; CAPACITY],
}

impl BufCache {
    /// 槽数上限
    pub const CAPACITY: usize = CAPACITY;

    pub fn new(
        device: Arc<dyn BlockDevice>,
        sched: Arc<dyn Scheduler>,
        allocator: Arc<dyn PageAllocator>,
    ) -> Self {
        Self {
            device,
            sched,
            allocator,
            meta: Mutex::new([SlotMeta::default(); CAPACITY]),
            slots: array::from_fn(|_| Mutex::new(SlotState::default())),
        }
    }

    /// 取得块 `bn` 的缓存引用，可能阻塞。
    ///
    /// 命中返回既有槽；未命中则占一个空槽并从设备装载，
    /// 装载中的槽等待装载者完成。满表或页分配失败返回 `None`。
    pub fn get(&self, bn: u32, cleaner: Option<CleanBlockFn>) -> Option<BlockRef<'_>> {
        let mut meta = self.meta.lock();

        // 命中查找
        let index = match meta.iter().position(|slot| slot.refcnt > 0 && slot.bn == bn) {
            Some(index) => index,
            None => {
                // 未命中，占用空槽
                let Some(index) = meta.iter().position(|slot| slot.refcnt == 0) else {
                    drop(meta);
                    warn!("bufcache: no room for block {bn}");
                    return None;
                };
                meta[index].bn = bn;
                index
            }
        };
        meta[index].refcnt += 1;

        // 锁交接：持全局锁取下槽锁，再放全局锁
        let mut slot = self.slots[index].lock();
        drop(meta);

        // 装载，或等待并发装载者完成
        while !slot.flags.contains(SlotFlag::Loaded) {
            if !slot.flags.contains(SlotFlag::Loading) {
                let Some(ptr) = self.allocator.alloc() else {
                    drop(slot);
                    self.release(index);
                    return None;
                };
                let mut page = Page(ptr);
                slot.flags |= SlotFlag::Loading;
                drop(slot);
                // 无锁读盘；页尚未共享
                self.device
                    .read_block(bn, page.bytes_mut());
                slot = self.slots[index].lock();
                if let Some(clean) = cleaner {
                    clean(page.bytes_mut());
                }
                slot.page = Some(page);
                slot.flags.remove(SlotFlag::Loading);
                slot.flags |= SlotFlag::Loaded;
                // 通知其它等候者重新检查
                self.device.wait_queue().wake_all();
            } else {
                slot = self.device.wait_queue().wait_until(
                    &*self.sched,
                    &self.slots[index],
                    slot,
                    |state| !state.flags.contains(SlotFlag::Loading),
                );
            }
        }

        let ptr = slot.page.as_ref().unwrap().0;
        drop(slot);

        Some(BlockRef {
            cache: self,
            index,
            ptr,
        })
    }

    /// 归还一个引用；清零时释放页并清空槽
    fn release(&self, index: usize) {
        let mut meta = self.meta.lock();
        assert!(meta[index].refcnt > 0, "release of an unheld cache slot");
        meta[index].refcnt -= 1;

        if meta[index].refcnt == 0 {
            let mut state = self.slots[index].lock();
            state.flags = BitFlags::empty();
            let page = state.page.take();
            drop(state);
            drop(meta);
            if let Some(page) = page {
                unsafe { self.allocator.free(page.0) };
            }
        }
    }

    /// 当前带引用的槽数
    pub fn pinned_slots(&self) -> usize {
        self.meta.lock().iter().filter(|slot| slot.refcnt > 0).count()
    }

    pub(crate) fn scheduler(&self) -> &dyn Scheduler {
        &*self.sched
    }
}

/// 块的缓存引用：存续期间槽被钉住，页指针与内容稳定。
/// 释放即 [`Drop`]。
pub struct BlockRef<'a> {
    cache: &'a BufCache,
    index: usize,
    ptr: NonNull<u8>,
}

// 引用存续期间页被钉住，只读共享是安全的
unsafe impl Send for BlockRef<'_> {}
unsafe impl Sync for BlockRef<'_> {}

impl<'a> BlockRef<'a> {
    /// 把页内偏移 `offset` 处解释为 `T` 的只读视图，
    /// 生命期与本引用绑定
    pub fn view<T: Sized>(&self, offset: usize) -> &T {
        assert!(offset + mem::size_of::<T>() <= BLOCK_SIZE);
        debug_assert_eq!(offset % mem::align_of::<T>(), 0);
        unsafe { &*self.ptr.as_ptr().add(offset).cast() }
    }

    #[inline]
    pub fn map<T: Sized, V>(&self, offset: usize, f: impl FnOnce(&T) -> V) -> V {
        f(self.view(offset))
    }

    #[inline]
    pub fn as_ptr(&self) -> *const u8 {
        self.ptr.as_ptr()
    }

    pub(crate) fn cache(&self) -> &'a BufCache {
        self.cache
    }
}

impl Deref for BlockRef<'_> {
    type Target = DataBlock;

    fn deref(&self) -> &DataBlock {
        unsafe { &*self.ptr.as_ptr().cast() }
    }
}

impl Drop for BlockRef<'_> {
    fn drop(&mut self) {
        self.cache.release(self.index);
    }
}
