//! 缓冲外壳与外壳回收池。
//!
//! # 模块定位（Why）
//! - 外壳（[`BufCore`]）承载引用计数与内存绑定，是根缓冲与所有视图共享的状态；
//! - 高频分配场景下，外壳对象本身的构造也会带来分配抖动，因此释放后的外壳进入
//!   [`ShellPool`] 缓存，下次分配直接复用。
//!
//! # 类型状态（How）
//! - `ShellPool::obtain` 返回 [`RecycledShell`]，只能调用 `reuse` 得到 [`ReusedShell`]；
//! - `ReusedShell::init` 绑定内存后才得到可用的 [`PooledBuf`]；
//! - 编译期即排除“未复位就重新绑定”的误用。

use std::sync::{
    Arc, Weak,
    atomic::{AtomicUsize, Ordering},
};

use parking_lot::RwLock;
use spin::Mutex;
use tracing::trace;

use crate::{
    arena::{Allocation, Arena, SMALL_SIZE_THRESHOLD, TINY_QUANTUM},
    binding::Binding,
    channel::{BufWindow, MemoryWindow},
    error::{BufferError, ChannelError, Result},
    pooled::PooledBuf,
    refcnt::RefCnt,
};

/// 传输使用的窗口来源。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum WindowMode {
    /// 借出缓存窗口，传输结束后归还。
    Cached,
    /// 使用缓存窗口的副本，缓存不受影响。
    Duplicate,
}

/// 根缓冲与视图共享的核心状态。
pub(crate) struct BufCore {
    ref_cnt: RefCnt,
    binding: RwLock<Binding>,
    recycler: Weak<ShellPool>,
}

impl BufCore {
    fn new(recycler: Weak<ShellPool>) -> Self {
        Self {
            ref_cnt: RefCnt::new(),
            binding: RwLock::new(Binding::unbound()),
            recycler,
        }
    }

    pub(crate) fn ref_cnt(&self) -> usize {
        self.ref_cnt.get()
    }

    pub(crate) fn retain(&self) {
        self.ref_cnt.retain();
    }

    /// 释放一份引用，归零时执行回收并返回 `true`。
    pub(crate) fn release_ref(self: &Arc<Self>) -> bool {
        if self.ref_cnt.release() {
            self.deallocate();
            return true;
        }
        false
    }

    /// 归还内存与外壳；已释放时为空操作。
    pub(crate) fn deallocate(self: &Arc<Self>) {
        let Some((arena, released)) = self.binding.write().release() else {
            return;
        };
        let handle = released.handle;
        arena.free(
            released.region,
            released.transient,
            released.handle,
            released.max_length,
        );
        trace!(handle = handle.as_raw(), "buffer deallocated");
        if let Some(pool) = self.recycler.upgrade() {
            pool.recycle(Arc::clone(self));
        }
    }

    /// 按池化缓冲的伸缩策略调整容量，返回时绑定已经指向新的长度。
    pub(crate) fn resize(&self, new_capacity: usize) -> Result<()> {
        let mut binding = self.binding.write();
        let pooled = binding.live_region()?.is_pooled();
        let length = binding.length;
        if new_capacity == length {
            return Ok(());
        }
        if new_capacity > binding.max_capacity {
            return Err(BufferError::InvalidCapacity {
                requested: new_capacity,
                max_capacity: binding.max_capacity,
            });
        }
        if pooled {
            let max_length = binding.max_length;
            if new_capacity > length {
                if new_capacity <= max_length {
                    binding.resize_in_place(new_capacity);
                    return Ok(());
                }
            } else if new_capacity > max_length / 2
                && (max_length > SMALL_SIZE_THRESHOLD
                    || new_capacity > max_length.saturating_sub(TINY_QUANTUM))
            {
                binding.resize_in_place(new_capacity);
                return Ok(());
            }
        }
        let arena = binding.arena.clone().ok_or(BufferError::UseAfterRelease)?;
        arena.reallocate(&mut *binding, new_capacity, true)
    }

    pub(crate) fn binding(&self) -> &RwLock<Binding> {
        &self.binding
    }

    pub(crate) fn length(&self) -> usize {
        self.binding.read_recursive().length
    }

    pub(crate) fn max_capacity(&self) -> usize {
        self.binding.read_recursive().max_capacity
    }

    pub(crate) fn check_index(&self, index: usize, length: usize) -> Result<()> {
        self.binding.read_recursive().check_index(index, length)
    }

    pub(crate) fn get_bytes(&self, index: usize, dst: &mut [u8]) -> Result<()> {
        let binding = self.binding.read_recursive();
        binding.check_index(index, dst.len())?;
        binding
            .live_region()?
            .read_at(binding.offset + index, dst)
    }

    pub(crate) fn set_bytes(&self, index: usize, src: &[u8]) -> Result<()> {
        let binding = self.binding.read_recursive();
        binding.check_index(index, src.len())?;
        binding
            .live_region()?
            .write_at(binding.offset + index, src)
    }

    /// 返回覆盖 `[index, index + length)` 的公开窗口，`adjustment` 是视图在根缓冲中的偏移。
    ///
    /// 窗口记下当前绑定的代次，绑定改变后的任何访问都会被拒绝。
    pub(crate) fn window(
        &self,
        adjustment: usize,
        index: usize,
        length: usize,
    ) -> Result<BufWindow<'_>> {
        let binding = self.binding.read_recursive();
        binding.check_index(adjustment + index, length)?;
        binding.live_region()?;
        Ok(BufWindow::new(
            self,
            binding.generation(),
            adjustment,
            index,
            length,
        ))
    }

    /// 在 `[index, index + length)` 对应的窗口上执行一次通道传输。
    ///
    /// `Cached` 模式在传输期间把缓存窗口借出，结束后只有在内存未被换绑时才放回。
    /// `Duplicate` 模式在传输期间持有绑定的读锁，根缓冲无法在传输中途换绑内存。
    pub(crate) fn transfer<R>(
        &self,
        index: usize,
        length: usize,
        mode: WindowMode,
        op: impl FnOnce(&mut MemoryWindow) -> Result<R, ChannelError>,
    ) -> Result<R> {
        let mut window = match mode {
            WindowMode::Duplicate => {
                let binding = self.binding.read_recursive();
                binding.check_index(index, length)?;
                let mut window = match &binding.transient {
                    Some(cached) => cached.duplicate(),
                    None => binding.live_region()?.window(),
                };
                let start = binding.offset + index;
                window.set_bounds(start, start + length);
                return op(&mut window).map_err(BufferError::from);
            }
            WindowMode::Cached => {
                let mut binding = self.binding.write();
                binding.check_index(index, length)?;
                let mut window = match binding.transient.take() {
                    Some(cached) => cached,
                    None => binding.live_region()?.window(),
                };
                let start = binding.offset + index;
                window.set_bounds(start, start + length);
                window
            }
        };
        let outcome = op(&mut window);
        if mode == WindowMode::Cached {
            let mut binding = self.binding.write();
            let same_region = binding
                .region
                .as_ref()
                .is_some_and(|region| Arc::ptr_eq(region, window.region()));
            if same_region && binding.transient.is_none() {
                binding.transient = Some(window);
            }
        }
        outcome.map_err(BufferError::from)
    }

    #[cfg(test)]
    pub(crate) fn has_cached_window(&self) -> bool {
        self.binding.read_recursive().transient.is_some()
    }
}

/// 外壳回收池的统计快照。
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ShellStats {
    /// 累计新建的外壳数。
    pub created: usize,
    /// 累计回收进池的外壳数。
    pub recycled: usize,
    /// 当前缓存的外壳数。
    pub cached: usize,
}

/// `ShellPool` 缓存释放后的缓冲外壳。
///
/// # 契约说明（What）
/// - 最多缓存 `capacity` 个外壳，超出部分直接丢弃；
/// - 外壳与池之间只保留弱引用，池先于缓冲销毁时外壳自然释放。
pub struct ShellPool {
    free: Mutex<Vec<Arc<BufCore>>>,
    capacity: usize,
    created: AtomicUsize,
    recycled: AtomicUsize,
}

impl ShellPool {
    pub fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            free: Mutex::new(Vec::with_capacity(capacity.min(64))),
            capacity,
            created: AtomicUsize::new(0),
            recycled: AtomicUsize::new(0),
        })
    }

    /// 取出一个外壳；池为空时新建。
    pub fn obtain(self: &Arc<Self>) -> RecycledShell {
        let cached = self.free.lock().pop();
        let core = cached.unwrap_or_else(|| {
            self.created.fetch_add(1, Ordering::Relaxed);
            Arc::new(BufCore::new(Arc::downgrade(self)))
        });
        RecycledShell { core }
    }

    pub fn stats(&self) -> ShellStats {
        ShellStats {
            created: self.created.load(Ordering::Relaxed),
            recycled: self.recycled.load(Ordering::Relaxed),
            cached: self.free.lock().len(),
        }
    }

    pub(crate) fn recycle(&self, core: Arc<BufCore>) {
        let mut free = self.free.lock();
        if free.len() >= self.capacity {
            trace!(capacity = self.capacity, "shell pool full, dropping shell");
            return;
        }
        free.push(core);
        drop(free);
        self.recycled.fetch_add(1, Ordering::Relaxed);
        trace!("shell recycled");
    }
}

/// 刚从池中取出的外壳，必须先 [`reuse`](RecycledShell::reuse)。
pub struct RecycledShell {
    core: Arc<BufCore>,
}

impl RecycledShell {
    /// 复位容量上限、引用计数与内存绑定。
    pub fn reuse(self, max_capacity: usize) -> ReusedShell {
        self.core.ref_cnt.reset();
        self.core.binding.write().reset(max_capacity);
        ReusedShell { core: self.core }
    }
}

/// 已复位、等待绑定内存的外壳。
pub struct ReusedShell {
    core: Arc<BufCore>,
}

impl ReusedShell {
    /// 把外壳绑定到 `allocation`，返回游标归零的缓冲。
    ///
    /// # Panics
    /// `allocation.length` 超过 `reuse` 设置的 `max_capacity`，或分配越出区域边界时 panic。
    pub fn init(self, arena: Arc<dyn Arena>, allocation: Allocation) -> PooledBuf {
        self.core.binding.write().bind(arena, allocation);
        PooledBuf::from_core(self.core)
    }
}
