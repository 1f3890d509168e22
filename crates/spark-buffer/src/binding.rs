use std::sync::Arc;

use crate::{
    arena::{Allocation, Arena, Handle, Region},
    channel::MemoryWindow,
    error::{BufferError, Result, check_range},
};

/// `Binding` 记录缓冲与 Arena 内存之间的绑定关系。
///
/// # 设计背景（Why）
/// - 根缓冲与它的所有视图共享同一个 `Binding`，容量变化与重新分配对视图立即可见；
/// - Arena 的 `reallocate` 通过 [`Binding::rebind`] 换绑内存，不需要了解缓冲的游标结构。
///
/// # 契约说明（What）
/// - `handle` 为 `None` 表示已释放，此时所有数据访问返回 [`BufferError::UseAfterRelease`]；
/// - 绑定期间满足 `offset + length ≤ region.len()` 与 `length ≤ max_length ≤ max_capacity`；
/// - 换绑或释放都会清空临时窗口缓存；
/// - 每次换绑、释放或调整长度都会推进 `generation`，对外发放的窗口据此判断自己是否仍然有效。
pub struct Binding {
    pub(crate) arena: Option<Arc<dyn Arena>>,
    pub(crate) region: Option<Arc<Region>>,
    pub(crate) handle: Option<Handle>,
    pub(crate) offset: usize,
    pub(crate) length: usize,
    pub(crate) max_length: usize,
    pub(crate) max_capacity: usize,
    pub(crate) transient: Option<MemoryWindow>,
    pub(crate) generation: u64,
}

/// 换绑或释放时交还给 Arena 的旧绑定。
#[derive(Debug)]
pub struct Released {
    pub region: Arc<Region>,
    pub handle: Handle,
    pub offset: usize,
    pub length: usize,
    pub max_length: usize,
    pub transient: Option<MemoryWindow>,
}

impl Binding {
    pub(crate) fn unbound() -> Self {
        Self {
            arena: None,
            region: None,
            handle: None,
            offset: 0,
            length: 0,
            max_length: 0,
            max_capacity: 0,
            transient: None,
            generation: 0,
        }
    }

    pub fn handle(&self) -> Option<Handle> {
        self.handle
    }

    pub fn region(&self) -> Option<&Arc<Region>> {
        self.region.as_ref()
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn length(&self) -> usize {
        self.length
    }

    pub fn max_length(&self) -> usize {
        self.max_length
    }

    pub fn max_capacity(&self) -> usize {
        self.max_capacity
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    /// 在已预留的内存内原地调整长度。
    pub(crate) fn resize_in_place(&mut self, length: usize) {
        debug_assert!(length <= self.max_length);
        self.length = length;
        self.generation = self.generation.wrapping_add(1);
    }

    /// 绑定到新的分配，返回此前的绑定（若有）。
    ///
    /// `max_length` 被截断到 `max_capacity`，保证 `length ≤ max_length ≤ max_capacity`。
    ///
    /// # Panics
    /// 分配结果违反区间约束时 panic：这说明 Arena 实现存在缺陷。
    pub fn rebind(&mut self, allocation: Allocation) -> Option<Released> {
        let Allocation {
            region,
            handle,
            offset,
            length,
            max_length,
        } = allocation;
        assert!(
            length <= max_length && offset + max_length <= region.len(),
            "Arena 返回的分配越出区域边界"
        );
        assert!(
            length <= self.max_capacity,
            "分配长度 {length} 超过 max_capacity {}",
            self.max_capacity
        );
        let previous = self.take_released();
        self.region = Some(region);
        self.handle = Some(handle);
        self.offset = offset;
        self.length = length;
        self.max_length = max_length.min(self.max_capacity);
        previous
    }

    /// 首次绑定：记录 Arena 并接管分配。
    pub(crate) fn bind(&mut self, arena: Arc<dyn Arena>, allocation: Allocation) {
        assert!(self.handle.is_none(), "外壳在绑定前必须处于释放状态");
        self.arena = Some(arena);
        let previous = self.rebind(allocation);
        debug_assert!(previous.is_none());
    }

    /// 重新发放外壳前的复位。
    pub(crate) fn reset(&mut self, max_capacity: usize) {
        debug_assert!(self.handle.is_none(), "仍绑定内存的外壳不应被复位");
        // 代数跨外壳复用保持递增，旧窗口不会因外壳重新发放而复活。
        *self = Self {
            max_capacity,
            generation: self.generation.wrapping_add(1),
            ..Self::unbound()
        };
    }

    /// 解除绑定，返回 Arena 与旧绑定；已释放时返回 `None`。
    pub(crate) fn release(&mut self) -> Option<(Arc<dyn Arena>, Released)> {
        let released = self.take_released()?;
        let arena = self.arena.take()?;
        self.length = 0;
        self.max_length = 0;
        Some((arena, released))
    }

    /// 访问前的检查：先确认仍然绑定，再确认区间落在当前容量内。
    pub(crate) fn check_index(&self, index: usize, length: usize) -> Result<()> {
        if self.handle.is_none() {
            return Err(BufferError::UseAfterRelease);
        }
        check_range(index, length, self.length)
    }

    pub(crate) fn live_region(&self) -> Result<&Arc<Region>> {
        match (&self.handle, &self.region) {
            (Some(_), Some(region)) => Ok(region),
            _ => Err(BufferError::UseAfterRelease),
        }
    }

    fn take_released(&mut self) -> Option<Released> {
        let handle = self.handle.take()?;
        let region = self.region.take()?;
        self.generation = self.generation.wrapping_add(1);
        Some(Released {
            region,
            handle,
            offset: self.offset,
            length: self.length,
            max_length: self.max_length,
            transient: self.transient.take(),
        })
    }
}

impl std::fmt::Debug for Binding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Binding")
            .field("handle", &self.handle)
            .field("region", &self.region.as_ref().map(|region| region.id()))
            .field("offset", &self.offset)
            .field("length", &self.length)
            .field("max_length", &self.max_length)
            .field("max_capacity", &self.max_capacity)
            .field("generation", &self.generation)
            .finish()
    }
}
