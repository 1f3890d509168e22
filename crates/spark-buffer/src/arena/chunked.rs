use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use bytes::BytesMut;
use spin::Mutex;
use tracing::{debug, trace};

use super::{Allocation, Arena, Handle, Region, RegionOrigin};
use crate::{
    channel::MemoryWindow,
    config::ArenaConfig,
    error::{BufferError, Result},
};

/// 小于该值的请求按 16 字节粒度取整，之上按 2 的幂取整。
pub const SMALL_SIZE_THRESHOLD: usize = 512;
/// 小尺寸请求的取整粒度。
pub const TINY_QUANTUM: usize = 16;

/// 请求归一化后的尺寸等级。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SizeClass {
    /// 小于页大小，从共享页中切分槽位。
    Subpage { elem_size: usize },
    /// 页大小到分块大小之间，独占一段连续的页。
    Run { run_size: usize },
    /// 大于分块，单独向系统申请，不参与池化。
    Huge { size: usize },
}

impl SizeClass {
    pub fn of(size: usize, page_size: usize, chunk_size: usize) -> Self {
        if size > chunk_size {
            return SizeClass::Huge { size };
        }
        let normalized = if size < SMALL_SIZE_THRESHOLD {
            size.max(1).div_ceil(TINY_QUANTUM) * TINY_QUANTUM
        } else {
            size.next_power_of_two()
        };
        if normalized < page_size {
            SizeClass::Subpage {
                elem_size: normalized,
            }
        } else {
            SizeClass::Run {
                run_size: normalized,
            }
        }
    }

    /// Arena 为该等级预留的字节数。
    pub fn reserved(self) -> usize {
        match self {
            SizeClass::Subpage { elem_size } => elem_size,
            SizeClass::Run { run_size } => run_size,
            SizeClass::Huge { size } => size,
        }
    }
}

/// Arena 统计快照。
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ArenaStats {
    pub chunks: usize,
    pub active_allocations: usize,
    pub active_bytes: usize,
    pub huge_allocations: usize,
    pub cached_runs: usize,
    pub subpages: usize,
}

/// `ChunkedArena` 是 [`Arena`] 契约的默认实现。
///
/// # 核心机制（How）
/// - 以 `chunk_size` 为单位一次性申请清零的 `BytesMut`，再用 `split_to` 切出页或连续页，
///   切出的区域与分块共享同一次堆分配；
/// - 小于页大小的请求从页中按槽位分配：开页时把整页切成等长的槽位区域，页内空闲槽位用栈维护；
/// - 页内槽位全部释放后，槽位区域拼回整页并挂回页级自由链表，可以再服务其它尺寸等级；
/// - 释放的连续页按大小挂入自由链表，下次同等级请求优先复用；
/// - 超过分块大小的请求直接分配非池化区域，释放即归还系统。
///
/// # 设计权衡（Trade-offs）
/// - 分块尾部不足以容纳新请求时，尾部按页拆分放入自由链表后再开启新分块，避免容量泄漏；
/// - 共享状态由 `spin::Mutex` 保护，临界区只做簿记，不复制数据；
/// - 释放的页不会归并为更大的连续页，换取实现的简单与可预测。
pub struct ChunkedArena {
    page_size: usize,
    chunk_size: usize,
    max_chunks: Option<usize>,
    state: Mutex<ArenaState>,
    metrics: ArenaMetrics,
}

#[derive(Default)]
struct ArenaState {
    tail: BytesMut,
    chunks: usize,
    free_runs: HashMap<usize, Vec<Arc<Region>>>,
    subpages: HashMap<u64, Subpage>,
    partial: HashMap<usize, Vec<u64>>,
}

struct Subpage {
    elem_size: usize,
    slots: Vec<Arc<Region>>,
    /// 页大小不是槽位大小整数倍时剩下的尾部，拼回整页时使用。
    remainder: BytesMut,
    free_slots: Vec<u32>,
}

#[derive(Default)]
struct ArenaMetrics {
    active_allocations: AtomicUsize,
    active_bytes: AtomicUsize,
    huge_allocations: AtomicUsize,
}

impl ArenaMetrics {
    fn on_allocate(&self, reserved: usize) {
        self.active_allocations.fetch_add(1, Ordering::Relaxed);
        self.active_bytes.fetch_add(reserved, Ordering::Relaxed);
    }

    fn on_free(&self, reserved: usize) {
        saturating_sub(&self.active_allocations, 1);
        saturating_sub(&self.active_bytes, reserved);
    }
}

fn saturating_sub(target: &AtomicUsize, value: usize) {
    let _ = target.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |current| {
        Some(current.saturating_sub(value))
    });
}

impl ChunkedArena {
    pub fn new(config: &ArenaConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            page_size: config.page_size,
            chunk_size: config.chunk_size,
            max_chunks: config.max_chunks,
            state: Mutex::new(ArenaState::default()),
            metrics: ArenaMetrics::default(),
        })
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn size_class(&self, size: usize) -> SizeClass {
        SizeClass::of(size, self.page_size, self.chunk_size)
    }

    pub fn stats(&self) -> ArenaStats {
        let state = self.state.lock();
        ArenaStats {
            chunks: state.chunks,
            active_allocations: self.metrics.active_allocations.load(Ordering::Relaxed),
            active_bytes: self.metrics.active_bytes.load(Ordering::Relaxed),
            huge_allocations: self.metrics.huge_allocations.load(Ordering::Relaxed),
            cached_runs: state.free_runs.values().map(Vec::len).sum(),
            subpages: state.subpages.len(),
        }
    }

    /// 从当前分块尾部切出 `len` 字节，必要时开启新分块。
    fn carve(&self, state: &mut ArenaState, len: usize) -> Result<BytesMut> {
        if state.tail.len() < len {
            if self.max_chunks.is_some_and(|max| state.chunks >= max) {
                return Err(BufferError::ArenaExhausted { requested: len });
            }
            while state.tail.len() >= self.page_size {
                let page = state.tail.split_to(self.page_size);
                state
                    .free_runs
                    .entry(self.page_size)
                    .or_default()
                    .push(Region::from_bytes(RegionOrigin::Pooled, page));
            }
            state.tail = BytesMut::zeroed(self.chunk_size);
            state.chunks += 1;
            debug!(
                chunk_size = self.chunk_size,
                chunks = state.chunks,
                "arena opened chunk"
            );
        }
        Ok(state.tail.split_to(len))
    }

    fn allocate_run(&self, size: usize, run_size: usize) -> Result<Allocation> {
        let mut state = self.state.lock();
        let cached = state.free_runs.get_mut(&run_size).and_then(Vec::pop);
        let region = match cached {
            Some(region) => region,
            None => Region::from_bytes(RegionOrigin::Pooled, self.carve(&mut state, run_size)?),
        };
        drop(state);
        Ok(Allocation {
            handle: Handle::whole(region.id()),
            region,
            offset: 0,
            length: size,
            max_length: run_size,
        })
    }

    fn allocate_subpage(&self, size: usize, elem_size: usize) -> Result<Allocation> {
        let mut state = self.state.lock();
        let partial = state.partial.get(&elem_size).and_then(|ids| ids.last().copied());
        let page_id = match partial {
            Some(id) => id,
            None => self.open_subpage(&mut state, elem_size)?,
        };
        let Some(subpage) = state.subpages.get_mut(&page_id) else {
            unreachable!("partial 列表只记录已登记的页");
        };
        let Some(slot) = subpage.free_slots.pop() else {
            unreachable!("partial 列表中的页至少有一个空闲槽位");
        };
        let region = Arc::clone(&subpage.slots[slot as usize]);
        if subpage.free_slots.is_empty() {
            if let Some(ids) = state.partial.get_mut(&elem_size) {
                ids.retain(|id| *id != page_id);
            }
        }
        drop(state);
        Ok(Allocation {
            handle: Handle::slot(page_id, slot),
            region,
            offset: 0,
            length: size,
            max_length: elem_size,
        })
    }

    /// 取一整页切成 `elem_size` 的槽位区域并登记，返回页编号。
    fn open_subpage(&self, state: &mut ArenaState, elem_size: usize) -> Result<u64> {
        let cached = state.free_runs.get_mut(&self.page_size).and_then(Vec::pop);
        let mut page = match cached.map(Arc::try_unwrap) {
            Some(Ok(region)) => region.into_memory(),
            Some(Err(shared)) => {
                // 仍被外部引用的页不能拆分，放到链表底部后改用新页。
                state
                    .free_runs
                    .entry(self.page_size)
                    .or_default()
                    .insert(0, shared);
                self.carve(state, self.page_size)?
            }
            None => self.carve(state, self.page_size)?,
        };
        let count = self.page_size / elem_size;
        let slots: Vec<Arc<Region>> = (0..count)
            .map(|_| Region::from_bytes(RegionOrigin::Pooled, page.split_to(elem_size)))
            .collect();
        let page_id = slots[0].id();
        state.subpages.insert(
            page_id,
            Subpage {
                elem_size,
                slots,
                remainder: page,
                free_slots: (0..count as u32).rev().collect(),
            },
        );
        state.partial.entry(elem_size).or_default().push(page_id);
        trace!(page_id, elem_size, slots = count, "arena opened subpage");
        Ok(page_id)
    }

    /// 槽位全部空闲的页拼回整页，交还页级自由链表。
    ///
    /// 任一槽位区域仍被外部引用时保留该页，槽位照常复用。
    fn retire_subpage(&self, state: &mut ArenaState, page_id: u64) {
        let unshared = state.subpages.get(&page_id).is_some_and(|subpage| {
            subpage
                .slots
                .iter()
                .all(|slot| Arc::strong_count(slot) == 1)
        });
        if !unshared {
            return;
        }
        let Some(subpage) = state.subpages.remove(&page_id) else {
            return;
        };
        if let Some(ids) = state.partial.get_mut(&subpage.elem_size) {
            ids.retain(|id| *id != page_id);
        }
        let mut page = BytesMut::new();
        for slot in subpage.slots {
            let Ok(region) = Arc::try_unwrap(slot) else {
                unreachable!("槽位区域在持锁期间已确认没有其它引用");
            };
            // 槽位按顺序从同一页切出，依次拼接不会复制。
            page.unsplit(region.into_memory());
        }
        page.unsplit(subpage.remainder);
        debug_assert_eq!(page.len(), self.page_size);
        state
            .free_runs
            .entry(self.page_size)
            .or_default()
            .push(Region::from_bytes(RegionOrigin::Pooled, page));
        trace!(page_id, "arena retired subpage");
    }

    fn allocate_huge(&self, size: usize) -> Allocation {
        let region = Region::zeroed(RegionOrigin::Unpooled, size);
        self.metrics.huge_allocations.fetch_add(1, Ordering::Relaxed);
        debug!(size, "arena allocated unpooled region");
        Allocation {
            handle: Handle::whole(region.id()),
            region,
            offset: 0,
            length: size,
            max_length: size,
        }
    }
}

impl Arena for ChunkedArena {
    fn allocate(&self, size: usize) -> Result<Allocation> {
        let class = self.size_class(size);
        let allocation = match class {
            SizeClass::Subpage { elem_size } => self.allocate_subpage(size, elem_size)?,
            SizeClass::Run { run_size } => self.allocate_run(size, run_size)?,
            SizeClass::Huge { size } => self.allocate_huge(size),
        };
        self.metrics.on_allocate(class.reserved());
        trace!(
            size,
            handle = allocation.handle.as_raw(),
            max_length = allocation.max_length,
            "arena allocated"
        );
        Ok(allocation)
    }

    fn free(
        &self,
        region: Arc<Region>,
        transient: Option<MemoryWindow>,
        handle: Handle,
        max_length: usize,
    ) {
        drop(transient);
        trace!(handle = handle.as_raw(), max_length, "arena free");
        if !region.is_pooled() {
            self.metrics.on_free(region.len());
            saturating_sub(&self.metrics.huge_allocations, 1);
            return;
        }
        let mut state = self.state.lock();
        let reserved = match handle.slot_index() {
            Some(slot) => {
                // 槽位区域的其余引用由页持有，先放下本次的引用，拼页时才能取回内存。
                drop(region);
                let page_id = handle.region_id();
                let Some(subpage) = state.subpages.get_mut(&page_id) else {
                    debug_assert!(false, "释放未登记的页内槽位");
                    return;
                };
                let was_full = subpage.free_slots.is_empty();
                subpage.free_slots.push(slot);
                let elem_size = subpage.elem_size;
                let all_free = subpage.free_slots.len() == subpage.slots.len();
                if was_full {
                    state.partial.entry(elem_size).or_default().push(page_id);
                }
                if all_free {
                    self.retire_subpage(&mut state, page_id);
                }
                elem_size
            }
            None => {
                let run_size = region.len();
                state.free_runs.entry(run_size).or_default().push(region);
                run_size
            }
        };
        drop(state);
        self.metrics.on_free(reserved);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_arena() -> ChunkedArena {
        let config = ArenaConfig::default()
            .with_page_size(1024)
            .with_chunk_size(8 * 1024);
        ChunkedArena::new(&config).expect("测试配置合法")
    }

    #[test]
    fn size_classes_follow_tiny_and_power_of_two_rules() {
        assert_eq!(
            SizeClass::of(0, 8192, 65536),
            SizeClass::Subpage { elem_size: 16 }
        );
        assert_eq!(
            SizeClass::of(300, 8192, 65536),
            SizeClass::Subpage { elem_size: 304 }
        );
        assert_eq!(
            SizeClass::of(600, 8192, 65536),
            SizeClass::Subpage { elem_size: 1024 }
        );
        assert_eq!(
            SizeClass::of(5000, 8192, 65536),
            SizeClass::Run { run_size: 8192 }
        );
        assert_eq!(
            SizeClass::of(65537, 8192, 65536),
            SizeClass::Huge { size: 65537 }
        );
    }

    #[test]
    fn subpage_slots_share_a_page_but_not_a_region() {
        let arena = small_arena();
        let a = arena.allocate(100).unwrap();
        let b = arena.allocate(100).unwrap();
        assert!(!Arc::ptr_eq(&a.region, &b.region));
        assert_eq!(a.handle.region_id(), b.handle.region_id());
        assert_ne!(a.handle.slot_index(), b.handle.slot_index());
        assert_eq!((a.offset, a.max_length, a.region.len()), (0, 112, 112));
        assert_eq!(arena.stats().subpages, 1);

        let a_handle = a.handle;
        arena.free(a.region, None, a.handle, a.max_length);
        let c = arena.allocate(100).unwrap();
        assert_eq!(c.handle, a_handle, "释放的槽位应被优先复用");
        arena.free(b.region, None, b.handle, b.max_length);
        arena.free(c.region, None, c.handle, c.max_length);
        let stats = arena.stats();
        assert_eq!(stats.active_allocations, 0);
        assert_eq!(stats.subpages, 0);
    }

    #[test]
    fn emptied_subpages_return_whole_pages_to_the_free_list() {
        let arena = small_arena();
        // 1024 / 304 = 3 个槽位，尾部剩余 112 字节。
        let slots: Vec<_> = (0..3).map(|_| arena.allocate(300).unwrap()).collect();
        assert_eq!(arena.stats().subpages, 1);
        for slot in slots {
            arena.free(slot.region, None, slot.handle, slot.max_length);
        }
        let stats = arena.stats();
        assert_eq!(stats.subpages, 0);
        assert_eq!(stats.cached_runs, 1);

        let page = arena.allocate(1024).unwrap();
        assert_eq!(page.region.len(), 1024);
        assert_eq!(arena.stats().cached_runs, 0);
    }

    #[test]
    fn freed_runs_are_reused_for_the_same_class() {
        let arena = small_arena();
        let first = arena.allocate(2000).unwrap();
        assert_eq!(first.max_length, 2048);
        let id = first.region.id();
        arena.free(first.region, None, first.handle, first.max_length);
        assert_eq!(arena.stats().cached_runs, 1);

        let second = arena.allocate(1500).unwrap();
        assert_eq!(second.region.id(), id);
        assert_eq!(second.length, 1500);
    }

    #[test]
    fn exhausting_a_chunk_recycles_its_tail_into_pages() {
        let arena = small_arena();
        let _big = arena.allocate(4096).unwrap();
        let _other = arena.allocate(2048).unwrap();
        // 剩余 2 KiB 尾部不足以容纳 4 KiB，应拆成两页后开启新分块。
        let _third = arena.allocate(4096).unwrap();
        let stats = arena.stats();
        assert_eq!(stats.chunks, 2);
        assert_eq!(stats.cached_runs, 2);
    }

    #[test]
    fn max_chunks_bounds_pooled_allocations_but_not_huge_ones() {
        let config = ArenaConfig::default()
            .with_page_size(1024)
            .with_chunk_size(4096)
            .with_max_chunks(1);
        let arena = ChunkedArena::new(&config).unwrap();
        let _a = arena.allocate(4096).unwrap();
        let err = arena.allocate(4096).unwrap_err();
        assert!(matches!(err, BufferError::ArenaExhausted { requested: 4096 }));

        let huge = arena.allocate(10_000).unwrap();
        assert!(!huge.region.is_pooled());
        assert_eq!(arena.stats().huge_allocations, 1);
        arena.free(huge.region, None, huge.handle, huge.max_length);
        assert_eq!(arena.stats().huge_allocations, 0);
    }
}
