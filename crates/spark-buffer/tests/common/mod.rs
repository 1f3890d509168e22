//! 集成测试共享的记录型 Arena。

#![allow(dead_code)]

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
};

use spark_buffer::{
    Allocation, Arena, ArenaConfig, Handle, MemoryWindow, PooledBufAllocator, Region,
    RegionOrigin, Result,
};

/// `RecordingArena`：为每次分配新建独立区域，并记录 `allocate`/`free` 调用。
///
/// # 设计动机（Why）
/// - 容量策略的断言依赖精确的 `max_length`，真实 Arena 会按尺寸等级取整；
///   记录型 Arena 允许测试预先指定下一次分配的预留长度；
/// - `free` 的调用次数与句柄是“恰好释放一次”的直接证据。
pub struct RecordingArena {
    origin: RegionOrigin,
    planned: Mutex<VecDeque<usize>>,
    allocations: Mutex<Vec<(usize, Handle)>>,
    frees: Mutex<Vec<(Handle, usize)>>,
}

impl RecordingArena {
    pub fn new(origin: RegionOrigin) -> Arc<Self> {
        Arc::new(Self {
            origin,
            planned: Mutex::new(VecDeque::new()),
            allocations: Mutex::new(Vec::new()),
            frees: Mutex::new(Vec::new()),
        })
    }

    /// 指定下一次分配的预留长度；未指定时预留长度等于请求长度。
    pub fn reserve_next(&self, max_length: usize) {
        self.planned
            .lock()
            .expect("mutex poisoned")
            .push_back(max_length);
    }

    pub fn allocations(&self) -> Vec<(usize, Handle)> {
        self.allocations.lock().expect("mutex poisoned").clone()
    }

    pub fn frees(&self) -> Vec<(Handle, usize)> {
        self.frees.lock().expect("mutex poisoned").clone()
    }
}

impl Arena for RecordingArena {
    fn allocate(&self, size: usize) -> Result<Allocation> {
        let planned = self.planned.lock().expect("mutex poisoned").pop_front();
        let max_length = planned.unwrap_or(size).max(size);
        let region = Region::zeroed(self.origin, max_length);
        let handle = Handle::whole(region.id());
        self.allocations
            .lock()
            .expect("mutex poisoned")
            .push((size, handle));
        Ok(Allocation {
            region,
            handle,
            offset: 0,
            length: size,
            max_length,
        })
    }

    fn free(
        &self,
        _region: Arc<Region>,
        _transient: Option<MemoryWindow>,
        handle: Handle,
        max_length: usize,
    ) {
        self.frees
            .lock()
            .expect("mutex poisoned")
            .push((handle, max_length));
    }
}

/// 以记录型 Arena 组装分配器。
pub fn recording_allocator(
    origin: RegionOrigin,
) -> (Arc<RecordingArena>, PooledBufAllocator<RecordingArena>) {
    let arena = RecordingArena::new(origin);
    let allocator = PooledBufAllocator::with_arena(Arc::clone(&arena), &ArenaConfig::default())
        .expect("默认配置合法");
    (arena, allocator)
}

/// 按索引对 251 取模生成的样例负载，避免周期与 2 的幂对齐。
pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}
