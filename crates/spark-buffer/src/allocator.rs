use std::sync::Arc;

use tracing::trace;

use crate::{
    arena::{Arena, ChunkedArena},
    config::ArenaConfig,
    error::{BufferError, Result},
    pooled::PooledBuf,
    shell::ShellPool,
};

/// `PooledBufAllocator` 把 Arena 与外壳回收池组装为缓冲分配入口。
///
/// # 逻辑解析（How）
/// 1. 校验初始容量不超过容量上限；
/// 2. 向 Arena 申请 `initial_capacity` 字节；
/// 3. 从回收池取出外壳，`reuse` 复位后以分配结果 `init`。
///
/// # 契约说明（What）
/// - `A` 默认为 [`ChunkedArena`]，测试或特殊部署可以注入其它 [`Arena`] 实现；
/// - 分配器可以跨线程共享，缓冲释放时内存与外壳自动回到各自的池。
pub struct PooledBufAllocator<A: Arena = ChunkedArena> {
    arena: Arc<A>,
    shells: Arc<ShellPool>,
    default_max_capacity: usize,
}

impl PooledBufAllocator<ChunkedArena> {
    /// 按配置构造默认的分块 Arena。
    pub fn new(config: ArenaConfig) -> Result<Self> {
        let arena = ChunkedArena::new(&config)?;
        Self::with_arena(Arc::new(arena), &config)
    }
}

impl<A: Arena> PooledBufAllocator<A> {
    /// 使用外部提供的 Arena，回收池容量与默认上限取自 `config`。
    pub fn with_arena(arena: Arc<A>, config: &ArenaConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            arena,
            shells: ShellPool::new(config.shell_pool_capacity),
            default_max_capacity: config.default_max_capacity,
        })
    }

    /// 以默认容量上限分配缓冲。
    pub fn buffer(&self, initial_capacity: usize) -> Result<PooledBuf> {
        self.buffer_with_max(initial_capacity, self.default_max_capacity)
    }

    /// 分配初始容量为 `initial_capacity`、上限为 `max_capacity` 的缓冲。
    pub fn buffer_with_max(&self, initial_capacity: usize, max_capacity: usize) -> Result<PooledBuf> {
        if initial_capacity > max_capacity {
            return Err(BufferError::InvalidCapacity {
                requested: initial_capacity,
                max_capacity,
            });
        }
        let allocation = self.arena.allocate(initial_capacity)?;
        trace!(
            initial_capacity,
            max_capacity,
            handle = allocation.handle.as_raw(),
            "pooled buffer issued"
        );
        let arena: Arc<dyn Arena> = self.arena.clone();
        Ok(self
            .shells
            .obtain()
            .reuse(max_capacity)
            .init(arena, allocation))
    }

    pub fn arena(&self) -> &Arc<A> {
        &self.arena
    }

    pub fn shells(&self) -> &Arc<ShellPool> {
        &self.shells
    }

    pub fn default_max_capacity(&self) -> usize {
        self.default_max_capacity
    }
}
