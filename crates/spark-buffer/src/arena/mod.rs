//! Arena 契约与默认的分块实现。
//!
//! # 模块定位（Why）
//! - 缓冲层只依赖 [`Arena`] trait 的 `allocate`/`free`/`reallocate` 三个入口，
//!   不关心分块如何切分、尺寸等级如何划分；
//! - 默认实现 [`ChunkedArena`] 满足契约即可，测试中可以替换为记录调用的实现。

mod chunked;
mod region;

use std::sync::Arc;

use tracing::trace;

pub use chunked::{ArenaStats, ChunkedArena, SMALL_SIZE_THRESHOLD, SizeClass, TINY_QUANTUM};
pub use region::{Region, RegionOrigin};

use crate::{
    binding::Binding,
    channel::MemoryWindow,
    error::{BufferError, Result},
};

const SLOT_BITS: u32 = 20;
const SLOT_MASK: u64 = (1 << SLOT_BITS) - 1;
/// 一页最多能切出的槽位数，受句柄槽位字段宽度限制。
pub(crate) const MAX_PAGE_SLOTS: usize = SLOT_MASK as usize;

/// 定位 Arena 内某个内存块的不透明描述符。
///
/// 低 20 位保存“页内槽位 + 1”（0 表示整段区域），其余位保存区域编号。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Handle(u64);

impl Handle {
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn as_raw(self) -> u64 {
        self.0
    }

    /// 指向整段区域的句柄。
    pub fn whole(region_id: u64) -> Self {
        Self(region_id << SLOT_BITS)
    }

    /// 指向页内某个槽位的句柄。
    pub fn slot(region_id: u64, slot: u32) -> Self {
        debug_assert!(u64::from(slot) < SLOT_MASK);
        Self((region_id << SLOT_BITS) | (u64::from(slot) + 1))
    }

    pub fn region_id(self) -> u64 {
        self.0 >> SLOT_BITS
    }

    pub fn slot_index(self) -> Option<u32> {
        match self.0 & SLOT_MASK {
            0 => None,
            // 掩码保证不超过 20 位。
            raw => Some((raw - 1) as u32),
        }
    }
}

/// 一次成功分配的结果，交给外壳的 `init` 绑定。
///
/// - `offset + max_length ≤ region.len()`；
/// - `length ≤ max_length`，`max_length` 是 Arena 为该句柄预留的字节数。
#[derive(Debug)]
pub struct Allocation {
    pub region: Arc<Region>,
    pub handle: Handle,
    pub offset: usize,
    pub length: usize,
    pub max_length: usize,
}

/// `Arena` 描述池化缓冲消费的内存分配契约。
///
/// # 设计背景（Why）
/// - 缓冲的容量策略（原地伸缩、重新分配）与分块切分算法相互独立，以 trait 划出边界后，
///   缓冲层可以在不了解尺寸等级细节的前提下完成生命周期管理；
/// - 测试可以注入记录型实现，精确断言 `free` 的调用次数。
///
/// # 契约说明（What）
/// - **线程安全**：实现必须 `Send + Sync`，三个入口都可能被多个线程并发调用；
/// - `allocate`：返回的 [`Allocation`] 满足上文的区间约束；
/// - `free`：每个句柄恰好收到一次，调用后 Arena 可以把该块交给其它缓冲；
/// - `reallocate`：为 `binding` 换绑新内存，`preserve` 为真时复制 `min(new_capacity, 旧长度)` 字节，
///   并释放旧句柄一次。默认实现基于 `allocate` + `free`，一般无需覆写。
pub trait Arena: Send + Sync + 'static {
    fn allocate(&self, size: usize) -> Result<Allocation>;

    fn free(
        &self,
        region: Arc<Region>,
        transient: Option<MemoryWindow>,
        handle: Handle,
        max_length: usize,
    );

    fn reallocate(&self, binding: &mut Binding, new_capacity: usize, preserve: bool) -> Result<()> {
        if binding.handle().is_none() {
            return Err(BufferError::UseAfterRelease);
        }
        let allocation = self.allocate(new_capacity)?;
        let Some(old) = binding.rebind(allocation) else {
            return Err(BufferError::UseAfterRelease);
        };
        let copied = match binding.region() {
            Some(region) if preserve => Region::copy_between(
                &old.region,
                old.offset,
                region,
                binding.offset(),
                new_capacity.min(old.length),
            ),
            _ => Ok(()),
        };
        trace!(
            old_handle = old.handle.as_raw(),
            new_capacity,
            preserve,
            "buffer reallocated"
        );
        // 旧句柄无论复制是否成功都必须归还。
        self.free(old.region, old.transient, old.handle, old.max_length);
        copied
    }
}
