#![forbid(unsafe_code)]

//! `spark-buffer` 提供基于分块 Arena 的引用计数池化缓冲。
//!
//! # 模块定位（Why）
//! - 高频网络 I/O 下，每次收发都向系统申请内存会造成分配抖动；缓冲从 Arena 借用内存，
//!   释放时交还，稳态下不再触发系统分配；
//! - 协议层需要在不复制的前提下把报文片段交给下游，因此提供共享内存、转发引用计数的切片与副本视图。
//!
//! # 设计概要（How）
//! - [`arena`]：`Arena` 契约与默认的 [`ChunkedArena`]；
//! - [`PooledBuf`]：绑定 Arena 内存的根缓冲，实现容量伸缩策略、回收与通道桥接；
//! - [`BufView`]：切片/副本视图，创建时增加根缓冲的引用，释放时归还；
//! - [`shell`]：外壳回收池，外壳必须先 `reuse` 再 `init`，由类型状态保证；
//! - [`PooledBufAllocator`]：把上述组件组装为分配入口。
//!
//! # 命名约定（Consistency）
//! - `get_*`/`set_*` 按绝对索引访问且不移动游标，`read_*`/`write_*` 从游标位置访问并前移；
//! - 错误统一为 [`BufferError`]，稳定错误码见 [`error::codes`]。

pub mod arena;
mod allocator;
mod binding;
mod buf;
mod channel;
mod config;
pub mod error;
mod pooled;
mod refcnt;
pub mod shell;
mod view;

pub use allocator::PooledBufAllocator;
pub use arena::{Allocation, Arena, ArenaStats, ChunkedArena, Handle, Region, RegionOrigin};
pub use binding::{Binding, Released};
pub use buf::{ByteBuf, CALCULATE_THRESHOLD, Cursors};
pub use channel::{
    BufWindow, GatheringChannel, IoChannel, MemoryWindow, PositionalChannel, ScatteringChannel,
    Transferred,
};
pub use config::{
    ArenaConfig, DEFAULT_CHUNK_SIZE, DEFAULT_MAX_CAPACITY, DEFAULT_PAGE_SIZE,
    DEFAULT_SHELL_POOL_CAPACITY,
};
pub use error::{BufferError, ChannelError, Result};
pub use pooled::PooledBuf;
pub use view::BufView;
