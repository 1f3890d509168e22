use std::io;

use thiserror::Error;

/// 稳定错误码，沿用 `<领域>.<语义>` 的命名约定，便于日志与告警按码聚合。
pub mod codes {
    /// 新容量超过 `max_capacity`。
    pub const BUFFER_INVALID_CAPACITY: &str = "buffer.invalid_capacity";
    /// 写入所需空间无法在 `max_capacity` 内满足。
    pub const BUFFER_CAPACITY_EXCEEDED: &str = "buffer.capacity_exceeded";
    /// 索引或长度越出当前容量。
    pub const BUFFER_OUT_OF_BOUNDS: &str = "buffer.out_of_bounds";
    /// 可读字节不足。
    pub const BUFFER_INSUFFICIENT_READABLE: &str = "buffer.insufficient_readable";
    /// 访问已释放的缓冲。
    pub const BUFFER_USE_AFTER_RELEASE: &str = "buffer.use_after_release";
    /// 窗口创建后缓冲已换绑或改变容量。
    pub const BUFFER_STALE_WINDOW: &str = "buffer.stale_window";
    /// Arena 拒绝继续分配。
    pub const ARENA_EXHAUSTED: &str = "arena.exhausted";
    /// 通道已关闭。
    pub const CHANNEL_CLOSED: &str = "channel.closed";
    /// 通道底层 I/O 失败。
    pub const CHANNEL_IO: &str = "channel.io";
    /// 配置非法。
    pub const CONFIG_INVALID: &str = "config.invalid";
}

/// 外部通道在一次传输中报告的失败。
///
/// # 契约说明（What）
/// - `Closed`：通道已经关闭。仅在“通道 → 缓冲”方向被转换为 [`Transferred::Closed`](crate::Transferred)，
///   其余方向原样向上传播；
/// - `Io`：其它任何底层错误，始终传播给调用方。
#[derive(Debug, Error)]
pub enum ChannelError {
    /// 通道已关闭，无法继续传输。
    #[error("通道已关闭")]
    Closed,
    /// 底层 I/O 失败。
    #[error("通道 I/O 失败: {0}")]
    Io(#[from] io::Error),
}

impl ChannelError {
    /// 返回稳定错误码。
    pub fn code(&self) -> &'static str {
        match self {
            ChannelError::Closed => codes::CHANNEL_CLOSED,
            ChannelError::Io(_) => codes::CHANNEL_IO,
        }
    }
}

/// 池化缓冲层对外暴露的统一错误域。
///
/// # 设计背景（Why）
/// - 校验类错误（容量、越界）必须在修改任何状态之前返回，调用方可以换用合法参数重试；
/// - `UseAfterRelease` 只会在引用计数出现缺陷时出现，调用方不应尝试恢复，而应修复上游的持有逻辑。
///
/// # 契约说明（What）
/// - 每个变体都可通过 [`BufferError::code`] 映射为 [`codes`] 中的稳定错误码；
/// - 通道失败通过 `#[from]` 自动包装，保留原始 `io::Error` 作为 `source`。
#[derive(Debug, Error)]
pub enum BufferError {
    /// 新容量超出 `max_capacity`，状态保持不变。
    #[error("非法容量 {requested}：上限为 {max_capacity}")]
    InvalidCapacity {
        requested: usize,
        max_capacity: usize,
    },
    /// 写指针加上最小可写字节数超出 `max_capacity`。
    #[error("无法扩容：writer_index {writer_index} + {min_writable} 超过上限 {max_capacity}")]
    CapacityExceeded {
        writer_index: usize,
        min_writable: usize,
        max_capacity: usize,
    },
    /// 访问区间 `[index, index + length)` 不在 `[0, capacity)` 内。
    #[error("访问越界：index {index}，length {length}，capacity {capacity}")]
    OutOfBounds {
        index: usize,
        length: usize,
        capacity: usize,
    },
    /// 可读字节不足。
    #[error("可读字节不足：请求 {requested}，剩余 {readable}")]
    InsufficientReadable { requested: usize, readable: usize },
    /// 缓冲已经释放，句柄失效。
    #[error("缓冲已释放，禁止继续访问")]
    UseAfterRelease,
    /// 窗口创建之后，缓冲的内存已被换绑、调整容量或释放，窗口不再指向本缓冲的字节。
    #[error("窗口已失效：缓冲的内存绑定已改变")]
    StaleWindow,
    /// Arena 已达到配置的分块上限。
    #[error("Arena 无法再分配 {requested} 字节：分块数量已达上限")]
    ArenaExhausted { requested: usize },
    /// 通道传输失败。
    #[error(transparent)]
    Channel(#[from] ChannelError),
    /// 配置解析或校验失败。
    #[error("配置非法: {0}")]
    Config(String),
}

impl BufferError {
    /// 返回稳定错误码。
    pub fn code(&self) -> &'static str {
        match self {
            BufferError::InvalidCapacity { .. } => codes::BUFFER_INVALID_CAPACITY,
            BufferError::CapacityExceeded { .. } => codes::BUFFER_CAPACITY_EXCEEDED,
            BufferError::OutOfBounds { .. } => codes::BUFFER_OUT_OF_BOUNDS,
            BufferError::InsufficientReadable { .. } => codes::BUFFER_INSUFFICIENT_READABLE,
            BufferError::UseAfterRelease => codes::BUFFER_USE_AFTER_RELEASE,
            BufferError::StaleWindow => codes::BUFFER_STALE_WINDOW,
            BufferError::ArenaExhausted { .. } => codes::ARENA_EXHAUSTED,
            BufferError::Channel(err) => err.code(),
            BufferError::Config(_) => codes::CONFIG_INVALID,
        }
    }
}

/// crate 内统一的结果别名。
pub type Result<T, E = BufferError> = core::result::Result<T, E>;

/// 校验 `[index, index + length)` 是否落在 `[0, capacity)` 内。
pub(crate) fn check_range(index: usize, length: usize, capacity: usize) -> Result<()> {
    match index.checked_add(length) {
        Some(end) if end <= capacity => Ok(()),
        _ => Err(BufferError::OutOfBounds {
            index,
            length,
            capacity,
        }),
    }
}
