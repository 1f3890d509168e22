use serde::Deserialize;

use crate::{
    arena::{MAX_PAGE_SLOTS, TINY_QUANTUM},
    error::{BufferError, Result},
};

/// 默认页大小：8 KiB。
pub const DEFAULT_PAGE_SIZE: usize = 8 * 1024;
/// 默认分块大小：4 MiB。
pub const DEFAULT_CHUNK_SIZE: usize = 4 * 1024 * 1024;
/// 默认缓存的缓冲外壳数量。
pub const DEFAULT_SHELL_POOL_CAPACITY: usize = 4096;
/// 默认最大容量，与 32 位有符号整数上限对齐。
pub const DEFAULT_MAX_CAPACITY: usize = i32::MAX as usize;

/// `ArenaConfig` 描述 Arena 与外壳回收池的运行参数。
///
/// # 设计背景（Why）
/// - 页大小与分块大小决定尺寸等级的边界，需要在部署时按流量特征调整；
/// - 配置既可以在代码中通过 `with_*` 链式构造，也可以从 TOML 片段加载，便于与宿主配置文件合流。
///
/// # 契约说明（What）
/// - `page_size`：2 的幂且不小于 1 KiB；小于页大小的请求从页内切分槽位；
/// - `chunk_size`：2 的幂且为 `page_size` 的整数倍；大于分块的请求走非池化分配；
/// - `max_chunks`：可选的分块数量上限，超过时分配返回 [`BufferError::ArenaExhausted`]；
/// - `shell_pool_capacity`：回收池最多缓存的外壳数量，为 0 时不缓存；
/// - `default_max_capacity`：分配器未显式指定上限时使用的 `max_capacity`。
///
/// # 示例
/// ```rust
/// use spark_buffer::ArenaConfig;
///
/// let config = ArenaConfig::from_toml_str("page_size = 4096\nchunk_size = 65536").unwrap();
/// assert_eq!(config.page_size, 4096);
/// assert_eq!(config.chunk_size, 65536);
/// ```
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct ArenaConfig {
    pub page_size: usize,
    pub chunk_size: usize,
    pub max_chunks: Option<usize>,
    pub shell_pool_capacity: usize,
    pub default_max_capacity: usize,
}

impl Default for ArenaConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_chunks: None,
            shell_pool_capacity: DEFAULT_SHELL_POOL_CAPACITY,
            default_max_capacity: DEFAULT_MAX_CAPACITY,
        }
    }
}

impl ArenaConfig {
    /// 从 TOML 文本解析并校验配置，缺省字段取默认值。
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let config: ArenaConfig =
            toml::from_str(source).map_err(|err| BufferError::Config(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn with_max_chunks(mut self, max_chunks: usize) -> Self {
        self.max_chunks = Some(max_chunks);
        self
    }

    pub fn with_shell_pool_capacity(mut self, capacity: usize) -> Self {
        self.shell_pool_capacity = capacity;
        self
    }

    pub fn with_default_max_capacity(mut self, max_capacity: usize) -> Self {
        self.default_max_capacity = max_capacity;
        self
    }

    /// 校验字段之间的约束。
    pub fn validate(&self) -> Result<()> {
        if !self.page_size.is_power_of_two() || self.page_size < 1024 {
            return Err(BufferError::Config(format!(
                "page_size {} 必须是不小于 1024 的 2 的幂",
                self.page_size
            )));
        }
        // 最小槽位按 TINY_QUANTUM 切分，槽位编号必须放得进句柄。
        if self.page_size / TINY_QUANTUM > MAX_PAGE_SLOTS {
            return Err(BufferError::Config(format!(
                "page_size {} 过大：一页至多容纳 {} 个 {} 字节槽位",
                self.page_size, MAX_PAGE_SLOTS, TINY_QUANTUM
            )));
        }
        if !self.chunk_size.is_power_of_two() || self.chunk_size < self.page_size {
            return Err(BufferError::Config(format!(
                "chunk_size {} 必须是不小于 page_size {} 的 2 的幂",
                self.chunk_size, self.page_size
            )));
        }
        if self.max_chunks == Some(0) {
            return Err(BufferError::Config("max_chunks 不能为 0".into()));
        }
        if self.default_max_capacity == 0 {
            return Err(BufferError::Config("default_max_capacity 不能为 0".into()));
        }
        Ok(())
    }
}
