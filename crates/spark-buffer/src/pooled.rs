use std::sync::Arc;

use tracing::debug;

use crate::{
    arena::Handle,
    buf::{ByteBuf, Cursors, calculate_new_capacity},
    channel::{BufWindow, GatheringChannel, PositionalChannel, ScatteringChannel, Transferred},
    error::{BufferError, ChannelError, Result},
    shell::{BufCore, WindowMode},
    view::BufView,
};

/// `PooledBuf` 是绑定 Arena 内存的根缓冲。
///
/// # 设计背景（Why）
/// - 高频网络 I/O 下，每次收发都向系统申请内存会带来明显的分配抖动；根缓冲从 Arena 取得内存，
///   释放时把内存交还 Arena、把外壳交还回收池，稳态下不再触发系统分配；
/// - 容量调整优先在 Arena 预留的 `max_length` 内原地完成，只有跨越尺寸等级时才复制。
///
/// # 逻辑解析（How）
/// - 引用计数与内存绑定保存在共享的外壳中，视图持有同一外壳并在创建时增加一份引用；
/// - 游标只属于当前句柄，根缓冲与每个视图各自维护；
/// - `Drop` 或 [`PooledBuf::release`] 释放本句柄持有的引用，计数归零时回收。
///
/// # 契约说明（What）
/// - 句柄本身不是并发写安全的：游标与容量修改需要 `&mut self`；
/// - 引用计数跨线程安全，多个持有者并发释放时恰好一个线程执行回收；
/// - 绑定期间满足 `length ≤ max_length ≤ max_capacity`。
///
/// # 示例
/// ```rust
/// use spark_buffer::{ArenaConfig, ByteBuf, PooledBufAllocator};
///
/// let allocator = PooledBufAllocator::new(ArenaConfig::default()).unwrap();
/// let mut buf = allocator.buffer(16).unwrap();
/// buf.write_bytes(b"spark").unwrap();
/// let slice = buf.retained_slice().unwrap();
/// assert_eq!(buf.ref_cnt(), 2);
/// assert_eq!(slice.to_vec().unwrap(), b"spark");
/// ```
pub struct PooledBuf {
    core: Arc<BufCore>,
    cursors: Cursors,
    released: bool,
}

impl PooledBuf {
    pub(crate) fn from_core(core: Arc<BufCore>) -> Self {
        Self {
            core,
            cursors: Cursors::default(),
            released: false,
        }
    }

    /// 根缓冲当前的引用计数。
    pub fn ref_cnt(&self) -> usize {
        self.core.ref_cnt()
    }

    /// 释放本句柄持有的引用；若本次释放触发了回收则返回 `true`。
    pub fn release(mut self) -> bool {
        self.released = true;
        self.core.release_ref()
    }

    pub fn handle(&self) -> Option<Handle> {
        self.core.binding().read_recursive().handle()
    }

    /// 在区域内的起始偏移。
    pub fn offset(&self) -> usize {
        self.core.binding().read_recursive().offset()
    }

    /// Arena 为当前句柄预留的长度（已截断到 `max_capacity`）。
    pub fn max_length(&self) -> usize {
        self.core.binding().read_recursive().max_length()
    }

    /// 后备区域是否来自池化分块。
    pub fn is_pooled(&self) -> bool {
        self.core
            .binding()
            .read_recursive()
            .region()
            .is_some_and(|region| region.is_pooled())
    }

    /// 无需重新分配即可写入的字节数：`min(max_length, max_capacity) - writer_index`。
    pub fn max_fast_writable_bytes(&self) -> usize {
        let binding = self.core.binding().read_recursive();
        binding
            .max_length()
            .min(binding.max_capacity())
            .saturating_sub(self.cursors.writer)
    }

    /// 调整容量。
    ///
    /// # 逻辑解析（How）
    /// 1. 与当前长度相同：只做可访问性检查；
    /// 2. 超过 `max_capacity`：返回 [`BufferError::InvalidCapacity`]，状态不变；
    /// 3. 池化区域：不超过 `max_length` 的增长原地完成；收缩后仍大于 `max_length / 2`，且
    ///    `max_length > 512` 或新容量大于 `max_length - 16` 时原地完成；
    /// 4. 其余情况向 Arena 申请新内存，复制 `min(new_capacity, 旧长度)` 字节并归还旧句柄。
    ///
    /// 收缩后超出新容量的游标与标记被截断。
    pub fn set_capacity(&mut self, new_capacity: usize) -> Result<&mut Self> {
        self.core.resize(new_capacity)?;
        self.cursors.trim_to(new_capacity);
        Ok(self)
    }

    /// 覆盖全部可读字节的切片视图。
    pub fn retained_slice(&self) -> Result<BufView> {
        self.retained_slice_at(self.cursors.reader, self.readable_bytes())
    }

    /// 覆盖 `[index, index + length)` 的切片视图，根缓冲引用计数加一。
    pub fn retained_slice_at(&self, index: usize, length: usize) -> Result<BufView> {
        self.core.check_index(index, length)?;
        Ok(BufView::slice(Arc::clone(&self.core), index, length))
    }

    /// 覆盖全部容量、游标独立的副本视图，根缓冲引用计数加一。
    pub fn retained_duplicate(&self) -> Result<BufView> {
        self.core.check_index(0, 0)?;
        Ok(BufView::duplicate(Arc::clone(&self.core), self.cursors))
    }

    /// 覆盖 `[index, index + length)` 的窗口，与缓冲共享内存。
    ///
    /// 窗口借用本缓冲；容量调整导致内存换绑后，窗口的访问返回 [`BufferError::StaleWindow`]。
    pub fn window(&self, index: usize, length: usize) -> Result<BufWindow<'_>> {
        self.core.window(0, index, length)
    }

    /// 组成可读区域的窗口数量；池化缓冲始终是一段连续内存。
    pub fn window_count(&self) -> usize {
        1
    }

    pub fn is_contiguous(&self) -> bool {
        true
    }

    /// 从通道读取至多 `length` 字节写入 `writer_index`，写指针按实际字节数前移。
    ///
    /// 通道已关闭时返回 [`Transferred::Closed`]，游标保持不变。
    pub fn read_from<C>(&mut self, channel: &mut C, length: usize) -> Result<Transferred>
    where
        C: ScatteringChannel + ?Sized,
    {
        self.ensure_writable(length)?;
        let transferred = self.set_bytes_from(self.cursors.writer, channel, length)?;
        self.cursors.writer += transferred.bytes();
        Ok(transferred)
    }

    /// 以通道的绝对位置 `position` 为起点读取，语义同 [`PooledBuf::read_from`]。
    pub fn read_from_at<C>(
        &mut self,
        channel: &mut C,
        position: u64,
        length: usize,
    ) -> Result<Transferred>
    where
        C: PositionalChannel + ?Sized,
    {
        self.ensure_writable(length)?;
        let transferred = self.set_bytes_from_at(self.cursors.writer, channel, position, length)?;
        self.cursors.writer += transferred.bytes();
        Ok(transferred)
    }

    /// 从通道读取至多 `length` 字节写入 `index`，不移动游标。
    pub fn set_bytes_from<C>(
        &mut self,
        index: usize,
        channel: &mut C,
        length: usize,
    ) -> Result<Transferred>
    where
        C: ScatteringChannel + ?Sized,
    {
        inbound(
            self.core
                .transfer(index, length, WindowMode::Cached, |window| {
                    window.fill_from(channel)
                }),
        )
    }

    pub fn set_bytes_from_at<C>(
        &mut self,
        index: usize,
        channel: &mut C,
        position: u64,
        length: usize,
    ) -> Result<Transferred>
    where
        C: PositionalChannel + ?Sized,
    {
        inbound(
            self.core
                .transfer(index, length, WindowMode::Cached, |window| {
                    window.fill_from_at(channel, position)
                }),
        )
    }

    /// 把 `reader_index` 起的至多 `length` 字节写往通道，读指针按实际字节数前移。
    ///
    /// `length` 超过可读字节时返回 [`BufferError::InsufficientReadable`]。
    pub fn write_to<C>(&mut self, channel: &mut C, length: usize) -> Result<usize>
    where
        C: GatheringChannel + ?Sized,
    {
        self.check_readable(length)?;
        let written = self
            .core
            .transfer(self.cursors.reader, length, WindowMode::Cached, |window| {
                window.drain_to(channel)
            })?;
        self.cursors.reader += written;
        Ok(written)
    }

    pub fn write_to_at<C>(&mut self, channel: &mut C, position: u64, length: usize) -> Result<usize>
    where
        C: PositionalChannel + ?Sized,
    {
        self.check_readable(length)?;
        let written = self
            .core
            .transfer(self.cursors.reader, length, WindowMode::Cached, |window| {
                window.drain_to_at(channel, position)
            })?;
        self.cursors.reader += written;
        Ok(written)
    }

    /// 把 `[index, index + length)` 写往通道，不移动游标也不扰动缓存窗口。
    pub fn get_bytes_to<C>(&self, index: usize, channel: &mut C, length: usize) -> Result<usize>
    where
        C: GatheringChannel + ?Sized,
    {
        self.core
            .transfer(index, length, WindowMode::Duplicate, |window| {
                window.drain_to(channel)
            })
    }

    pub fn get_bytes_to_at<C>(
        &self,
        index: usize,
        channel: &mut C,
        position: u64,
        length: usize,
    ) -> Result<usize>
    where
        C: PositionalChannel + ?Sized,
    {
        self.core
            .transfer(index, length, WindowMode::Duplicate, |window| {
                window.drain_to_at(channel, position)
            })
    }

    #[cfg(test)]
    pub(crate) fn core(&self) -> &Arc<BufCore> {
        &self.core
    }
}

/// 入站方向只把“通道已关闭”转换为 [`Transferred::Closed`]，其余错误原样传播。
fn inbound(result: Result<usize>) -> Result<Transferred> {
    match result {
        Ok(read) => Ok(Transferred::Bytes(read)),
        Err(BufferError::Channel(ChannelError::Closed)) => {
            debug!("inbound transfer hit a closed channel");
            Ok(Transferred::Closed)
        }
        Err(err) => Err(err),
    }
}

impl ByteBuf for PooledBuf {
    fn capacity(&self) -> usize {
        self.core.length()
    }

    fn max_capacity(&self) -> usize {
        self.core.max_capacity()
    }

    fn cursors(&self) -> Cursors {
        self.cursors
    }

    fn cursors_mut(&mut self) -> &mut Cursors {
        &mut self.cursors
    }

    fn get_bytes(&self, index: usize, dst: &mut [u8]) -> Result<()> {
        self.core.get_bytes(index, dst)
    }

    fn set_bytes(&mut self, index: usize, src: &[u8]) -> Result<()> {
        self.core.set_bytes(index, src)
    }

    /// 可写空间不足时扩容：预留空间足够则直接用满 `max_length`，否则按增长曲线计算目标容量。
    fn ensure_writable(&mut self, min_writable: usize) -> Result<()> {
        if min_writable <= self.writable_bytes() {
            return Ok(());
        }
        let writer_index = self.cursors.writer;
        let max_capacity = self.max_capacity();
        let target = writer_index
            .checked_add(min_writable)
            .filter(|target| *target <= max_capacity)
            .ok_or(BufferError::CapacityExceeded {
                writer_index,
                min_writable,
                max_capacity,
            })?;
        let fast_writable = self.max_fast_writable_bytes();
        let new_capacity = if fast_writable >= min_writable {
            writer_index + fast_writable
        } else {
            calculate_new_capacity(target, max_capacity)
        };
        self.set_capacity(new_capacity)?;
        Ok(())
    }
}

impl Drop for PooledBuf {
    fn drop(&mut self) {
        if !self.released {
            self.core.release_ref();
        }
    }
}

impl std::fmt::Debug for PooledBuf {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledBuf")
            .field("binding", &*self.core.binding().read_recursive())
            .field("cursors", &self.cursors)
            .field("ref_cnt", &self.core.ref_cnt())
            .finish()
    }
}
