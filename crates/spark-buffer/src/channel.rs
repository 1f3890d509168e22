//! 缓冲与外部通道之间的零拷贝桥接。
//!
//! # 模块定位（Why）
//! - 缓冲的 I/O 入口不关心通道背后是 socket、文件还是内存管道，只依赖三个最小 trait：
//!   [`ScatteringChannel`]（通道 → 缓冲）、[`GatheringChannel`]（缓冲 → 通道）与
//!   [`PositionalChannel`]（带绝对位置的文件式通道）；
//! - [`MemoryWindow`] 是缓冲交给通道的临时视图：通道直接读写区域内存，不经过中间拷贝；
//! - [`BufWindow`] 是对外发放的窗口，借用所属缓冲，并在每次访问前确认绑定没有变化。
//!
//! # 契约说明（What）
//! - 通道返回的字节数可以小于请求长度，部分传输属于正常情况；
//! - 通道已关闭时返回 [`ChannelError::Closed`]，其余失败使用 [`ChannelError::Io`]。

use std::{
    io::{Read, Seek, SeekFrom, Write},
    sync::Arc,
};

use crate::{
    arena::Region,
    error::{BufferError, ChannelError, Result},
    shell::BufCore,
};

/// 通道 → 缓冲方向的分散读取。
pub trait ScatteringChannel {
    /// 读取至多 `dst.len()` 字节，返回实际读取的字节数；`Ok(0)` 表示当前没有数据。
    fn read(&mut self, dst: &mut [u8]) -> Result<usize, ChannelError>;
}

/// 缓冲 → 通道方向的聚合写出。
pub trait GatheringChannel {
    /// 写出至多 `src.len()` 字节，返回实际写出的字节数。
    fn write(&mut self, src: &[u8]) -> Result<usize, ChannelError>;
}

/// 以绝对位置寻址的通道，语义与 `pread`/`pwrite` 一致：不改变通道自身的位置。
pub trait PositionalChannel {
    fn read_at(&mut self, dst: &mut [u8], position: u64) -> Result<usize, ChannelError>;

    fn write_at(&mut self, src: &[u8], position: u64) -> Result<usize, ChannelError>;
}

/// 一次通道传输的结果。
///
/// `Closed` 只会出现在“通道 → 缓冲”方向，对应传统 API 中的 `-1` 哨兵值。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transferred {
    Bytes(usize),
    Closed,
}

impl Transferred {
    /// 以 `-1` 表示关闭的整数形式。
    pub fn as_isize(self) -> isize {
        match self {
            // 单次传输不超过 `max_capacity`，后者不超过 `isize::MAX`。
            Transferred::Bytes(n) => n as isize,
            Transferred::Closed => -1,
        }
    }

    pub fn bytes(self) -> usize {
        match self {
            Transferred::Bytes(n) => n,
            Transferred::Closed => 0,
        }
    }

    pub fn is_closed(self) -> bool {
        matches!(self, Transferred::Closed)
    }
}

/// 将任意 `std::io` 读写端适配为通道。
///
/// 调用 [`IoChannel::close`] 后，所有传输都返回 [`ChannelError::Closed`]。
///
/// # 示例
/// ```rust
/// use std::io::Cursor;
/// use spark_buffer::{IoChannel, ScatteringChannel, error::ChannelError};
///
/// let mut channel = IoChannel::new(Cursor::new(b"ping".to_vec()));
/// let mut dst = [0u8; 4];
/// assert_eq!(channel.read(&mut dst).unwrap(), 4);
/// channel.close();
/// assert!(matches!(channel.read(&mut dst), Err(ChannelError::Closed)));
/// ```
#[derive(Debug)]
pub struct IoChannel<T> {
    inner: Option<T>,
}

impl<T> IoChannel<T> {
    pub fn new(inner: T) -> Self {
        Self { inner: Some(inner) }
    }

    /// 关闭通道并丢弃底层读写端。
    pub fn close(&mut self) {
        self.inner = None;
    }

    pub fn is_open(&self) -> bool {
        self.inner.is_some()
    }

    pub fn get_ref(&self) -> Option<&T> {
        self.inner.as_ref()
    }

    pub fn into_inner(self) -> Option<T> {
        self.inner
    }

    fn open(&mut self) -> Result<&mut T, ChannelError> {
        self.inner.as_mut().ok_or(ChannelError::Closed)
    }
}

impl<T: Read> ScatteringChannel for IoChannel<T> {
    fn read(&mut self, dst: &mut [u8]) -> Result<usize, ChannelError> {
        Ok(self.open()?.read(dst)?)
    }
}

impl<T: Write> GatheringChannel for IoChannel<T> {
    fn write(&mut self, src: &[u8]) -> Result<usize, ChannelError> {
        Ok(self.open()?.write(src)?)
    }
}

impl<T: Read + Write + Seek> PositionalChannel for IoChannel<T> {
    fn read_at(&mut self, dst: &mut [u8], position: u64) -> Result<usize, ChannelError> {
        let inner = self.open()?;
        let saved = inner.stream_position()?;
        inner.seek(SeekFrom::Start(position))?;
        let read = inner.read(dst);
        inner.seek(SeekFrom::Start(saved))?;
        Ok(read?)
    }

    fn write_at(&mut self, src: &[u8], position: u64) -> Result<usize, ChannelError> {
        let inner = self.open()?;
        let saved = inner.stream_position()?;
        inner.seek(SeekFrom::Start(position))?;
        let written = inner.write(src);
        inner.seek(SeekFrom::Start(saved))?;
        Ok(written?)
    }
}

/// `MemoryWindow` 是区域内 `[position, limit)` 的可移动视图，供通道直接读写。
///
/// # 设计背景（Why）
/// - 每个缓冲懒创建并缓存一个窗口，重复 I/O 时只调整边界，不重复构造；
/// - 指定索引的非破坏性传输使用窗口副本，缓存窗口的位置不受影响。
///
/// # 契约说明（What）
/// - 窗口本身不跟踪缓冲的生命周期，因此读写入口只在 crate 内可见，并且只在持有绑定的传输期间使用；
///   crate 之外只能观察边界，例如 [`Arena::free`](crate::Arena::free) 收到的缓存窗口；
/// - 传输期间持有区域锁；每个分配独占一个区域，锁不会波及其它缓冲。
#[derive(Clone, Debug)]
pub struct MemoryWindow {
    region: Arc<Region>,
    position: usize,
    limit: usize,
}

impl MemoryWindow {
    pub(crate) fn new(region: Arc<Region>) -> Self {
        let limit = region.len();
        Self {
            region,
            position: 0,
            limit,
        }
    }

    /// 调整窗口边界，调用方保证 `start ≤ end ≤ region.len()`。
    pub(crate) fn set_bounds(&mut self, start: usize, end: usize) {
        debug_assert!(start <= end && end <= self.region.len());
        self.position = start;
        self.limit = end;
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn remaining(&self) -> usize {
        self.limit - self.position
    }

    pub fn has_remaining(&self) -> bool {
        self.position < self.limit
    }

    pub(crate) fn region(&self) -> &Arc<Region> {
        &self.region
    }

    /// 共享同一区域、位置独立的副本。
    pub(crate) fn duplicate(&self) -> Self {
        self.clone()
    }

    /// 复制 `[position, limit)` 的内容，不移动位置。
    pub(crate) fn to_vec(&self) -> Vec<u8> {
        self.region
            .with_slice(self.position, self.limit, <[u8]>::to_vec)
    }

    /// 读出至多 `dst.len()` 字节并前移位置。
    pub(crate) fn get(&mut self, dst: &mut [u8]) -> usize {
        let n = dst.len().min(self.remaining());
        self.region
            .with_slice(self.position, self.position + n, |src| {
                dst[..n].copy_from_slice(src)
            });
        self.position += n;
        n
    }

    /// 写入至多 `src.len()` 字节并前移位置。
    pub(crate) fn put(&mut self, src: &[u8]) -> usize {
        let n = src.len().min(self.remaining());
        self.region
            .with_slice_mut(self.position, self.position + n, |dst| {
                dst.copy_from_slice(&src[..n])
            });
        self.position += n;
        n
    }

    /// 由通道填充窗口剩余空间。
    pub(crate) fn fill_from<C>(&mut self, channel: &mut C) -> Result<usize, ChannelError>
    where
        C: ScatteringChannel + ?Sized,
    {
        let read = self
            .region
            .with_slice_mut(self.position, self.limit, |dst| channel.read(dst))?;
        Ok(self.advance(read))
    }

    /// 将窗口剩余内容写往通道。
    pub(crate) fn drain_to<C>(&mut self, channel: &mut C) -> Result<usize, ChannelError>
    where
        C: GatheringChannel + ?Sized,
    {
        let written = self
            .region
            .with_slice(self.position, self.limit, |src| channel.write(src))?;
        Ok(self.advance(written))
    }

    pub(crate) fn fill_from_at<C>(
        &mut self,
        channel: &mut C,
        position: u64,
    ) -> Result<usize, ChannelError>
    where
        C: PositionalChannel + ?Sized,
    {
        let read = self
            .region
            .with_slice_mut(self.position, self.limit, |dst| channel.read_at(dst, position))?;
        Ok(self.advance(read))
    }

    pub(crate) fn drain_to_at<C>(
        &mut self,
        channel: &mut C,
        position: u64,
    ) -> Result<usize, ChannelError>
    where
        C: PositionalChannel + ?Sized,
    {
        let written = self
            .region
            .with_slice(self.position, self.limit, |src| channel.write_at(src, position))?;
        Ok(self.advance(written))
    }

    // 通道报告的字节数不可信，截断到窗口剩余长度。
    fn advance(&mut self, n: usize) -> usize {
        let n = n.min(self.remaining());
        self.position += n;
        n
    }
}

/// `BufWindow` 是缓冲 `[index, index + length)` 上的可移动窗口，与缓冲共享内存。
///
/// # 设计背景（Why）
/// - 调用方有时需要把同一段缓冲交给多个通道分步读写，窗口保存了分步之间的位置；
/// - 窗口借用创建它的缓冲或视图，持有窗口期间无法释放该句柄，也无法通过它调整容量。
///
/// # 契约说明（What）
/// - 位置与边界以所属句柄的索引表示；
/// - 每次访问前核对绑定的代数：根缓冲换绑、调整容量或释放之后，窗口的访问返回
///   [`BufferError::StaleWindow`]，不会触碰已交还 Arena 的内存；
/// - 访问期间持有绑定的读锁，根缓冲的容量调整会等待访问结束。
///
/// # 示例
/// 窗口不能比缓冲活得更久：
/// ```compile_fail
/// use spark_buffer::{ArenaConfig, PooledBufAllocator};
///
/// let allocator = PooledBufAllocator::new(ArenaConfig::default()).unwrap();
/// let buf = allocator.buffer(16).unwrap();
/// let mut window = buf.window(0, 16).unwrap();
/// drop(buf);
/// window.put(b"late").unwrap();
/// ```
#[derive(Clone)]
pub struct BufWindow<'a> {
    core: &'a BufCore,
    generation: u64,
    adjustment: usize,
    position: usize,
    limit: usize,
}

impl<'a> BufWindow<'a> {
    pub(crate) fn new(
        core: &'a BufCore,
        generation: u64,
        adjustment: usize,
        index: usize,
        length: usize,
    ) -> Self {
        Self {
            core,
            generation,
            adjustment,
            position: index,
            limit: index + length,
        }
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn remaining(&self) -> usize {
        self.limit - self.position
    }

    pub fn has_remaining(&self) -> bool {
        self.position < self.limit
    }

    /// 位置独立、借用同一缓冲的副本。
    pub fn duplicate(&self) -> Self {
        self.clone()
    }

    /// 复制 `[position, limit)` 的内容，不移动位置。
    pub fn to_vec(&self) -> Result<Vec<u8>> {
        self.access(|window| window.to_vec()).map(|(bytes, _)| bytes)
    }

    /// 读出至多 `dst.len()` 字节并前移位置。
    pub fn get(&mut self, dst: &mut [u8]) -> Result<usize> {
        self.access_mut(|window| Ok(window.get(dst)))
    }

    /// 写入至多 `src.len()` 字节并前移位置。
    pub fn put(&mut self, src: &[u8]) -> Result<usize> {
        self.access_mut(|window| Ok(window.put(src)))
    }

    pub fn fill_from<C>(&mut self, channel: &mut C) -> Result<usize>
    where
        C: ScatteringChannel + ?Sized,
    {
        self.access_mut(|window| window.fill_from(channel))
    }

    pub fn drain_to<C>(&mut self, channel: &mut C) -> Result<usize>
    where
        C: GatheringChannel + ?Sized,
    {
        self.access_mut(|window| window.drain_to(channel))
    }

    pub fn fill_from_at<C>(&mut self, channel: &mut C, position: u64) -> Result<usize>
    where
        C: PositionalChannel + ?Sized,
    {
        self.access_mut(|window| window.fill_from_at(channel, position))
    }

    pub fn drain_to_at<C>(&mut self, channel: &mut C, position: u64) -> Result<usize>
    where
        C: PositionalChannel + ?Sized,
    {
        self.access_mut(|window| window.drain_to_at(channel, position))
    }

    fn access_mut(
        &mut self,
        op: impl FnOnce(&mut MemoryWindow) -> Result<usize, ChannelError>,
    ) -> Result<usize> {
        let (moved, position) = self.access(op)?;
        self.position = position;
        Ok(moved?)
    }

    /// 在绑定读锁内把窗口映射到区域上执行 `op`，返回结果与新的位置。
    fn access<R>(&self, op: impl FnOnce(&mut MemoryWindow) -> R) -> Result<(R, usize)> {
        let binding = self.core.binding().read_recursive();
        if binding.generation() != self.generation {
            return Err(BufferError::StaleWindow);
        }
        let region = binding.live_region()?;
        let base = binding.offset() + self.adjustment;
        let mut window = region.window();
        window.set_bounds(base + self.position, base + self.limit);
        let outcome = op(&mut window);
        Ok((outcome, window.position() - base))
    }
}

impl std::fmt::Debug for BufWindow<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufWindow")
            .field("generation", &self.generation)
            .field("position", &self.position)
            .field("limit", &self.limit)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::arena::RegionOrigin;

    #[test]
    fn windows_share_memory_but_not_positions() {
        let region = Region::zeroed(RegionOrigin::Pooled, 8);
        let mut window = region.window();
        window.set_bounds(2, 6);
        let mut copy = window.duplicate();

        assert_eq!(window.put(b"abcdef"), 4);
        assert_eq!(window.remaining(), 0);
        assert_eq!(copy.position(), 2);

        let mut out = [0u8; 8];
        assert_eq!(copy.get(&mut out), 4);
        assert_eq!(&out[..4], b"abcd");
    }

    #[test]
    fn fill_and_drain_move_bytes_through_io_channels() {
        let region = Region::zeroed(RegionOrigin::Pooled, 16);
        let mut inbound = IoChannel::new(Cursor::new(b"hello world".to_vec()));
        let mut window = region.window();
        window.set_bounds(0, 5);
        assert_eq!(window.fill_from(&mut inbound).unwrap(), 5);

        let mut outbound = IoChannel::new(Vec::<u8>::new());
        window.set_bounds(0, 5);
        assert_eq!(window.drain_to(&mut outbound).unwrap(), 5);
        assert_eq!(outbound.get_ref().map(Vec::as_slice), Some(&b"hello"[..]));
    }

    #[test]
    fn positional_transfers_leave_the_stream_position_alone() {
        let region = Region::zeroed(RegionOrigin::Unpooled, 4);
        let mut file = IoChannel::new(Cursor::new(b"0123456789".to_vec()));
        let mut window = region.window();
        assert_eq!(window.fill_from_at(&mut file, 6).unwrap(), 4);
        assert_eq!(window.to_vec(), Vec::<u8>::new());

        window.set_bounds(0, 4);
        assert_eq!(window.to_vec(), b"6789");
        assert_eq!(file.get_ref().map(Cursor::position), Some(0));
    }

    #[test]
    fn closed_channels_report_closed() {
        let region = Region::zeroed(RegionOrigin::Pooled, 4);
        let mut channel = IoChannel::new(Cursor::new(vec![1u8; 4]));
        channel.close();
        let err = region.window().fill_from(&mut channel).unwrap_err();
        assert!(matches!(err, ChannelError::Closed));
        assert_eq!(Transferred::Closed.as_isize(), -1);
        assert_eq!(Transferred::Bytes(7).as_isize(), 7);
    }
}
