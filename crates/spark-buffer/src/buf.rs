//! 读写游标与基于游标的通用读写接口。

use bytes::{Buf, Bytes, BytesMut};

use crate::error::{BufferError, Result};

/// 容量小于该阈值时按 2 的幂翻倍扩容，之后按阈值步进。
pub const CALCULATE_THRESHOLD: usize = 4 * 1024 * 1024;
const MIN_GROWTH: usize = 64;

/// 读写游标与对应的标记位置。
///
/// 始终满足 `reader ≤ writer`；容量收缩时由 [`Cursors::trim_to`] 截断。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Cursors {
    pub reader: usize,
    pub writer: usize,
    pub marked_reader: usize,
    pub marked_writer: usize,
}

impl Cursors {
    pub(crate) fn new(reader: usize, writer: usize) -> Self {
        Self {
            reader,
            writer,
            marked_reader: 0,
            marked_writer: 0,
        }
    }

    /// 复制读写位置，并把标记设为当前位置。
    pub(crate) fn marked_at_current(self) -> Self {
        Self {
            marked_reader: self.reader,
            marked_writer: self.writer,
            ..self
        }
    }

    /// 把超出 `capacity` 的游标与标记截断到 `capacity`。
    pub fn trim_to(&mut self, capacity: usize) {
        self.reader = self.reader.min(capacity);
        self.writer = self.writer.min(capacity);
        self.marked_reader = self.marked_reader.min(capacity);
        self.marked_writer = self.marked_writer.min(capacity);
    }
}

/// 扩容目标：不超过阈值时从 64 开始翻倍，超过阈值后按阈值步进，结果不超过 `max_capacity`。
pub(crate) fn calculate_new_capacity(min_new_capacity: usize, max_capacity: usize) -> usize {
    debug_assert!(min_new_capacity <= max_capacity);
    if min_new_capacity == CALCULATE_THRESHOLD {
        return CALCULATE_THRESHOLD;
    }
    if min_new_capacity > CALCULATE_THRESHOLD {
        let stepped = min_new_capacity / CALCULATE_THRESHOLD * CALCULATE_THRESHOLD;
        return if stepped > max_capacity.saturating_sub(CALCULATE_THRESHOLD) {
            max_capacity
        } else {
            stepped + CALCULATE_THRESHOLD
        };
    }
    let mut new_capacity = MIN_GROWTH;
    while new_capacity < min_new_capacity {
        new_capacity <<= 1;
    }
    new_capacity.min(max_capacity)
}

mod sealed {
    pub trait Sealed {}

    impl Sealed for crate::PooledBuf {}
    impl Sealed for crate::BufView {}
}

/// `ByteBuf` 是根缓冲与视图共用的游标读写接口。
///
/// # 设计背景（Why）
/// - 根缓冲与视图只在“容量从哪里来、字节写到哪里”上不同，游标语义完全一致；
///   实现者只需提供容量与按索引访问，其余读写操作由默认方法给出。
///
/// # 契约说明（What）
/// - `get_*`/`set_*` 按绝对索引访问，不移动游标；`read_*`/`write_*` 从游标位置访问并前移；
/// - 越界访问返回 [`BufferError::OutOfBounds`]，可读不足返回 [`BufferError::InsufficientReadable`]；
/// - 所有失败都发生在修改游标之前。
///
/// 该 trait 已封闭，只由本 crate 的缓冲类型实现。
pub trait ByteBuf: sealed::Sealed {
    /// 当前容量。
    fn capacity(&self) -> usize;

    /// 容量上限。
    fn max_capacity(&self) -> usize;

    /// 当前游标与标记；副本视图返回截断到当前容量后的值。
    fn cursors(&self) -> Cursors;

    fn cursors_mut(&mut self) -> &mut Cursors;

    /// 把 `[index, index + dst.len())` 复制到 `dst`。
    fn get_bytes(&self, index: usize, dst: &mut [u8]) -> Result<()>;

    /// 把 `src` 写入 `[index, index + src.len())`。
    fn set_bytes(&mut self, index: usize, src: &[u8]) -> Result<()>;

    /// 保证至少还能写入 `min_writable` 字节。
    ///
    /// 默认实现不扩容：视图与根缓冲共享内存，无法独立改变容量。
    fn ensure_writable(&mut self, min_writable: usize) -> Result<()> {
        if min_writable <= self.writable_bytes() {
            return Ok(());
        }
        Err(BufferError::CapacityExceeded {
            writer_index: self.writer_index(),
            min_writable,
            max_capacity: self.capacity(),
        })
    }

    fn reader_index(&self) -> usize {
        self.cursors().reader
    }

    fn writer_index(&self) -> usize {
        self.cursors().writer
    }

    fn set_reader_index(&mut self, reader: usize) -> Result<()> {
        let writer = self.writer_index();
        if reader > writer {
            return Err(BufferError::OutOfBounds {
                index: reader,
                length: 0,
                capacity: writer,
            });
        }
        self.cursors_mut().reader = reader;
        Ok(())
    }

    fn set_writer_index(&mut self, writer: usize) -> Result<()> {
        let capacity = self.capacity();
        if writer < self.reader_index() || writer > capacity {
            return Err(BufferError::OutOfBounds {
                index: writer,
                length: 0,
                capacity,
            });
        }
        self.cursors_mut().writer = writer;
        Ok(())
    }

    fn set_index(&mut self, reader: usize, writer: usize) -> Result<()> {
        let capacity = self.capacity();
        if reader > writer || writer > capacity {
            return Err(BufferError::OutOfBounds {
                index: reader,
                length: writer.saturating_sub(reader),
                capacity,
            });
        }
        let cursors = self.cursors_mut();
        cursors.reader = reader;
        cursors.writer = writer;
        Ok(())
    }

    fn readable_bytes(&self) -> usize {
        let cursors = self.cursors();
        cursors.writer.saturating_sub(cursors.reader)
    }

    fn writable_bytes(&self) -> usize {
        self.capacity().saturating_sub(self.writer_index())
    }

    fn max_writable_bytes(&self) -> usize {
        self.max_capacity().saturating_sub(self.writer_index())
    }

    fn is_readable(&self) -> bool {
        self.readable_bytes() > 0
    }

    fn is_writable(&self) -> bool {
        self.writable_bytes() > 0
    }

    fn clear(&mut self) {
        let cursors = self.cursors_mut();
        cursors.reader = 0;
        cursors.writer = 0;
    }

    fn mark_reader_index(&mut self) {
        let cursors = self.cursors_mut();
        cursors.marked_reader = cursors.reader;
    }

    fn reset_reader_index(&mut self) -> Result<()> {
        let marked = self.cursors().marked_reader;
        self.set_reader_index(marked)
    }

    fn mark_writer_index(&mut self) {
        let cursors = self.cursors_mut();
        cursors.marked_writer = cursors.writer;
    }

    fn reset_writer_index(&mut self) -> Result<()> {
        let marked = self.cursors().marked_writer;
        self.set_writer_index(marked)
    }

    fn get_u8(&self, index: usize) -> Result<u8> {
        let mut byte = [0u8; 1];
        self.get_bytes(index, &mut byte)?;
        Ok(byte[0])
    }

    fn set_u8(&mut self, index: usize, value: u8) -> Result<()> {
        self.set_bytes(index, &[value])
    }

    fn get_u32(&self, index: usize) -> Result<u32> {
        let mut raw = [0u8; 4];
        self.get_bytes(index, &mut raw)?;
        Ok(u32::from_be_bytes(raw))
    }

    fn set_u32(&mut self, index: usize, value: u32) -> Result<()> {
        self.set_bytes(index, &value.to_be_bytes())
    }

    /// 可读字节不少于 `length`，否则返回 [`BufferError::InsufficientReadable`]。
    fn check_readable(&self, length: usize) -> Result<()> {
        let readable = self.readable_bytes();
        if length > readable {
            return Err(BufferError::InsufficientReadable {
                requested: length,
                readable,
            });
        }
        Ok(())
    }

    fn read_bytes(&mut self, dst: &mut [u8]) -> Result<()> {
        self.check_readable(dst.len())?;
        let reader = self.reader_index();
        self.get_bytes(reader, dst)?;
        self.cursors_mut().reader += dst.len();
        Ok(())
    }

    fn read_u8(&mut self) -> Result<u8> {
        let mut byte = [0u8; 1];
        self.read_bytes(&mut byte)?;
        Ok(byte[0])
    }

    fn read_u32(&mut self) -> Result<u32> {
        let mut raw = [0u8; 4];
        self.read_bytes(&mut raw)?;
        Ok(u32::from_be_bytes(raw))
    }

    fn skip_bytes(&mut self, length: usize) -> Result<()> {
        self.check_readable(length)?;
        self.cursors_mut().reader += length;
        Ok(())
    }

    /// 读出 `length` 字节为独立的 [`Bytes`]。
    fn read_to_bytes(&mut self, length: usize) -> Result<Bytes> {
        let mut out = BytesMut::zeroed(length);
        self.read_bytes(&mut out)?;
        Ok(out.freeze())
    }

    fn write_bytes(&mut self, src: &[u8]) -> Result<()> {
        self.ensure_writable(src.len())?;
        let writer = self.writer_index();
        self.set_bytes(writer, src)?;
        self.cursors_mut().writer += src.len();
        Ok(())
    }

    fn write_u8(&mut self, value: u8) -> Result<()> {
        self.write_bytes(&[value])
    }

    fn write_u32(&mut self, value: u32) -> Result<()> {
        self.write_bytes(&value.to_be_bytes())
    }

    /// 写入 `src` 的全部剩余内容，返回写入的字节数。
    fn write_buf<B: Buf>(&mut self, mut src: B) -> Result<usize>
    where
        Self: Sized,
    {
        let total = src.remaining();
        self.ensure_writable(total)?;
        while src.has_remaining() {
            let chunk_len = {
                let chunk = src.chunk();
                self.write_bytes(chunk)?;
                chunk.len()
            };
            src.advance(chunk_len);
        }
        Ok(total)
    }

    /// 复制全部可读字节，不移动游标。
    fn to_vec(&self) -> Result<Vec<u8>> {
        let mut out = vec![0u8; self.readable_bytes()];
        self.get_bytes(self.reader_index(), &mut out)?;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn growth_doubles_below_the_threshold() {
        assert_eq!(calculate_new_capacity(1, 1 << 20), 64);
        assert_eq!(calculate_new_capacity(65, 1 << 20), 128);
        // 翻倍结果超过上限时取上限。
        assert_eq!(calculate_new_capacity(300, 400), 400);
        assert_eq!(
            calculate_new_capacity(CALCULATE_THRESHOLD, usize::MAX),
            CALCULATE_THRESHOLD
        );
    }

    #[test]
    fn growth_steps_by_threshold_above_it() {
        let max = 64 * CALCULATE_THRESHOLD;
        assert_eq!(
            calculate_new_capacity(CALCULATE_THRESHOLD + 1, max),
            2 * CALCULATE_THRESHOLD
        );
        assert_eq!(calculate_new_capacity(max - 1, max), max);
    }

    #[test]
    fn trim_clamps_cursors_and_marks() {
        let mut cursors = Cursors {
            reader: 10,
            writer: 40,
            marked_reader: 35,
            marked_writer: 50,
        };
        cursors.trim_to(20);
        assert_eq!(cursors, Cursors {
            reader: 10,
            writer: 20,
            marked_reader: 20,
            marked_writer: 20,
        });
    }
}
