use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use bytes::BytesMut;
use parking_lot::RwLock;

use crate::{
    channel::MemoryWindow,
    error::{Result, check_range},
};

static NEXT_REGION_ID: AtomicU64 = AtomicU64::new(1);

/// 区域来源标签：池化区域可以原地伸缩，非池化区域每次改变容量都需要重新分配。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RegionOrigin {
    Pooled,
    Unpooled,
}

/// `Region` 是 Arena 持有的一段连续后备内存。
///
/// # 设计背景（Why）
/// - 每个分配独占一个 `Region`：页内的小缓冲各自持有从页中切出的槽位区域，
///   一个缓冲上阻塞的通道传输不会占住其它缓冲的锁；
/// - 所有访问都经过带边界检查的方法完成，区域之外不暴露任何地址运算。
///
/// # 逻辑解析（How）
/// - 字节存放在 `parking_lot::RwLock<BytesMut>` 中：读路径并发共享，写路径与通道读取独占；
/// - 池化区域由 `BytesMut::split_to` 从分块中切出，与分块共享同一次堆分配；
///   相邻切片可以通过 [`Region::into_memory`] 取回后再用 `unsplit` 拼回原来的整页。
///
/// # 契约说明（What）
/// - `len()` 在区域生命周期内保持不变；
/// - `read_at`/`write_at` 越界时返回 [`BufferError::OutOfBounds`](crate::BufferError::OutOfBounds) 且不触碰内存。
pub struct Region {
    id: u64,
    origin: RegionOrigin,
    len: usize,
    memory: RwLock<BytesMut>,
}

impl Region {
    /// 以既有内存块构造区域。
    pub fn from_bytes(origin: RegionOrigin, memory: BytesMut) -> Arc<Self> {
        Arc::new(Self {
            id: NEXT_REGION_ID.fetch_add(1, Ordering::Relaxed),
            origin,
            len: memory.len(),
            memory: RwLock::new(memory),
        })
    }

    /// 分配一段清零的区域。
    pub fn zeroed(origin: RegionOrigin, len: usize) -> Arc<Self> {
        Self::from_bytes(origin, BytesMut::zeroed(len))
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn origin(&self) -> RegionOrigin {
        self.origin
    }

    pub fn is_pooled(&self) -> bool {
        self.origin == RegionOrigin::Pooled
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// 取回区域内存；调用方须持有该区域的唯一引用。
    pub(crate) fn into_memory(self) -> BytesMut {
        self.memory.into_inner()
    }

    /// 新建一个覆盖整个区域的窗口。
    pub(crate) fn window(self: &Arc<Self>) -> MemoryWindow {
        MemoryWindow::new(Arc::clone(self))
    }

    pub fn read_at(&self, offset: usize, dst: &mut [u8]) -> Result<()> {
        check_range(offset, dst.len(), self.len)?;
        let memory = self.memory.read();
        dst.copy_from_slice(&memory[offset..offset + dst.len()]);
        Ok(())
    }

    pub fn write_at(&self, offset: usize, src: &[u8]) -> Result<()> {
        check_range(offset, src.len(), self.len)?;
        let mut memory = self.memory.write();
        memory[offset..offset + src.len()].copy_from_slice(src);
        Ok(())
    }

    /// 在两个区域之间复制 `len` 字节；同一区域时使用 `copy_within`，避免重复加锁。
    pub fn copy_between(
        src: &Arc<Region>,
        src_offset: usize,
        dst: &Arc<Region>,
        dst_offset: usize,
        len: usize,
    ) -> Result<()> {
        check_range(src_offset, len, src.len)?;
        check_range(dst_offset, len, dst.len)?;
        if Arc::ptr_eq(src, dst) {
            let mut memory = src.memory.write();
            memory.copy_within(src_offset..src_offset + len, dst_offset);
            return Ok(());
        }
        // 按区域编号顺序加锁，两个方向相反的并发复制不会互相等待。
        let (from, mut to) = if src.id < dst.id {
            let from = src.memory.read();
            (from, dst.memory.write())
        } else {
            let to = dst.memory.write();
            (src.memory.read(), to)
        };
        to[dst_offset..dst_offset + len].copy_from_slice(&from[src_offset..src_offset + len]);
        Ok(())
    }

    /// 在读锁内以切片形式访问 `[start, end)`，调用方已完成边界检查。
    pub(crate) fn with_slice<R>(&self, start: usize, end: usize, f: impl FnOnce(&[u8]) -> R) -> R {
        let memory = self.memory.read();
        f(&memory[start..end])
    }

    /// 在写锁内以可变切片形式访问 `[start, end)`，调用方已完成边界检查。
    pub(crate) fn with_slice_mut<R>(
        &self,
        start: usize,
        end: usize,
        f: impl FnOnce(&mut [u8]) -> R,
    ) -> R {
        let mut memory = self.memory.write();
        f(&mut memory[start..end])
    }
}

impl std::fmt::Debug for Region {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Region")
            .field("id", &self.id)
            .field("origin", &self.origin)
            .field("len", &self.len)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn copy_between_handles_distinct_and_shared_regions() {
        let a = Region::zeroed(RegionOrigin::Pooled, 16);
        let b = Region::zeroed(RegionOrigin::Unpooled, 16);
        a.write_at(0, b"abcdef").unwrap();

        Region::copy_between(&a, 1, &b, 4, 3).unwrap();
        let mut out = [0u8; 3];
        b.read_at(4, &mut out).unwrap();
        assert_eq!(&out, b"bcd");

        Region::copy_between(&a, 0, &a, 8, 6).unwrap();
        let mut same = [0u8; 6];
        a.read_at(8, &mut same).unwrap();
        assert_eq!(&same, b"abcdef");
    }

    #[test]
    fn accessors_reject_out_of_range_offsets() {
        let region = Region::zeroed(RegionOrigin::Pooled, 4);
        assert!(region.write_at(2, b"xyz").is_err());
        assert!(region.read_at(5, &mut []).is_err());
        assert!(Region::copy_between(&region, 0, &region, 3, 2).is_err());
    }
}
