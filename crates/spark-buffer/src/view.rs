use std::sync::Arc;

use crate::{
    buf::{ByteBuf, Cursors},
    channel::{BufWindow, GatheringChannel},
    error::{Result, check_range},
    shell::{BufCore, WindowMode},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ViewKind {
    /// 固定长度的子区间。
    Slice { length: usize },
    /// 与根缓冲同范围，容量随根缓冲变化。
    Duplicate,
}

/// `BufView` 是根缓冲的切片或副本视图。
///
/// # 设计背景（Why）
/// - 协议层经常需要把一段报文交给下游而不复制：视图与根缓冲共享内存，只持有自己的游标；
/// - 视图不拥有句柄，创建时为根缓冲增加一份引用，释放时归还这份引用，
///   内存何时归还 Arena 完全由根缓冲的引用计数决定。
///
/// # 契约说明（What）
/// - 切片的容量与容量上限都等于切片长度，游标初始为 `0..length`；
/// - 副本的容量跟随根缓冲的当前长度，游标与标记初始为根缓冲创建副本时的位置；
/// - 视图不能改变容量，写满后 [`ByteBuf::ensure_writable`] 返回错误。
pub struct BufView {
    core: Arc<BufCore>,
    adjustment: usize,
    kind: ViewKind,
    cursors: Cursors,
    released: bool,
}

impl BufView {
    pub(crate) fn slice(core: Arc<BufCore>, adjustment: usize, length: usize) -> Self {
        core.retain();
        Self {
            core,
            adjustment,
            kind: ViewKind::Slice { length },
            cursors: Cursors::new(0, length),
            released: false,
        }
    }

    pub(crate) fn duplicate(core: Arc<BufCore>, cursors: Cursors) -> Self {
        core.retain();
        Self {
            core,
            adjustment: 0,
            kind: ViewKind::Duplicate,
            cursors: cursors.marked_at_current(),
            released: false,
        }
    }

    /// 根缓冲当前的引用计数。
    pub fn ref_cnt(&self) -> usize {
        self.core.ref_cnt()
    }

    /// 归还本视图持有的引用；若本次释放触发了根缓冲回收则返回 `true`。
    pub fn release(mut self) -> bool {
        self.released = true;
        self.core.release_ref()
    }

    pub fn is_slice(&self) -> bool {
        matches!(self.kind, ViewKind::Slice { .. })
    }

    /// 视图起点在根缓冲中的索引。
    pub fn adjustment(&self) -> usize {
        self.adjustment
    }

    pub fn retained_slice(&self) -> Result<BufView> {
        self.retained_slice_at(self.reader_index(), self.readable_bytes())
    }

    /// 在本视图的 `[index, index + length)` 上再切一层，引用仍然记在根缓冲上。
    pub fn retained_slice_at(&self, index: usize, length: usize) -> Result<BufView> {
        check_range(index, length, self.capacity())?;
        self.core.check_index(self.adjustment + index, length)?;
        Ok(BufView::slice(
            Arc::clone(&self.core),
            self.adjustment + index,
            length,
        ))
    }

    pub fn retained_duplicate(&self) -> Result<BufView> {
        self.core.check_index(0, 0)?;
        self.core.retain();
        Ok(BufView {
            core: Arc::clone(&self.core),
            adjustment: self.adjustment,
            kind: self.kind,
            cursors: self.cursors().marked_at_current(),
            released: false,
        })
    }

    /// 覆盖本视图 `[index, index + length)` 的窗口。
    ///
    /// 根缓冲换绑内存后窗口失效，访问返回 [`BufferError::StaleWindow`](crate::BufferError::StaleWindow)。
    pub fn window(&self, index: usize, length: usize) -> Result<BufWindow<'_>> {
        check_range(index, length, self.capacity())?;
        self.core.window(self.adjustment, index, length)
    }

    /// 把本视图的 `[index, index + length)` 写往通道，不移动游标。
    pub fn get_bytes_to<C>(&self, index: usize, channel: &mut C, length: usize) -> Result<usize>
    where
        C: GatheringChannel + ?Sized,
    {
        check_range(index, length, self.capacity())?;
        self.core.transfer(
            self.adjustment + index,
            length,
            WindowMode::Duplicate,
            |window| window.drain_to(channel),
        )
    }

    /// 把可读字节写往通道，读指针按实际字节数前移。
    pub fn write_to<C>(&mut self, channel: &mut C, length: usize) -> Result<usize>
    where
        C: GatheringChannel + ?Sized,
    {
        self.check_readable(length)?;
        let written = self.get_bytes_to(self.reader_index(), channel, length)?;
        self.cursors_mut().reader += written;
        Ok(written)
    }
}

impl ByteBuf for BufView {
    fn capacity(&self) -> usize {
        match self.kind {
            ViewKind::Slice { length } => length,
            ViewKind::Duplicate => self.core.length(),
        }
    }

    fn max_capacity(&self) -> usize {
        match self.kind {
            ViewKind::Slice { length } => length,
            ViewKind::Duplicate => self.core.max_capacity(),
        }
    }

    fn cursors(&self) -> Cursors {
        let mut cursors = self.cursors;
        if self.kind == ViewKind::Duplicate {
            cursors.trim_to(self.capacity());
        }
        cursors
    }

    fn cursors_mut(&mut self) -> &mut Cursors {
        // 根缓冲可能已经收缩，副本的游标先截断到当前容量。
        if self.kind == ViewKind::Duplicate {
            let capacity = self.capacity();
            self.cursors.trim_to(capacity);
        }
        &mut self.cursors
    }

    fn get_bytes(&self, index: usize, dst: &mut [u8]) -> Result<()> {
        check_range(index, dst.len(), self.capacity())?;
        self.core.get_bytes(self.adjustment + index, dst)
    }

    fn set_bytes(&mut self, index: usize, src: &[u8]) -> Result<()> {
        check_range(index, src.len(), self.capacity())?;
        self.core.set_bytes(self.adjustment + index, src)
    }
}

impl Drop for BufView {
    fn drop(&mut self) {
        if !self.released {
            self.core.release_ref();
        }
    }
}

impl std::fmt::Debug for BufView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufView")
            .field("kind", &self.kind)
            .field("adjustment", &self.adjustment)
            .field("cursors", &self.cursors)
            .field("ref_cnt", &self.core.ref_cnt())
            .finish()
    }
}
