//! 复用就绪键集合的 selector 包装。

use std::time::Duration;

use tracing::trace;

/// 一次 select 写入的就绪键集合，底层是可复用的 `Vec`。
///
/// 集合只追加、整体清空，不做去重或删除，遍历顺序即写入顺序。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SelectedKeys<K> {
    keys: Vec<K>,
}

impl<K> SelectedKeys<K> {
    pub fn new() -> Self {
        Self { keys: Vec::new() }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            keys: Vec::with_capacity(capacity),
        }
    }

    pub fn add(&mut self, key: K) {
        self.keys.push(key);
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, K> {
        self.keys.iter()
    }

    pub fn as_slice(&self) -> &[K] {
        &self.keys
    }

    /// 清空集合，保留已分配的容量。
    pub fn reset(&mut self) {
        self.keys.clear();
    }
}

impl<K> Default for SelectedKeys<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a, K> IntoIterator for &'a SelectedKeys<K> {
    type Item = &'a K;
    type IntoIter = std::slice::Iter<'a, K>;

    fn into_iter(self) -> Self::IntoIter {
        self.keys.iter()
    }
}

/// 底层多路复用器的最小契约。
///
/// # 契约说明（What）
/// - `select` 阻塞至有事件、被唤醒或超时（`None` 表示不设超时），
///   `select_now` 立即返回；两者都把就绪键追加进 `selected` 并返回本次新增的数量；
/// - `wakeup` 让正在阻塞的 `select` 尽快返回，可以从其它线程调用。
pub trait Selector {
    type Key;
    type Error;

    fn select(
        &mut self,
        selected: &mut SelectedKeys<Self::Key>,
        timeout: Option<Duration>,
    ) -> Result<usize, Self::Error>;

    fn select_now(&mut self, selected: &mut SelectedKeys<Self::Key>)
    -> Result<usize, Self::Error>;

    fn wakeup(&self);
}

/// `KeySetSelector` 为被包装的 selector 持有一份复用的就绪键集合。
///
/// # 设计背景（Why）
/// - 事件循环每一轮都要遍历就绪键，集合在各轮之间复用，稳态下不再分配；
/// - 循环处理完一轮事件后可能来不及清理集合，包装层在每次 select 之前统一清空。
///
/// # 契约说明（What）
/// - 每次 `select`/`select_now` 先清空集合再委托，返回后 [`KeySetSelector::selected_keys`]
///   只包含本轮的就绪键；
/// - 委托失败时集合保持清空状态，错误原样返回。
pub struct KeySetSelector<S: Selector> {
    delegate: S,
    selected: SelectedKeys<S::Key>,
}

impl<S: Selector> KeySetSelector<S> {
    pub fn new(delegate: S) -> Self {
        Self {
            delegate,
            selected: SelectedKeys::new(),
        }
    }

    pub fn select(&mut self, timeout: Option<Duration>) -> Result<usize, S::Error> {
        self.selected.reset();
        let ready = self.delegate.select(&mut self.selected, timeout)?;
        trace!(ready, ?timeout, "selector returned");
        Ok(ready)
    }

    pub fn select_now(&mut self) -> Result<usize, S::Error> {
        self.selected.reset();
        let ready = self.delegate.select_now(&mut self.selected)?;
        trace!(ready, "selector polled");
        Ok(ready)
    }

    pub fn wakeup(&self) {
        self.delegate.wakeup();
    }

    pub fn selected_keys(&self) -> &SelectedKeys<S::Key> {
        &self.selected
    }

    pub fn delegate(&self) -> &S {
        &self.delegate
    }

    pub fn into_inner(self) -> S {
        self.delegate
    }
}

impl<S> std::fmt::Debug for KeySetSelector<S>
where
    S: Selector + std::fmt::Debug,
    S::Key: std::fmt::Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeySetSelector")
            .field("delegate", &self.delegate)
            .field("selected", &self.selected)
            .finish()
    }
}
