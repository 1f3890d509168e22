use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};

use thiserror::Error;
use tracing::debug;

/// 构造选择器失败的原因。
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChooserError {
    /// 执行器集合为空，无从选择。
    #[error("执行器集合不能为空")]
    Empty,
}

impl ChooserError {
    /// 返回稳定错误码。
    pub fn code(&self) -> &'static str {
        match self {
            ChooserError::Empty => "eventloop.empty_executors",
        }
    }
}

/// 选择器根据执行器数量采用的索引算法。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChooserKind {
    /// 数量为 2 的幂，计数器与 `len - 1` 按位与。
    PowerOfTwo,
    /// 其它数量，64 位有符号计数器对 `len` 取模后取绝对值。
    Generic,
}

enum Counter {
    PowerOfTwo { next: AtomicUsize, mask: usize },
    Generic { next: AtomicI64, len: i64 },
}

impl Counter {
    fn next_index(&self) -> usize {
        match self {
            Counter::PowerOfTwo { next, mask } => next.fetch_add(1, Ordering::Relaxed) & mask,
            // 原子加法在溢出时回绕为负数，取绝对值后索引仍落在 `[0, len)` 内。
            Counter::Generic { next, len } => {
                let raw = next.fetch_add(1, Ordering::Relaxed);
                (raw % len).unsigned_abs() as usize
            }
        }
    }
}

/// 以轮询方式在一组执行器之间分派工作。
///
/// # 设计背景（Why）
/// - 连接建立的频率远高于执行器集合变化的频率，选择路径只做一次原子自增，不持有任何锁；
/// - 执行器数量为 2 的幂时以位与替代取模。
///
/// # 契约说明（What）
/// - 构造时拒绝空集合，之后 [`ExecutorChooser::next`] 永不失败；
/// - 单线程调用时严格按 `0, 1, …, len-1, 0, …` 的顺序返回；
/// - 并发调用时每次自增都对应一次选择，整体分布保持均匀，但不保证调用方观察到的相对顺序；
/// - 通用算法的计数器为 64 位，实践中不会到达回绕点；即便回绕，返回的索引依然合法。
///
/// # 示例
/// ```rust
/// use spark_eventloop::{ChooserKind, ExecutorChooser};
///
/// let chooser = ExecutorChooser::new(vec!["a", "b", "c"]).unwrap();
/// assert_eq!(chooser.kind(), ChooserKind::Generic);
/// let picked: Vec<_> = (0..4).map(|_| *chooser.next()).collect();
/// assert_eq!(picked, ["a", "b", "c", "a"]);
/// ```
pub struct ExecutorChooser<E> {
    executors: Box<[E]>,
    counter: Counter,
}

impl<E> ExecutorChooser<E> {
    pub fn new(executors: Vec<E>) -> Result<Self, ChooserError> {
        Self::starting_at(executors, 0)
    }

    fn starting_at(executors: Vec<E>, start: u64) -> Result<Self, ChooserError> {
        let len = executors.len();
        if len == 0 {
            return Err(ChooserError::Empty);
        }
        let counter = if len.is_power_of_two() {
            Counter::PowerOfTwo {
                next: AtomicUsize::new(start as usize),
                mask: len - 1,
            }
        } else {
            Counter::Generic {
                next: AtomicI64::new(start as i64),
                len: len as i64,
            }
        };
        let chooser = Self {
            executors: executors.into_boxed_slice(),
            counter,
        };
        debug!(executors = len, kind = ?chooser.kind(), "executor chooser created");
        Ok(chooser)
    }

    /// 返回下一个执行器。
    pub fn next(&self) -> &E {
        &self.executors[self.counter.next_index()]
    }

    pub fn kind(&self) -> ChooserKind {
        match self.counter {
            Counter::PowerOfTwo { .. } => ChooserKind::PowerOfTwo,
            Counter::Generic { .. } => ChooserKind::Generic,
        }
    }

    pub fn executors(&self) -> &[E] {
        &self.executors
    }
}

impl<E> std::fmt::Debug for ExecutorChooser<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutorChooser")
            .field("executors", &self.executors.len())
            .field("kind", &self.kind())
            .finish()
    }
}
