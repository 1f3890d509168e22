//! 根缓冲共享的原子引用计数。
//!
//! 归零检测使用“比较并递减”循环而非 `fetch_sub`：计数为 0 时拒绝继续递减，
//! 保证并发释放时恰好一个线程观察到 `1 → 0` 并执行回收。

#[cfg(loom)]
use loom::sync::atomic::{AtomicUsize, Ordering};
#[cfg(not(loom))]
use std::sync::atomic::{AtomicUsize, Ordering};

/// 新外壳或重用外壳的基线计数：创建者持有一份引用。
const BASELINE: usize = 1;

pub(crate) struct RefCnt {
    count: AtomicUsize,
}

impl RefCnt {
    pub(crate) fn new() -> Self {
        Self {
            count: AtomicUsize::new(BASELINE),
        }
    }

    pub(crate) fn get(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    /// 外壳重新发放前复位到基线。
    pub(crate) fn reset(&self) {
        self.count.store(BASELINE, Ordering::Release);
    }

    /// 增加一份引用。计数为 0 说明对象已被回收，属于引用计数缺陷。
    pub(crate) fn retain(&self) {
        let mut current = self.count.load(Ordering::Acquire);
        loop {
            assert!(current != 0, "对已释放的缓冲执行 retain");
            match self.count.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return,
                Err(actual) => current = actual,
            }
        }
    }

    /// 释放一份引用；当且仅当本次调用完成 `1 → 0` 时返回 `true`。
    pub(crate) fn release(&self) -> bool {
        let mut current = self.count.load(Ordering::Acquire);
        loop {
            assert!(current != 0, "引用计数已经归零，重复释放");
            match self.count.compare_exchange_weak(
                current,
                current - 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return current == 1,
                Err(actual) => current = actual,
            }
        }
    }
}

#[cfg(all(test, not(loom)))]
mod tests {
    use super::*;
    use std::{
        sync::{Arc, atomic::AtomicUsize as StdAtomicUsize},
        thread,
    };

    #[test]
    fn release_reports_only_the_zero_transition() {
        let cnt = RefCnt::new();
        cnt.retain();
        assert_eq!(cnt.get(), 2);
        assert!(!cnt.release());
        assert!(cnt.release());
        assert_eq!(cnt.get(), 0);
        cnt.reset();
        assert_eq!(cnt.get(), 1);
    }

    #[test]
    #[should_panic(expected = "重复释放")]
    fn release_below_zero_is_fatal() {
        let cnt = RefCnt::new();
        assert!(cnt.release());
        cnt.release();
    }

    #[test]
    fn concurrent_release_fires_exactly_once() {
        const HOLDERS: usize = 16;
        let cnt = Arc::new(RefCnt::new());
        for _ in 1..HOLDERS {
            cnt.retain();
        }
        let fired = Arc::new(StdAtomicUsize::new(0));
        let workers: Vec<_> = (0..HOLDERS)
            .map(|_| {
                let cnt = Arc::clone(&cnt);
                let fired = Arc::clone(&fired);
                thread::spawn(move || {
                    if cnt.release() {
                        fired.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().expect("释放线程不应 panic");
        }
        assert_eq!(fired.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}
