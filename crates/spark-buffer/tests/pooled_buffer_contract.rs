//! `pooled_buffer_contract` 集成测试：聚焦 `PooledBuf` 的容量策略与引用计数契约。
//!
//! # 测试总览（Why）
//! - 校验原地增长、原地收缩与重新分配三条路径的选择边界；
//! - 校验视图转发引用计数、回收恰好发生一次；
//! - 以 `RecordingArena` 观察 `allocate`/`free` 调用，验证缓冲与 Arena 的协作协议。

mod common;

use std::{sync::Arc, thread};

use common::{RecordingArena, pattern, recording_allocator};
use spark_buffer::{BufferError, ByteBuf, PooledBuf, PooledBufAllocator, RegionOrigin};

/// 以预留长度 `max_length` 分配长度 `length` 的缓冲，并写满样例负载。
fn filled(
    arena: &RecordingArena,
    allocator: &PooledBufAllocator<RecordingArena>,
    length: usize,
    max_length: usize,
) -> PooledBuf {
    arena.reserve_next(max_length);
    let mut buf = allocator.buffer(length).expect("分配缓冲");
    buf.write_bytes(&pattern(length)).expect("写入样例负载");
    assert_eq!(buf.max_length(), max_length);
    buf
}

fn assert_invariant(buf: &PooledBuf) {
    assert!(buf.capacity() <= buf.max_length(), "length ≤ max_length");
    assert!(buf.max_length() <= buf.max_capacity(), "max_length ≤ max_capacity");
}

/// `max_length = 1024, length = 200` 时扩到 800 不复制、不重新分配。
#[test]
fn growth_within_reservation_is_in_place() {
    let (arena, allocator) = recording_allocator(RegionOrigin::Pooled);
    let mut buf = filled(&arena, &allocator, 200, 1024);
    let handle = buf.handle();

    buf.set_capacity(800).expect("原地增长");

    assert_eq!(buf.capacity(), 800);
    assert_eq!(buf.handle(), handle);
    assert_eq!(arena.allocations().len(), 1);
    assert!(arena.frees().is_empty());
    let mut prefix = vec![0u8; 200];
    buf.get_bytes(0, &mut prefix).unwrap();
    assert_eq!(prefix, pattern(200));
    assert_invariant(&buf);
}

/// `max_length = 600, length = 600` 时缩到 400：`400 > 300` 且 `600 > 512`，原地收缩。
#[test]
fn shrink_above_half_of_a_large_reservation_is_in_place() {
    let (arena, allocator) = recording_allocator(RegionOrigin::Pooled);
    let mut buf = filled(&arena, &allocator, 600, 600);
    let handle = buf.handle();

    buf.set_capacity(400).expect("原地收缩");

    assert_eq!(buf.capacity(), 400);
    assert_eq!(buf.handle(), handle);
    assert_eq!(buf.writer_index(), 400, "超出新容量的写指针被截断");
    assert!(arena.frees().is_empty());
    assert_eq!(buf.to_vec().unwrap(), pattern(400));
    assert_invariant(&buf);
}

/// `max_length = 300, length = 300` 时缩到 200：`300 ≤ 512` 且 `200 ≤ 284`，必须重新分配。
#[test]
fn shrink_of_a_small_reservation_reallocates_and_frees_once() {
    let (arena, allocator) = recording_allocator(RegionOrigin::Pooled);
    let mut buf = filled(&arena, &allocator, 300, 300);
    let old_handle = buf.handle().expect("缓冲已绑定");

    buf.set_capacity(200).expect("重新分配");

    let allocations = arena.allocations();
    assert_eq!(allocations.len(), 2);
    assert_eq!(allocations[1].0, 200);
    assert_eq!(arena.frees(), vec![(old_handle, 300)]);
    assert_ne!(buf.handle(), Some(old_handle));
    assert_eq!(buf.capacity(), 200);
    assert_eq!(buf.to_vec().unwrap(), pattern(200));
    assert_invariant(&buf);
}

/// 收缩幅度小于 16 字节时，即使预留长度不足 512 也原地完成。
#[test]
fn shrink_close_to_the_class_edge_stays_in_place() {
    let (arena, allocator) = recording_allocator(RegionOrigin::Pooled);
    let mut buf = filled(&arena, &allocator, 300, 300);
    buf.set_capacity(290).expect("原地收缩");
    assert_eq!(arena.allocations().len(), 1);
    assert!(arena.frees().is_empty());
}

/// 非池化区域的任何容量变化都走重新分配。
#[test]
fn unpooled_regions_always_reallocate() {
    let (arena, allocator) = recording_allocator(RegionOrigin::Unpooled);
    let mut buf = filled(&arena, &allocator, 100, 1024);
    assert!(!buf.is_pooled());

    buf.set_capacity(150).expect("重新分配");
    assert_eq!(arena.allocations().len(), 2);
    assert_eq!(arena.frees().len(), 1);
    assert_eq!(buf.to_vec().unwrap(), pattern(100));
}

/// 超出 `max_capacity` 的请求在修改任何状态前失败。
#[test]
fn capacity_above_maximum_is_rejected_without_side_effects() {
    let (arena, allocator) = recording_allocator(RegionOrigin::Pooled);
    let mut buf = allocator.buffer_with_max(16, 64).unwrap();
    buf.write_bytes(b"abc").unwrap();

    let err = buf.set_capacity(65).unwrap_err();
    assert!(matches!(
        err,
        BufferError::InvalidCapacity {
            requested: 65,
            max_capacity: 64
        }
    ));
    assert_eq!(err.code(), spark_buffer::error::codes::BUFFER_INVALID_CAPACITY);
    assert_eq!(buf.capacity(), 16);
    assert_eq!(buf.writer_index(), 3);
    assert_eq!(arena.allocations().len(), 1);

    buf.set_capacity(16).expect("相同容量是空操作");
    assert_eq!(arena.allocations().len(), 1);
}

/// `max_length` 超过 `max_capacity` 时被截断，保证不变式成立。
#[test]
fn reservation_is_clamped_to_the_maximum_capacity() {
    let (arena, allocator) = recording_allocator(RegionOrigin::Pooled);
    arena.reserve_next(4096);
    let buf = allocator.buffer_with_max(100, 1000).unwrap();
    assert_eq!(buf.max_length(), 1000);
    assert_eq!(buf.max_fast_writable_bytes(), 1000);
    assert_invariant(&buf);
}

/// 写入超出容量时优先用满预留长度，不触发重新分配。
#[test]
fn ensure_writable_prefers_the_reserved_tail() {
    let (arena, allocator) = recording_allocator(RegionOrigin::Pooled);
    let mut buf = filled(&arena, &allocator, 200, 1024);
    assert_eq!(buf.max_fast_writable_bytes(), 824);

    buf.write_bytes(&[0xAB; 300]).expect("原地扩容后写入");
    assert_eq!(buf.capacity(), 1024);
    assert_eq!(arena.allocations().len(), 1);

    buf.write_bytes(&[0xCD; 1000]).expect("超出预留后重新分配");
    assert_eq!(buf.capacity(), 2048);
    assert_eq!(arena.frees().len(), 1);
    assert_eq!(buf.get_u8(199).unwrap(), pattern(200)[199]);
    assert_eq!(buf.get_u8(499).unwrap(), 0xAB);
}

#[test]
fn writes_beyond_the_maximum_fail() {
    let (_arena, allocator) = recording_allocator(RegionOrigin::Pooled);
    let mut buf = allocator.buffer_with_max(4, 8).unwrap();
    buf.write_bytes(b"12345678").unwrap();
    let err = buf.write_u8(9).unwrap_err();
    assert!(matches!(
        err,
        BufferError::CapacityExceeded {
            writer_index: 8,
            min_writable: 1,
            max_capacity: 8
        }
    ));
}

/// 切片使根引用计数加一，释放切片只减计数，不直接调用 Arena。
#[test]
fn slices_forward_reference_counts_to_the_root() {
    let (arena, allocator) = recording_allocator(RegionOrigin::Pooled);
    let buf = filled(&arena, &allocator, 64, 64);
    assert_eq!(buf.ref_cnt(), 1);

    let slice = buf.retained_slice_at(8, 16).unwrap();
    assert_eq!(buf.ref_cnt(), 2);
    assert_eq!(slice.to_vec().unwrap(), pattern(64)[8..24].to_vec());

    assert!(!slice.release());
    assert_eq!(buf.ref_cnt(), 1);
    assert!(arena.frees().is_empty());

    assert!(buf.release());
    assert_eq!(arena.frees().len(), 1);
}

/// 根缓冲先释放时，内存保持到最后一个视图释放。
#[test]
fn deallocation_waits_for_the_last_view() {
    let (arena, allocator) = recording_allocator(RegionOrigin::Pooled);
    let buf = filled(&arena, &allocator, 32, 32);
    let slice = buf.retained_slice().unwrap();
    let dup = buf.retained_duplicate().unwrap();
    assert_eq!(buf.ref_cnt(), 3);

    assert!(!buf.release());
    assert_eq!(slice.to_vec().unwrap(), pattern(32));
    assert!(!dup.release());
    assert!(arena.frees().is_empty());

    assert!(slice.release());
    assert_eq!(arena.frees().len(), 1);
}

/// 通过副本写入的字节可以从根缓冲读到，反之亦然。
#[test]
fn duplicates_alias_the_root_memory() {
    let (arena, allocator) = recording_allocator(RegionOrigin::Pooled);
    let mut buf = filled(&arena, &allocator, 16, 16);
    let mut dup = buf.retained_duplicate().unwrap();

    dup.set_u8(5, 0xEE).unwrap();
    assert_eq!(buf.get_u8(5).unwrap(), 0xEE);

    buf.set_u32(8, 0xDEAD_BEEF).unwrap();
    assert_eq!(dup.get_u32(8).unwrap(), 0xDEAD_BEEF);

    dup.skip_bytes(4).unwrap();
    assert_eq!(buf.reader_index(), 0, "游标彼此独立");
}

/// 副本容量跟随根缓冲，重新分配后仍然读到同一份数据。
#[test]
fn duplicates_follow_root_reallocation() {
    let (arena, allocator) = recording_allocator(RegionOrigin::Pooled);
    let mut buf = filled(&arena, &allocator, 300, 300);
    let dup = buf.retained_duplicate().unwrap();

    buf.set_capacity(2000).unwrap();
    assert_eq!(dup.capacity(), 2000);
    assert_eq!(dup.get_u8(299).unwrap(), pattern(300)[299]);
    assert_eq!(arena.frees().len(), 1);
}

/// 多线程并发释放视图时，回收恰好发生一次。
#[test]
fn concurrent_releases_deallocate_exactly_once() {
    const VIEWS: usize = 15;
    let (arena, allocator) = recording_allocator(RegionOrigin::Pooled);
    let buf = filled(&arena, &allocator, 64, 64);
    let views: Vec<_> = (0..VIEWS)
        .map(|i| buf.retained_slice_at(i, 4).unwrap())
        .collect();
    assert_eq!(buf.ref_cnt(), VIEWS + 1);

    let fired = Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let workers: Vec<_> = views
        .into_iter()
        .map(|view| {
            let fired = Arc::clone(&fired);
            thread::spawn(move || {
                if view.release() {
                    fired.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                }
            })
        })
        .collect();
    if buf.release() {
        fired.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
    }
    for worker in workers {
        worker.join().expect("释放线程不应 panic");
    }

    assert_eq!(fired.load(std::sync::atomic::Ordering::SeqCst), 1);
    assert_eq!(arena.frees().len(), 1);
}

/// 游标与标记在收缩后被截断，重置标记不会越界。
#[test]
fn marks_are_trimmed_with_the_capacity() {
    let (arena, allocator) = recording_allocator(RegionOrigin::Pooled);
    let mut buf = filled(&arena, &allocator, 1024, 1024);
    buf.skip_bytes(900).unwrap();
    buf.mark_reader_index();
    buf.mark_writer_index();

    buf.set_capacity(700).unwrap();
    assert_eq!(buf.reader_index(), 700);
    assert_eq!(buf.writer_index(), 700);
    buf.reset_reader_index().unwrap();
    buf.reset_writer_index().unwrap();
    assert_eq!(buf.reader_index(), 700);
    assert_eq!(buf.readable_bytes(), 0);
}
