// tests/test_wavefront_queues.rs
// Host-side queue protocol tests: append/read back, reset, dispatch sizing and overflow reporting.
// RELEVANT FILES:src/path_tracing/wavefront/queues.rs,src/shaders/wavefront_queues.wgsl

use std::collections::HashSet;

use glam::Vec3;
use rayon::prelude::*;
use wavetrace::path_tracing::wavefront::queues::check_overflow;
use wavetrace::{compute_dispatch_size, QueueHeader, QueueKind, RayItem, TraceError, WorkQueue};

fn ray(pixel: u32) -> RayItem {
    RayItem::new(Vec3::ZERO, Vec3::Z, pixel, 0, Vec3::ONE)
}

#[test]
fn parallel_pushes_are_all_readable() {
    let queue = WorkQueue::new(QueueKind::Ray, 1024);
    (0..1000u32)
        .into_par_iter()
        .try_for_each(|p| queue.push(ray(p)).map(|_| ()))
        .unwrap();

    assert_eq!(queue.len(), 1000);
    let pixels: HashSet<u32> = queue.iter().map(|r| r.pixel).collect();
    assert_eq!(pixels.len(), 1000);
    assert!(pixels.iter().all(|p| *p < 1000));
    assert_eq!(queue.header(64), QueueHeader::sized(1000, 64));
}

#[test]
fn reset_empties_the_queue() {
    let mut queue = WorkQueue::new(QueueKind::Hit, 8);
    for p in 0..5 {
        queue.push(ray(p)).unwrap();
    }
    queue.reset();
    assert!(queue.is_empty());
    assert_eq!(queue.iter().count(), 0);
    assert_eq!(queue.header(64).count, 0);

    queue.push(ray(42)).unwrap();
    assert_eq!(queue.iter().next().map(|r| r.pixel), Some(42));

    // Same population every frame, nothing carried over
    for _ in 0..3 {
        queue.reset();
        for p in 0..5 {
            queue.push(ray(p)).unwrap();
        }
        assert_eq!(queue.len(), 5);
        assert_eq!(queue.iter().count(), 5);
    }
}

#[test]
fn dispatch_sizes_round_up_and_never_hit_zero() {
    assert_eq!(compute_dispatch_size(200, 64), [4, 1, 1]);
    assert_eq!(compute_dispatch_size(64, 64), [1, 1, 1]);
    assert_eq!(compute_dispatch_size(65, 64), [2, 1, 1]);
    assert_eq!(compute_dispatch_size(0, 64), [1, 1, 1]);
    assert_eq!(compute_dispatch_size(10, 0), [10, 1, 1]);
}

#[test]
fn overflow_is_reported_not_dropped_silently() {
    let queue = WorkQueue::new(QueueKind::Shadow, 4);
    for p in 0..4 {
        queue.push(ray(p)).unwrap();
    }
    let err = queue.push(ray(4)).unwrap_err();
    assert_eq!(
        err,
        TraceError::QueueOverflow {
            queue: "shadow",
            capacity: 4
        }
    );
    assert!(queue.overflowed());
    assert_eq!(queue.len(), 4);

    let mut headers = [QueueHeader::baseline(); 3];
    headers[QueueKind::Hit.index()].count = 9;
    assert!(matches!(
        check_overflow(&headers, 8),
        Err(TraceError::QueueOverflow { queue: "hit", .. })
    ));
    headers[QueueKind::Hit.index()].count = 8;
    assert!(check_overflow(&headers, 8).is_ok());
}

#[test]
fn header_layout_feeds_indirect_dispatch() {
    assert_eq!(std::mem::size_of::<QueueHeader>(), 16);
    let header = QueueHeader::sized(130, 64);
    let words: &[u32] = bytemuck::cast_slice(std::slice::from_ref(&header));
    assert_eq!(words, &[3, 1, 1, 130]);
    assert_eq!(QueueKind::Shadow.header_offset(), 32);
}
