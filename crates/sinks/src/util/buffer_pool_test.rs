//! Tests for the read buffer pool

use std::sync::Arc;
use std::thread;

use bytes::BytesMut;

use crate::util::buffer_pool::BufferPool;

#[test]
fn test_new_pool_is_empty() {
    let pool = BufferPool::new(4, 1024);

    assert_eq!(pool.capacity(), 4);
    assert_eq!(pool.available(), 0);
    assert_eq!(pool.buffer_capacity(), 1024);
}

#[test]
fn test_zero_sized_pool_keeps_one() {
    let pool = BufferPool::new(0, 16);
    assert_eq!(pool.capacity(), 1);
}

#[test]
fn test_get_allocates_on_miss() {
    let pool = BufferPool::new(2, 4096);

    let buf = pool.get();

    assert!(buf.capacity() >= 4096);
    assert!(buf.is_empty());
    let snapshot = pool.metrics().snapshot();
    assert_eq!(snapshot.misses, 1);
    assert_eq!(snapshot.hits, 0);
}

#[test]
fn test_put_then_get_reuses() {
    let pool = BufferPool::new(2, 1024);

    let mut buf = pool.get();
    buf.extend_from_slice(b"piece bytes");
    pool.put(buf);
    assert_eq!(pool.available(), 1);

    let reused = pool.get();
    assert!(reused.is_empty());
    assert_eq!(pool.metrics().snapshot().hits, 1);
}

#[test]
fn test_put_drops_when_full() {
    let pool = BufferPool::new(1, 64);

    pool.put(BytesMut::with_capacity(64));
    pool.put(BytesMut::with_capacity(64));

    assert_eq!(pool.available(), 1);
    assert_eq!(pool.metrics().snapshot().drops, 1);
}

#[test]
fn test_put_drops_small_buffer() {
    let pool = BufferPool::new(4, 1024);

    pool.put(BytesMut::with_capacity(16));

    assert_eq!(pool.available(), 0);
    assert_eq!(pool.metrics().snapshot().drops, 1);
}

#[test]
fn test_concurrent_get_put() {
    let pool = Arc::new(BufferPool::new(8, 256));
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let pool = Arc::clone(&pool);
            thread::spawn(move || {
                for _ in 0..100 {
                    let buf = pool.get();
                    pool.put(buf);
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    let snapshot = pool.metrics().snapshot();
    assert_eq!(snapshot.hits + snapshot.misses, 400);
    assert!(pool.available() <= 8);
}
