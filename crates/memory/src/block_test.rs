//! Tests for the memory manager and memory blocks

use std::sync::Arc;
use std::thread;

use crate::{MemoryError, MemoryManager, MemoryPool};

#[test]
fn test_allocate_within_budget() {
    let manager = MemoryManager::new(1000);

    let block = manager.try_allocate(MemoryPool::Batch, 600).unwrap();

    assert_eq!(block.size(), 600);
    assert_eq!(block.usage(), 0);
    assert_eq!(manager.available_bytes(), 400);
    assert_eq!(manager.snapshot().batch_allocated, 600);
}

#[test]
fn test_allocate_beyond_budget_fails() {
    let manager = MemoryManager::new(1000);
    let _block = manager.try_allocate(MemoryPool::Batch, 600).unwrap();

    let result = manager.try_allocate(MemoryPool::Queue, 500);

    match result {
        Err(MemoryError::Insufficient {
            pool,
            requested,
            available,
        }) => {
            assert_eq!(pool, MemoryPool::Queue);
            assert_eq!(requested, 500);
            assert_eq!(available, 400);
        }
        other => panic!("expected insufficient memory, got {other:?}"),
    }
    assert_eq!(manager.available_bytes(), 400);
}

#[test]
fn test_zero_allocation_always_succeeds() {
    let manager = MemoryManager::new(0);

    let block = manager.try_allocate(MemoryPool::Queue, 0).unwrap();
    assert_eq!(block.size(), 0);

    let empty = manager.allocate_empty(MemoryPool::Batch);
    assert_eq!(empty.size(), 0);
}

#[test]
fn test_usage_is_mirrored_into_pool() {
    let manager = MemoryManager::new(0);
    let block = manager.allocate_empty(MemoryPool::Queue);

    block.add_usage(300);
    block.add_usage(200);
    assert_eq!(block.usage(), 500);
    assert_eq!(manager.snapshot().queue_used, 500);

    block.reduce_usage(100);
    assert_eq!(block.usage(), 400);
    assert_eq!(manager.snapshot().queue_used, 400);
}

#[test]
fn test_reduce_usage_saturates() {
    let manager = MemoryManager::new(0);
    let block = manager.allocate_empty(MemoryPool::Queue);

    block.add_usage(10);
    block.reduce_usage(50);

    assert_eq!(block.usage(), 0);
    assert_eq!(manager.snapshot().queue_used, 0);
}

#[test]
fn test_resize_grows_and_shrinks() {
    let manager = MemoryManager::new(1000);
    let block = manager.try_allocate(MemoryPool::Batch, 100).unwrap();

    block.resize(800).unwrap();
    assert_eq!(block.size(), 800);
    assert_eq!(manager.available_bytes(), 200);

    block.resize(50).unwrap();
    assert_eq!(block.size(), 50);
    assert_eq!(manager.available_bytes(), 950);
}

#[test]
fn test_resize_beyond_budget_keeps_block() {
    let manager = MemoryManager::new(1000);
    let block = manager.try_allocate(MemoryPool::Batch, 100).unwrap();

    assert!(block.resize(2000).is_err());
    assert_eq!(block.size(), 100);
    assert_eq!(manager.available_bytes(), 900);
}

#[test]
fn test_close_returns_grant_once() {
    let manager = MemoryManager::new(1000);
    let block = manager.try_allocate(MemoryPool::Batch, 400).unwrap();
    block.add_usage(100);

    block.close();
    block.close();

    assert!(block.is_closed());
    assert_eq!(block.size(), 0);
    assert_eq!(manager.available_bytes(), 1000);
    assert_eq!(manager.snapshot().batch_used, 0);
    assert!(matches!(block.resize(10), Err(MemoryError::Closed(_))));
}

#[test]
fn test_drop_returns_grant() {
    let manager = MemoryManager::new(1000);
    {
        let _block = manager.try_allocate(MemoryPool::Queue, 700).unwrap();
        assert_eq!(manager.available_bytes(), 300);
    }
    assert_eq!(manager.available_bytes(), 1000);
    assert_eq!(manager.snapshot().queue_allocated, 0);
}

#[test]
fn test_concurrent_allocations_never_exceed_budget() {
    let manager = MemoryManager::new(10_000);

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let manager = Arc::clone(&manager);
            thread::spawn(move || {
                let mut blocks = Vec::new();
                for _ in 0..100 {
                    if let Ok(block) = manager.try_allocate(MemoryPool::Batch, 100) {
                        blocks.push(block);
                    }
                }
                blocks
            })
        })
        .collect();

    let blocks: Vec<_> = handles
        .into_iter()
        .flat_map(|handle| handle.join().unwrap())
        .collect();
    let granted: u64 = blocks.iter().map(|block| block.size()).sum();

    assert_eq!(granted, 10_000);
    assert_eq!(manager.available_bytes(), 0);
}

#[test]
fn test_concurrent_resizes_keep_manager_in_step() {
    let manager = MemoryManager::new(100_000);
    let block = Arc::new(manager.try_allocate(MemoryPool::Batch, 0).unwrap());

    let handles: Vec<_> = (0..8u64)
        .map(|worker| {
            let block = Arc::clone(&block);
            thread::spawn(move || {
                for step in 0..500u64 {
                    let _ = block.resize((worker * 500 + step) % 7_000);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(manager.available_bytes(), 100_000 - block.size());
    assert_eq!(manager.snapshot().batch_allocated, block.size());

    block.close();
    assert_eq!(manager.available_bytes(), 100_000);
}
