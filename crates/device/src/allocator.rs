// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Budgeted device memory allocator.
//!
//! The [`DeviceAllocator`] hands out [`DeviceMemory`] blocks against a hard
//! byte budget. Released blocks are kept in a free list binned by size class
//! so that repeated allocations of similar tensors in a training or
//! inference loop do not hit the system allocator. The cache never holds
//! more than the budget's worth of bytes; the oldest released blocks are
//! dropped first.
//!
//! # Size Classes
//! A size class is the allocation size rounded up to the next power of two,
//! with a floor of [`MIN_SIZE_CLASS`]. Only the requested bytes count
//! against the budget; the slack is an implementation detail of the cache.

use crate::memory::Block;
use crate::{AllocationStats, DeviceError, DeviceMemory, MemoryBudget};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Smallest cached block: 256 bytes.
const MIN_SIZE_CLASS: usize = 256;

/// State shared between the allocator and every block it handed out.
///
/// Blocks hold an `Arc` to this so the last handle to a block can return
/// its bytes without a reference to the allocator itself.
pub(crate) struct AllocatorInner {
    budget: MemoryBudget,
    live_bytes: AtomicUsize,
    /// Released buffers, oldest first.
    free_blocks: Mutex<VecDeque<Vec<u8>>>,
    cached_bytes: AtomicUsize,
    stats: Mutex<AllocationStats>,
    next_block_id: AtomicU64,
}

impl AllocatorInner {
    /// Called from `Block::drop` when the last handle goes away.
    pub(crate) fn release(&self, storage: Vec<u8>, size_bytes: usize) {
        self.live_bytes.fetch_sub(size_bytes, Ordering::AcqRel);
        if let Ok(mut stats) = self.stats.lock() {
            stats.record_release();
        }

        if storage.capacity() == 0 {
            return;
        }
        let class = size_class_for(storage.len());
        let limit = self.budget.as_bytes();
        let Ok(mut free) = self.free_blocks.lock() else {
            return;
        };
        let mut cached = self.cached_bytes.load(Ordering::Acquire) + storage.len();
        free.push_back(storage);
        let mut evicted = 0usize;
        while cached > limit {
            let Some(oldest) = free.pop_front() else {
                break;
            };
            cached -= oldest.len();
            evicted += 1;
        }
        self.cached_bytes.store(cached, Ordering::Release);
        tracing::trace!(size_bytes, class, cached, evicted, "device block released");
    }

    /// Most recently released buffer of the same size class.
    fn take_cached(&self, size_bytes: usize) -> Option<Vec<u8>> {
        let class = size_class_for(size_bytes);
        let mut free = self.free_blocks.lock().ok()?;
        let index = free
            .iter()
            .rposition(|buf| size_class_for(buf.len()) == class)?;
        let mut buf = free.remove(index)?;
        self.cached_bytes.fetch_sub(buf.len(), Ordering::AcqRel);
        buf.clear();
        buf.resize(size_bytes, 0);
        Some(buf)
    }

    /// Reserves `size_bytes` against the budget, or reports how much is left.
    fn reserve(&self, size_bytes: usize) -> Result<usize, usize> {
        let budget = self.budget.as_bytes();
        self.live_bytes
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |live| {
                live.checked_add(size_bytes).filter(|&total| total <= budget)
            })
            .map(|prev| prev + size_bytes)
    }
}

/// The allocator behind a [`Context`](crate::Context).
///
/// Cloning yields another handle to the same budget and cache.
///
/// # Example
/// ```
/// use device::{DeviceAllocator, MemoryBudget, Storage};
///
/// let alloc = DeviceAllocator::new(MemoryBudget::from_bytes(1024));
/// let block = alloc.allocate(512).unwrap();
/// assert_eq!(block.len_bytes(), 512);
/// assert_eq!(alloc.live_bytes(), 512);
///
/// drop(block);
/// assert_eq!(alloc.live_bytes(), 0);
/// ```
#[derive(Clone)]
pub struct DeviceAllocator {
    inner: Arc<AllocatorInner>,
}

impl DeviceAllocator {
    /// Creates an allocator with the given budget and an empty cache.
    pub fn new(budget: MemoryBudget) -> Self {
        Self {
            inner: Arc::new(AllocatorInner {
                budget,
                live_bytes: AtomicUsize::new(0),
                free_blocks: Mutex::new(VecDeque::new()),
                cached_bytes: AtomicUsize::new(0),
                stats: Mutex::new(AllocationStats::default()),
                next_block_id: AtomicU64::new(0),
            }),
        }
    }

    /// Allocates a zero-filled block of `size_bytes`.
    ///
    /// Zero-sized blocks are valid and never touch the cache.
    pub fn allocate(&self, size_bytes: usize) -> Result<DeviceMemory, DeviceError> {
        let live = match self.inner.reserve(size_bytes) {
            Ok(live) => live,
            Err(live) => {
                if let Ok(mut stats) = self.inner.stats.lock() {
                    stats.record_oom();
                }
                let budget = self.inner.budget.as_bytes();
                tracing::warn!(size_bytes, live, budget, "device allocation over budget");
                return Err(DeviceError::OutOfMemory {
                    requested_bytes: size_bytes,
                    available_bytes: budget.saturating_sub(live),
                    budget_bytes: budget,
                });
            }
        };

        let cached = if size_bytes == 0 {
            None
        } else {
            self.inner.take_cached(size_bytes)
        };
        let reused = cached.is_some();
        let storage = cached.unwrap_or_else(|| vec![0u8; size_bytes]);

        if let Ok(mut stats) = self.inner.stats.lock() {
            stats.record_allocation(size_bytes, reused, live);
        }
        let id = self.inner.next_block_id.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(id, size_bytes, reused, "device block allocated");

        let block = Block::new(id, storage, Arc::clone(&self.inner));
        Ok(DeviceMemory::from_block(Arc::new(block)))
    }

    /// Bytes held by live blocks.
    pub fn live_bytes(&self) -> usize {
        self.inner.live_bytes.load(Ordering::Acquire)
    }

    /// Bytes that can still be allocated before hitting the budget.
    pub fn available_bytes(&self) -> usize {
        self.inner
            .budget
            .as_bytes()
            .saturating_sub(self.live_bytes())
    }

    pub fn budget(&self) -> MemoryBudget {
        self.inner.budget
    }

    /// Snapshot of the allocation counters.
    pub fn stats(&self) -> AllocationStats {
        self.inner
            .stats
            .lock()
            .map(|s| s.clone())
            .unwrap_or_default()
    }

    /// Bytes sitting in the free list.
    pub fn cached_bytes(&self) -> usize {
        self.inner.cached_bytes.load(Ordering::Acquire)
    }

    /// Drops every cached block. Live blocks are unaffected.
    pub fn trim(&self) {
        if let Ok(mut free) = self.inner.free_blocks.lock() {
            free.clear();
            self.inner.cached_bytes.store(0, Ordering::Release);
        }
    }
}

impl std::fmt::Debug for DeviceAllocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceAllocator")
            .field("budget", &self.inner.budget)
            .field("live_bytes", &self.live_bytes())
            .field("cached_bytes", &self.cached_bytes())
            .finish()
    }
}

fn size_class_for(size: usize) -> usize {
    size.max(MIN_SIZE_CLASS).next_power_of_two()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Storage;

    #[test]
    fn test_allocate_and_release() {
        let alloc = DeviceAllocator::new(MemoryBudget::from_mb(1));
        let block = alloc.allocate(1024).unwrap();
        assert_eq!(alloc.live_bytes(), 1024);
        assert_eq!(block.len_bytes(), 1024);

        drop(block);
        assert_eq!(alloc.live_bytes(), 0);
        assert_eq!(alloc.stats().blocks_released, 1);
    }

    #[test]
    fn test_block_released_after_last_view() {
        let alloc = DeviceAllocator::new(MemoryBudget::from_mb(1));
        let block = alloc.allocate(128).unwrap();
        let view = block.at(64, None).unwrap();
        drop(block);
        assert_eq!(alloc.live_bytes(), 128);
        drop(view);
        assert_eq!(alloc.live_bytes(), 0);
    }

    #[test]
    fn test_oom() {
        let alloc = DeviceAllocator::new(MemoryBudget::from_bytes(1024));
        let _a = alloc.allocate(512).unwrap();
        let _b = alloc.allocate(512).unwrap();

        match alloc.allocate(1) {
            Err(DeviceError::OutOfMemory {
                requested_bytes,
                available_bytes,
                budget_bytes,
            }) => {
                assert_eq!(requested_bytes, 1);
                assert_eq!(available_bytes, 0);
                assert_eq!(budget_bytes, 1024);
            }
            other => panic!("expected OOM, got {other:?}"),
        }
        assert_eq!(alloc.stats().oom_count, 1);
    }

    #[test]
    fn test_zero_sized_allocation() {
        let alloc = DeviceAllocator::new(MemoryBudget::from_bytes(16));
        let block = alloc.allocate(0).unwrap();
        assert_eq!(block.len_bytes(), 0);
        drop(block);
        assert_eq!(alloc.cached_bytes(), 0);
    }

    #[test]
    fn test_cache_reuse_is_zeroed() {
        let alloc = DeviceAllocator::new(MemoryBudget::from_mb(1));
        let block = alloc.allocate(300).unwrap();
        block.write(|bytes| bytes.fill(0xAB)).unwrap();
        drop(block);
        assert!(alloc.cached_bytes() > 0);

        let again = alloc.allocate(400).unwrap();
        assert_eq!(alloc.stats().reused_blocks, 1);
        assert_eq!(again.len_bytes(), 400);
        assert!(again.read(|b| b.iter().all(|&x| x == 0)).unwrap());
    }

    #[test]
    fn test_cache_bounded_by_budget() {
        let alloc = DeviceAllocator::new(MemoryBudget::from_bytes(4096));
        let blocks: Vec<_> = (0..4).map(|_| alloc.allocate(1024).unwrap()).collect();
        drop(blocks);
        assert_eq!(alloc.cached_bytes(), 4096);

        // A different size class pushes the three oldest 1 KiB buffers out.
        drop(alloc.allocate(3000).unwrap());
        assert_eq!(alloc.cached_bytes(), 3000 + 1024);
        assert_eq!(alloc.stats().reused_blocks, 0);

        let a = alloc.allocate(3000).unwrap();
        let b = alloc.allocate(1024).unwrap();
        assert_eq!(alloc.stats().reused_blocks, 2);
        assert_eq!(alloc.cached_bytes(), 0);
        drop((a, b));
        assert!(alloc.cached_bytes() <= alloc.budget().as_bytes());
    }

    #[test]
    fn test_trim() {
        let alloc = DeviceAllocator::new(MemoryBudget::from_mb(1));
        drop(alloc.allocate(4096).unwrap());
        assert!(alloc.cached_bytes() > 0);
        alloc.trim();
        assert_eq!(alloc.cached_bytes(), 0);
    }

    #[test]
    fn test_peak_tracking() {
        let alloc = DeviceAllocator::new(MemoryBudget::from_mb(1));
        let a = alloc.allocate(1000).unwrap();
        let b = alloc.allocate(2000).unwrap();
        drop(a);
        drop(b);
        assert_eq!(alloc.stats().peak_live_bytes, 3000);
    }

    #[test]
    fn test_size_class() {
        assert_eq!(size_class_for(1), MIN_SIZE_CLASS);
        assert_eq!(size_class_for(256), 256);
        assert_eq!(size_class_for(300), 512);
    }

    #[test]
    fn test_debug_format() {
        let alloc = DeviceAllocator::new(MemoryBudget::from_mb(4));
        let debug = format!("{alloc:?}");
        assert!(debug.contains("DeviceAllocator"));
        assert!(debug.contains("live_bytes"));
    }
}
