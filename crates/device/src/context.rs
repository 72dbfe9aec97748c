// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Execution contexts.

use crate::{AllocationStats, DeviceAllocator, DeviceError, DeviceMemory, MemoryBudget, Queue};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Static description of the accelerator a [`Context`] drives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Human-readable device name.
    pub name: String,
    /// Byte alignment the device requires for sub-region offsets.
    pub memory_alignment: usize,
    /// Whether queues record per-command execution time.
    pub profiling: bool,
}

impl Default for DeviceInfo {
    fn default() -> Self {
        Self {
            name: "reference".to_string(),
            memory_alignment: 64,
            profiling: true,
        }
    }
}

/// The root object through which device memory and queues are obtained.
///
/// A context owns the device allocator and a default queue. It is shared by
/// reference; it is not `Clone`.
pub struct Context {
    info: DeviceInfo,
    allocator: DeviceAllocator,
    default_queue: Queue,
    next_queue_id: AtomicUsize,
}

impl Context {
    /// Opens a context with `budget` bytes of device memory.
    pub fn new(info: DeviceInfo, budget: MemoryBudget) -> Result<Self, DeviceError> {
        let default_queue = Queue::spawn(0, info.profiling)?;
        tracing::info!(
            device = %info.name,
            budget = %budget,
            alignment = info.memory_alignment,
            profiling = info.profiling,
            "device context opened"
        );
        Ok(Self {
            info,
            allocator: DeviceAllocator::new(budget),
            default_queue,
            next_queue_id: AtomicUsize::new(1),
        })
    }

    /// A context with [`DeviceInfo::default`] and the given budget.
    pub fn with_budget(budget: MemoryBudget) -> Result<Self, DeviceError> {
        Self::new(DeviceInfo::default(), budget)
    }

    pub fn info(&self) -> &DeviceInfo {
        &self.info
    }

    /// Allocates a zero-filled device block.
    pub fn alloc(&self, size_bytes: usize) -> Result<DeviceMemory, DeviceError> {
        self.allocator.allocate(size_bytes)
    }

    /// Creates an additional in-order queue.
    pub fn make_queue(&self) -> Result<Queue, DeviceError> {
        let id = self.next_queue_id.fetch_add(1, Ordering::Relaxed);
        Queue::spawn(id, self.info.profiling)
    }

    pub fn default_queue(&self) -> &Queue {
        &self.default_queue
    }

    pub fn allocator(&self) -> &DeviceAllocator {
        &self.allocator
    }

    /// Snapshot of the allocator counters.
    pub fn memory_stats(&self) -> AllocationStats {
        self.allocator.stats()
    }

    /// Bytes currently held by live device blocks.
    pub fn live_bytes(&self) -> usize {
        self.allocator.live_bytes()
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("info", &self.info)
            .field("allocator", &self.allocator)
            .field("default_queue", &self.default_queue)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Storage;

    #[test]
    fn test_context_alloc_and_queues() {
        let ctx = Context::with_budget(MemoryBudget::from_bytes(4096)).unwrap();
        let block = ctx.alloc(1000).unwrap();
        assert_eq!(block.len_bytes(), 1000);
        assert_eq!(ctx.live_bytes(), 1000);

        let q1 = ctx.make_queue().unwrap();
        let q2 = ctx.make_queue().unwrap();
        assert_eq!(ctx.default_queue().id(), 0);
        assert_ne!(q1.id(), q2.id());
        assert!(q1.is_profiling());
    }

    #[test]
    fn test_memory_stats_track_oom() {
        let ctx = Context::with_budget(MemoryBudget::from_bytes(100)).unwrap();
        assert!(ctx.alloc(200).is_err());
        assert_eq!(ctx.memory_stats().oom_count, 1);
    }

    #[test]
    fn test_device_info_default() {
        let info = DeviceInfo::default();
        assert_eq!(info.name, "reference");
        assert_eq!(info.memory_alignment, 64);
    }
}
