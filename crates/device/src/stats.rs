// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Device allocator statistics.

/// Cumulative counters kept by the [`DeviceAllocator`](crate::DeviceAllocator).
///
/// A snapshot is returned by [`Context::memory_stats`](crate::Context::memory_stats).
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct AllocationStats {
    /// Successful allocation requests.
    pub blocks_allocated: u64,
    /// Blocks whose last handle has been dropped.
    pub blocks_released: u64,
    /// Allocations served from a cached block of the same size class.
    pub reused_blocks: u64,
    /// Allocations rejected because the budget was exhausted.
    pub oom_count: u64,
    /// High-water mark of live bytes.
    pub peak_live_bytes: usize,
    /// Largest single request seen, in bytes.
    pub largest_request_bytes: usize,
}

impl AllocationStats {
    /// Number of blocks that are still referenced.
    pub fn live_blocks(&self) -> u64 {
        self.blocks_allocated - self.blocks_released
    }

    /// Fraction of allocations served from the cache, in `[0.0, 1.0]`.
    pub fn reuse_ratio(&self) -> f64 {
        if self.blocks_allocated == 0 {
            return 0.0;
        }
        self.reused_blocks as f64 / self.blocks_allocated as f64
    }

    pub(crate) fn record_allocation(&mut self, size: usize, reused: bool, live_bytes: usize) {
        self.blocks_allocated += 1;
        if reused {
            self.reused_blocks += 1;
        }
        self.largest_request_bytes = self.largest_request_bytes.max(size);
        self.peak_live_bytes = self.peak_live_bytes.max(live_bytes);
    }

    pub(crate) fn record_release(&mut self) {
        self.blocks_released += 1;
    }

    pub(crate) fn record_oom(&mut self) {
        self.oom_count += 1;
    }

    /// One-line summary for logs.
    pub fn summary(&self) -> String {
        format!(
            "device blocks: {} allocated ({} reused, {:.0}%), {} live, {} OOMs, peak {:.2} KB",
            self.blocks_allocated,
            self.reused_blocks,
            self.reuse_ratio() * 100.0,
            self.live_blocks(),
            self.oom_count,
            self.peak_live_bytes as f64 / 1024.0,
        )
    }
}
