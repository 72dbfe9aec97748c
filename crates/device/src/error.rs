// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for device memory, queues and kernel execution.

/// Errors raised by the accelerator runtime layer.
///
/// `DeviceError` is `Clone` because a single failed command is observed by
/// every holder of its [`Event`](crate::Event).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeviceError {
    /// The allocator could not satisfy the request within its budget.
    #[error("out of device memory: requested {requested_bytes} bytes, but only {available_bytes} available (budget: {budget_bytes})")]
    OutOfMemory {
        requested_bytes: usize,
        available_bytes: usize,
        budget_bytes: usize,
    },

    /// A sub-region or transfer reached outside its parent region.
    #[error("region [{offset}, {offset}+{len}) exceeds capacity of {capacity} bytes")]
    RegionOutOfBounds {
        offset: usize,
        len: usize,
        capacity: usize,
    },

    /// Source and destination of a transfer differ in length.
    #[error("transfer size mismatch: expected {expected} bytes, got {actual}")]
    SizeMismatch { expected: usize, actual: usize },

    /// A kernel reported a failure while executing on the device.
    #[error("kernel '{kernel}' failed: {detail}")]
    Kernel { kernel: &'static str, detail: String },

    /// The queue's worker has shut down and no longer accepts commands.
    #[error("command queue {0} is closed")]
    QueueClosed(usize),

    /// Timing was requested from a queue created without profiling.
    #[error("event profiling is not enabled on this queue")]
    ProfilingUnavailable,

    /// A storage lock was poisoned by a panicking kernel.
    #[error("storage lock poisoned")]
    LockPoisoned,

    /// A queue worker thread could not be started.
    #[error("failed to start queue worker: {0}")]
    Worker(String),

    /// A memory budget string could not be parsed.
    #[error("invalid memory budget '{0}'")]
    InvalidBudget(String),
}
