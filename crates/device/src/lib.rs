// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # device
//!
//! Runtime layer for the compact-float accelerator.
//!
//! This crate provides the objects every tensor operation is built on:
//!
//! - [`Context`]: owns the budgeted [`DeviceAllocator`] and a default queue.
//! - [`DeviceMemory`]: a reference-counted block of device memory, or a
//!   byte sub-region of one. The block goes back to the allocator when its
//!   last handle is dropped.
//! - [`HostBuffer`]: a host byte buffer used as a transfer endpoint.
//! - [`Queue`]: an in-order command queue with its own worker thread.
//! - [`Event`]: completion handle for one enqueued command.
//!
//! Device memory and host buffers share the [`Storage`] trait, which is
//! what tensors are generic over.
//!
//! # Ownership Model
//!
//! ```text
//! Context::alloc(size)
//!       │
//!       ▼
//!   DeviceMemory ──► Arc<Block> ──► Arc<AllocatorInner>
//!       │  at(offset, len)             ▲
//!       ▼                              │ last handle dropped
//!   DeviceMemory (sub-region) ─────────┘  → free list
//! ```
//!
//! # Example
//! ```
//! use device::{copy_d2h, copy_h2d, Context, HostBuffer, MemoryBudget, Storage};
//!
//! let ctx = Context::with_budget(MemoryBudget::from_mb(1)).unwrap();
//! let dev = ctx.alloc(4).unwrap();
//! let queue = ctx.default_queue();
//!
//! copy_h2d(queue, &HostBuffer::from_vec(vec![1, 2, 3, 4]), &dev).unwrap();
//! let back = HostBuffer::zeroed(2);
//! copy_d2h(queue, &dev.at(2, None).unwrap(), &back).unwrap().wait().unwrap();
//! assert_eq!(back.to_vec().unwrap(), vec![3, 4]);
//! ```

mod allocator;
mod budget;
mod context;
mod error;
mod event;
mod host;
mod memory;
mod queue;
mod stats;
mod storage;
mod transfer;

pub use allocator::DeviceAllocator;
pub use budget::MemoryBudget;
pub use context::{Context, DeviceInfo};
pub use error::DeviceError;
pub use event::Event;
pub use host::HostBuffer;
pub use memory::DeviceMemory;
pub use queue::Queue;
pub use stats::AllocationStats;
pub use storage::Storage;
pub use transfer::{copy_d2d, copy_d2h, copy_h2d};
