// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Reference-counted device memory blocks and their sub-regions.
//!
//! A [`DeviceMemory`] handle names a byte range inside a block. Handles are
//! cheap to clone and to narrow with [`Storage::at`]; the block is returned
//! to its allocator when the last handle is dropped.

use crate::allocator::AllocatorInner;
use crate::storage::{resolve_subregion, Storage};
use crate::DeviceError;
use std::sync::{Arc, Mutex};

/// One allocation made by a [`DeviceAllocator`](crate::DeviceAllocator).
pub(crate) struct Block {
    id: u64,
    size_bytes: usize,
    storage: Mutex<Vec<u8>>,
    allocator: Arc<AllocatorInner>,
}

impl Block {
    pub(crate) fn new(id: u64, storage: Vec<u8>, allocator: Arc<AllocatorInner>) -> Self {
        Self {
            id,
            size_bytes: storage.len(),
            storage: Mutex::new(storage),
            allocator,
        }
    }
}

impl Drop for Block {
    fn drop(&mut self) {
        let slot = match self.storage.get_mut() {
            Ok(slot) => slot,
            Err(poisoned) => poisoned.into_inner(),
        };
        let storage = std::mem::take(slot);
        self.allocator.release(storage, self.size_bytes);
    }
}

/// A handle to a byte range of device memory.
#[derive(Clone)]
pub struct DeviceMemory {
    block: Arc<Block>,
    offset: usize,
    len: usize,
}

impl DeviceMemory {
    pub(crate) fn from_block(block: Arc<Block>) -> Self {
        let len = block.size_bytes;
        Self {
            block,
            offset: 0,
            len,
        }
    }

    /// Byte offset of this region within its block.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Total size of the underlying block.
    pub fn block_size(&self) -> usize {
        self.block.size_bytes
    }

    /// Number of live handles to the underlying block.
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.block)
    }
}

impl Storage for DeviceMemory {
    fn len_bytes(&self) -> usize {
        self.len
    }

    fn region_offset(&self) -> usize {
        self.offset
    }

    fn at(&self, offset: usize, len: Option<usize>) -> Result<Self, DeviceError> {
        let (offset, len) = resolve_subregion(self.offset, self.len, offset, len)?;
        Ok(Self {
            block: Arc::clone(&self.block),
            offset,
            len,
        })
    }

    fn is_same(&self, other: &Self) -> bool {
        self.shares_allocation(other) && self.offset == other.offset && self.len == other.len
    }

    fn shares_allocation(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.block, &other.block)
    }

    fn read<R>(&self, f: impl FnOnce(&[u8]) -> R) -> Result<R, DeviceError> {
        let guard = self
            .block
            .storage
            .lock()
            .map_err(|_| DeviceError::LockPoisoned)?;
        Ok(f(&guard[self.offset..self.offset + self.len]))
    }

    fn write<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> Result<R, DeviceError> {
        let mut guard = self
            .block
            .storage
            .lock()
            .map_err(|_| DeviceError::LockPoisoned)?;
        Ok(f(&mut guard[self.offset..self.offset + self.len]))
    }
}

impl std::fmt::Debug for DeviceMemory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceMemory")
            .field("block", &self.block.id)
            .field("offset", &self.offset)
            .field("len", &self.len)
            .finish()
    }
}
