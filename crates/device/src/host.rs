// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Host-side byte buffers used as transfer endpoints.

use crate::storage::{resolve_subregion, Storage};
use crate::DeviceError;
use std::sync::{Arc, RwLock};

/// A reference-counted host byte buffer.
///
/// Host buffers are not budgeted. Like [`DeviceMemory`](crate::DeviceMemory)
/// they can be narrowed with [`Storage::at`] and shared between tensors.
#[derive(Clone)]
pub struct HostBuffer {
    data: Arc<RwLock<Vec<u8>>>,
    offset: usize,
    len: usize,
}

impl HostBuffer {
    /// A zero-filled buffer of `len` bytes.
    pub fn zeroed(len: usize) -> Self {
        Self::from_vec(vec![0u8; len])
    }

    /// Takes ownership of `bytes`.
    pub fn from_vec(bytes: Vec<u8>) -> Self {
        let len = bytes.len();
        Self {
            data: Arc::new(RwLock::new(bytes)),
            offset: 0,
            len,
        }
    }

    /// Copies the bytes of this region out.
    pub fn to_vec(&self) -> Result<Vec<u8>, DeviceError> {
        self.read(|b| b.to_vec())
    }

    /// Byte offset of this region within the buffer.
    pub fn offset(&self) -> usize {
        self.offset
    }
}

impl Storage for HostBuffer {
    fn len_bytes(&self) -> usize {
        self.len
    }

    fn region_offset(&self) -> usize {
        self.offset
    }

    fn at(&self, offset: usize, len: Option<usize>) -> Result<Self, DeviceError> {
        let (offset, len) = resolve_subregion(self.offset, self.len, offset, len)?;
        Ok(Self {
            data: Arc::clone(&self.data),
            offset,
            len,
        })
    }

    fn is_same(&self, other: &Self) -> bool {
        self.shares_allocation(other) && self.offset == other.offset && self.len == other.len
    }

    fn shares_allocation(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.data, &other.data)
    }

    fn read<R>(&self, f: impl FnOnce(&[u8]) -> R) -> Result<R, DeviceError> {
        let guard = self.data.read().map_err(|_| DeviceError::LockPoisoned)?;
        Ok(f(&guard[self.offset..self.offset + self.len]))
    }

    fn write<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> Result<R, DeviceError> {
        let mut guard = self.data.write().map_err(|_| DeviceError::LockPoisoned)?;
        Ok(f(&mut guard[self.offset..self.offset + self.len]))
    }
}

impl std::fmt::Debug for HostBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostBuffer")
            .field("offset", &self.offset)
            .field("len", &self.len)
            .finish()
    }
}
