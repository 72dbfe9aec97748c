// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The storage abstraction shared by device memory and host buffers.

use crate::DeviceError;
use std::fmt;

/// A shared, reference-counted byte region that tensors can view.
///
/// Both [`DeviceMemory`](crate::DeviceMemory) and
/// [`HostBuffer`](crate::HostBuffer) implement this trait. Cloning a storage
/// handle never copies bytes; it adds a reference to the same allocation.
///
/// `read` and `write` give direct byte access to the region. For device
/// memory they are meant for kernel backends and transfer commands running
/// on a queue worker, not for host code.
pub trait Storage: Clone + fmt::Debug + Send + Sync + 'static {
    /// Length of this region in bytes.
    fn len_bytes(&self) -> usize;

    /// Byte offset of this region within its allocation.
    fn region_offset(&self) -> usize;

    /// Creates a sub-region starting `offset` bytes into this region.
    ///
    /// When `len` is `None` the sub-region extends to the end of this region.
    fn at(&self, offset: usize, len: Option<usize>) -> Result<Self, DeviceError>;

    /// `true` when both handles name the same bytes of the same allocation.
    fn is_same(&self, other: &Self) -> bool;

    /// `true` when both handles point into the same allocation.
    fn shares_allocation(&self, other: &Self) -> bool;

    /// Runs `f` over the bytes of this region.
    fn read<R>(&self, f: impl FnOnce(&[u8]) -> R) -> Result<R, DeviceError>;

    /// Runs `f` over the bytes of this region, mutably.
    fn write<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> Result<R, DeviceError>;
}

/// Resolves `at(offset, len)` against a parent region `[base, base+parent_len)`.
///
/// Returns the absolute `(offset, len)` of the child region.
pub(crate) fn resolve_subregion(
    base: usize,
    parent_len: usize,
    offset: usize,
    len: Option<usize>,
) -> Result<(usize, usize), DeviceError> {
    let out_of_bounds = || DeviceError::RegionOutOfBounds {
        offset,
        len: len.unwrap_or(0),
        capacity: parent_len,
    };
    if offset > parent_len {
        return Err(out_of_bounds());
    }
    let len = len.unwrap_or(parent_len - offset);
    match offset.checked_add(len) {
        Some(end) if end <= parent_len => Ok((base + offset, len)),
        _ => Err(out_of_bounds()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn prop_subregion_stays_inside_parent(
            base in 0usize..1024,
            parent_len in 0usize..1024,
            offset in 0usize..1100,
            len in proptest::option::of(0usize..1100),
        ) {
            match resolve_subregion(base, parent_len, offset, len) {
                Ok((abs, child_len)) => {
                    prop_assert!(abs >= base);
                    prop_assert!(abs + child_len <= base + parent_len);
                }
                Err(_) => {
                    let end = offset + len.unwrap_or(0);
                    prop_assert!(offset > parent_len || end > parent_len);
                }
            }
        }
    }

    #[test]
    fn test_resolve_full_remainder() {
        assert_eq!(resolve_subregion(16, 64, 8, None).unwrap(), (24, 56));
    }

    #[test]
    fn test_resolve_explicit_len() {
        assert_eq!(resolve_subregion(0, 64, 60, Some(4)).unwrap(), (60, 4));
        assert_eq!(resolve_subregion(0, 64, 64, None).unwrap(), (64, 0));
    }

    #[test]
    fn test_resolve_out_of_bounds() {
        assert!(matches!(
            resolve_subregion(0, 64, 60, Some(5)),
            Err(DeviceError::RegionOutOfBounds { capacity: 64, .. })
        ));
        assert!(resolve_subregion(0, 64, 65, None).is_err());
        assert!(resolve_subregion(0, 64, 1, Some(usize::MAX)).is_err());
    }
}
