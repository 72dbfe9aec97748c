// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Enqueued byte transfers between host buffers and device memory.
//!
//! Sizes are checked when the transfer is submitted; the copy itself runs on
//! the queue. Overlapping source and destination regions are handled by
//! staging the source bytes first.

use crate::{DeviceError, DeviceMemory, Event, HostBuffer, Queue, Storage};

/// Copies `src` from the host into `dst` on the device.
pub fn copy_h2d(queue: &Queue, src: &HostBuffer, dst: &DeviceMemory) -> Result<Event, DeviceError> {
    copy_region(queue, "copy_h2d", src, dst)
}

/// Copies `src` from the device into host buffer `dst`.
pub fn copy_d2h(queue: &Queue, src: &DeviceMemory, dst: &HostBuffer) -> Result<Event, DeviceError> {
    copy_region(queue, "copy_d2h", src, dst)
}

/// Copies between two device regions.
pub fn copy_d2d(
    queue: &Queue,
    src: &DeviceMemory,
    dst: &DeviceMemory,
) -> Result<Event, DeviceError> {
    copy_region(queue, "copy_d2d", src, dst)
}

fn copy_region<S: Storage, D: Storage>(
    queue: &Queue,
    label: &'static str,
    src: &S,
    dst: &D,
) -> Result<Event, DeviceError> {
    if src.len_bytes() != dst.len_bytes() {
        return Err(DeviceError::SizeMismatch {
            expected: dst.len_bytes(),
            actual: src.len_bytes(),
        });
    }
    if src.len_bytes() == 0 {
        return Ok(Event::completed());
    }
    let (src, dst) = (src.clone(), dst.clone());
    Ok(queue.submit(label, move || {
        let staged = src.read(|bytes| bytes.to_vec())?;
        dst.write(|bytes| bytes.copy_from_slice(&staged))
    }))
}
