// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Fills, strided copies, gather/scatter and transposition.

use super::{validate, Dispatcher};
use crate::kernel::DeviceOp;
use crate::{Compact8, DType, DeviceTensor, Shape, TensorError};
use device::Event;

impl Dispatcher {
    pub fn memset(&self, value: Compact8, out: &DeviceTensor) -> Result<Event, TensorError> {
        validate::compact("memset", out)?;
        Ok(self.enqueue(DeviceOp::Memset {
            value,
            out: out.clone(),
        }))
    }

    /// Copies `num_batches` runs of `batch_size` elements.
    ///
    /// Batch `b` reads from element `b * src_batch_stride` of `src` and
    /// writes to element `b * dst_batch_stride` of `dst`.
    pub fn memcpy(
        &self,
        src: &DeviceTensor,
        batch_size: usize,
        num_batches: usize,
        src_batch_stride: usize,
        dst_batch_stride: usize,
        dst: &DeviceTensor,
    ) -> Result<Event, TensorError> {
        const OP: &str = "memcpy";
        validate::compact(OP, src)?;
        validate::compact(OP, dst)?;
        validate::extent(OP, src, 0, batch_size, src_batch_stride, num_batches)?;
        validate::extent(OP, dst, 0, batch_size, dst_batch_stride, num_batches)?;
        Ok(self.enqueue(DeviceOp::Memcpy {
            src: src.clone(),
            batch_size,
            num_batches,
            src_batch_stride,
            dst_batch_stride,
            dst: dst.clone(),
        }))
    }

    /// Whole-tensor copy between tensors of equal element count.
    pub fn copy(&self, src: &DeviceTensor, dst: &DeviceTensor) -> Result<Event, TensorError> {
        validate::numel("copy", dst, src.num_elements())?;
        let n = src.num_elements();
        self.memcpy(src, n, 1, n, n, dst)
    }

    /// Writes `src[src_offset + b*src_batch_stride]` to the
    /// `num_broadcast` elements starting at `dst_offset + b*dst_batch_stride`,
    /// for every batch `b`.
    #[allow(clippy::too_many_arguments)]
    pub fn broadcast(
        &self,
        src: &DeviceTensor,
        src_offset: usize,
        src_batch_stride: usize,
        dst: &DeviceTensor,
        dst_offset: usize,
        dst_batch_stride: usize,
        num_broadcast: usize,
        num_batches: usize,
    ) -> Result<Event, TensorError> {
        const OP: &str = "broadcast";
        validate::compact(OP, src)?;
        validate::compact(OP, dst)?;
        if num_broadcast > 0 {
            validate::extent(OP, src, src_offset, 1, src_batch_stride, num_batches)?;
        }
        validate::extent(
            OP,
            dst,
            dst_offset,
            num_broadcast,
            dst_batch_stride,
            num_batches,
        )?;
        Ok(self.enqueue(DeviceOp::Broadcast {
            src: src.clone(),
            src_offset,
            src_batch_stride,
            dst: dst.clone(),
            dst_offset,
            dst_batch_stride,
            num_broadcast,
            num_batches,
        }))
    }

    /// `dst[i] = src[index[i]]` for a vector `src`, or `src[i][index[i]]`
    /// for a matrix with one row per index.
    ///
    /// Out-of-range indices produce [`Compact8::INF`].
    pub fn gather(
        &self,
        src: &DeviceTensor,
        index: &DeviceTensor,
        dst: &DeviceTensor,
    ) -> Result<Event, TensorError> {
        const OP: &str = "gather";
        validate::compact(OP, src)?;
        validate::compact(OP, dst)?;
        validate::dense(OP, index, DType::U32)?;
        validate::rank(OP, src, &[1, 2])?;
        validate::rank(OP, index, &[1])?;
        validate::rank(OP, dst, &[1])?;
        validate::same_size(OP, index, dst)?;
        if src.rank() == 2 {
            validate::numel(OP, index, src.size(0))?;
        }
        validate::distinct(OP, dst, src)?;
        Ok(self.enqueue(DeviceOp::Gather {
            src: src.clone(),
            index: index.clone(),
            invalid: Compact8::INF,
            dst: dst.clone(),
        }))
    }

    /// `dst[index[i]] = src[i]` for a vector `dst`, or
    /// `dst[i][index[i]] = src[i]` for a matrix with one row per index.
    ///
    /// Out-of-range indices are skipped. The order in which duplicate
    /// indices are written is unspecified.
    pub fn scatter(
        &self,
        src: &DeviceTensor,
        index: &DeviceTensor,
        dst: &DeviceTensor,
    ) -> Result<Event, TensorError> {
        const OP: &str = "scatter";
        validate::compact(OP, src)?;
        validate::compact(OP, dst)?;
        validate::dense(OP, index, DType::U32)?;
        validate::rank(OP, src, &[1])?;
        validate::rank(OP, index, &[1])?;
        validate::rank(OP, dst, &[1, 2])?;
        validate::same_size(OP, src, index)?;
        if dst.rank() == 2 {
            validate::numel(OP, index, dst.size(0))?;
        }
        validate::distinct(OP, dst, src)?;
        Ok(self.enqueue(DeviceOp::Scatter {
            src: src.clone(),
            index: index.clone(),
            dst: dst.clone(),
        }))
    }

    /// `out[j][i] = input[i][j]`.
    pub fn transpose2d(
        &self,
        input: &DeviceTensor,
        out: &DeviceTensor,
    ) -> Result<Event, TensorError> {
        const OP: &str = "transpose2d";
        validate::compact(OP, input)?;
        validate::compact(OP, out)?;
        validate::rank(OP, input, &[2])?;
        validate::shape(OP, out, Shape::matrix(input.size(1), input.size(0)))?;
        validate::distinct(OP, out, input)?;
        Ok(self.enqueue(DeviceOp::Transpose2d {
            input: input.clone(),
            out: out.clone(),
        }))
    }
}
