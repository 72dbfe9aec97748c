// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! `f32` ⇄ `Compact8` conversion on the device.

use super::{validate, Dispatcher};
use crate::kernel::DeviceOp;
use crate::{DType, DeviceTensor, RoundingMode, TensorError};
use device::Event;

impl Dispatcher {
    /// Quantizes `input * 2^exp_adjust` into `out`.
    pub fn to_compact(
        &self,
        input: &DeviceTensor,
        exp_adjust: i8,
        rounding: RoundingMode,
        out: &DeviceTensor,
    ) -> Result<Event, TensorError> {
        const OP: &str = "to_compact";
        validate::dense(OP, input, DType::F32)?;
        validate::compact(OP, out)?;
        validate::same_size(OP, input, out)?;
        Ok(self.enqueue(DeviceOp::ToCompact {
            input: input.clone(),
            exp_adjust,
            rounding,
            out: out.clone(),
        }))
    }

    /// Dequantizes `input` into `out` as `decode(input) * 2^exp_adjust`.
    /// `INF` becomes NaN.
    pub fn to_float(
        &self,
        input: &DeviceTensor,
        exp_adjust: i8,
        out: &DeviceTensor,
    ) -> Result<Event, TensorError> {
        const OP: &str = "to_float";
        validate::compact(OP, input)?;
        validate::dense(OP, out, DType::F32)?;
        validate::same_size(OP, input, out)?;
        Ok(self.enqueue(DeviceOp::ToFloat {
            input: input.clone(),
            exp_adjust,
            out: out.clone(),
        }))
    }
}
