// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Operand checks shared by the dispatch methods.

use crate::kernel::Operand;
use crate::{DType, DeviceTensor, Shape, TensorError};

pub(super) fn dtype(op: &'static str, t: &DeviceTensor, expected: DType) -> Result<(), TensorError> {
    if t.dtype() != expected {
        return Err(TensorError::UnsupportedDType {
            op,
            dtype: t.dtype(),
        });
    }
    Ok(())
}

pub(super) fn contiguous(op: &'static str, t: &DeviceTensor) -> Result<(), TensorError> {
    if !t.is_contiguous() {
        return Err(TensorError::shape(
            op,
            format!("tensor {} with strides {:?} is not contiguous", t.shape(), t.strides()),
        ));
    }
    Ok(())
}

/// A contiguous tensor of `dtype`.
pub(super) fn dense(op: &'static str, t: &DeviceTensor, expected: DType) -> Result<(), TensorError> {
    dtype(op, t, expected)?;
    contiguous(op, t)
}

/// A contiguous `Compact8` tensor.
pub(super) fn compact(op: &'static str, t: &DeviceTensor) -> Result<(), TensorError> {
    dense(op, t, DType::Compact8)
}

pub(super) fn rank(op: &'static str, t: &DeviceTensor, allowed: &[usize]) -> Result<(), TensorError> {
    if !allowed.contains(&t.rank()) {
        return Err(TensorError::shape(
            op,
            format!("rank {} not in {allowed:?}", t.rank()),
        ));
    }
    Ok(())
}

pub(super) fn numel(op: &'static str, t: &DeviceTensor, expected: usize) -> Result<(), TensorError> {
    if t.num_elements() != expected {
        return Err(TensorError::shape(
            op,
            format!(
                "expected {expected} elements, tensor {} has {}",
                t.shape(),
                t.num_elements()
            ),
        ));
    }
    Ok(())
}

pub(super) fn same_size(op: &'static str, a: &DeviceTensor, b: &DeviceTensor) -> Result<(), TensorError> {
    if !a.is_same_size(b) {
        return Err(TensorError::ShapeMismatch {
            op,
            lhs: a.shape().clone(),
            rhs: b.shape().clone(),
        });
    }
    Ok(())
}

pub(super) fn shape(op: &'static str, t: &DeviceTensor, expected: Shape) -> Result<(), TensorError> {
    if t.shape() != &expected {
        return Err(TensorError::ShapeMismatch {
            op,
            lhs: expected,
            rhs: t.shape().clone(),
        });
    }
    Ok(())
}

/// `out` must not be the same instance as `input`.
pub(super) fn distinct(op: &'static str, out: &DeviceTensor, input: &DeviceTensor) -> Result<(), TensorError> {
    if out.is_same_instance(input) {
        return Err(TensorError::aliasing(
            op,
            "output must be distinct from its inputs",
        ));
    }
    Ok(())
}

/// An elementwise operand for an output of `n` elements.
pub(super) fn operand(op: &'static str, operand: &Operand, n: usize) -> Result<(), TensorError> {
    match operand {
        Operand::Tensor(t) => {
            compact(op, t)?;
            numel(op, t, n)
        }
        Operand::DeviceScalar(t) => {
            compact(op, t)?;
            numel(op, t, 1)
        }
        Operand::Host(_) => Ok(()),
    }
}

/// `batches` runs of `len` elements `stride` apart, starting at `start`,
/// must fit inside `t`.
pub(super) fn extent(
    op: &'static str,
    t: &DeviceTensor,
    start: usize,
    len: usize,
    stride: usize,
    batches: usize,
) -> Result<(), TensorError> {
    if batches == 0 || len == 0 {
        return Ok(());
    }
    let end = (batches - 1)
        .checked_mul(stride)
        .and_then(|v| v.checked_add(start))
        .and_then(|v| v.checked_add(len));
    match end {
        Some(end) if end <= t.num_elements() => Ok(()),
        _ => Err(TensorError::range(
            op,
            format!(
                "{batches} batches of {len} elements with stride {stride} from {start} exceed {} elements",
                t.num_elements()
            ),
        )),
    }
}
