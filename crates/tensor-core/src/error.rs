// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for tensor views and operation dispatch.

use crate::{DType, Shape};
use device::DeviceError;

/// Errors that can occur while building views or validating operations.
///
/// Every variant except [`TensorError::Device`] is raised synchronously,
/// before anything is enqueued.
#[derive(Debug, thiserror::Error)]
pub enum TensorError {
    /// A size, rank or contiguity requirement was not met.
    #[error("shape error in {op}: {detail}")]
    Shape { op: &'static str, detail: String },

    /// Two tensors have incompatible shapes for the requested operation.
    #[error("incompatible shapes for {op}: {lhs} vs {rhs}")]
    ShapeMismatch {
        op: &'static str,
        lhs: Shape,
        rhs: Shape,
    },

    /// The provided buffer size does not match the expected size for the given shape and dtype.
    #[error("buffer size mismatch: expected {expected} bytes, got {actual}")]
    BufferSizeMismatch { expected: usize, actual: usize },

    /// The requested data type is not supported for this operation.
    #[error("unsupported dtype {dtype} for operation {op}")]
    UnsupportedDType { op: &'static str, dtype: DType },

    /// A dimension, index or extent is out of bounds.
    #[error("range error in {op}: {detail}")]
    Range { op: &'static str, detail: String },

    /// A reinterpretation would misalign elements.
    #[error("alignment error in {op}: {detail}")]
    Alignment { op: &'static str, detail: String },

    /// A view or operation would alias memory it must not.
    #[error("aliasing error in {op}: {detail}")]
    Aliasing { op: &'static str, detail: String },

    /// Allocation, transfer or kernel failure from the device layer.
    #[error(transparent)]
    Device(#[from] DeviceError),
}

/// Coarse classification of a [`TensorError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Shape,
    Range,
    Alignment,
    Aliasing,
    OutOfMemory,
    Device,
}

impl TensorError {
    pub(crate) fn shape(op: &'static str, detail: impl Into<String>) -> Self {
        Self::Shape {
            op,
            detail: detail.into(),
        }
    }

    pub(crate) fn range(op: &'static str, detail: impl Into<String>) -> Self {
        Self::Range {
            op,
            detail: detail.into(),
        }
    }

    pub(crate) fn alignment(op: &'static str, detail: impl Into<String>) -> Self {
        Self::Alignment {
            op,
            detail: detail.into(),
        }
    }

    pub(crate) fn aliasing(op: &'static str, detail: impl Into<String>) -> Self {
        Self::Aliasing {
            op,
            detail: detail.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            TensorError::Shape { .. }
            | TensorError::ShapeMismatch { .. }
            | TensorError::BufferSizeMismatch { .. }
            | TensorError::UnsupportedDType { .. } => ErrorKind::Shape,
            TensorError::Range { .. } => ErrorKind::Range,
            TensorError::Alignment { .. } => ErrorKind::Alignment,
            TensorError::Aliasing { .. } => ErrorKind::Aliasing,
            TensorError::Device(DeviceError::OutOfMemory { .. }) => ErrorKind::OutOfMemory,
            TensorError::Device(DeviceError::RegionOutOfBounds { .. }) => ErrorKind::Range,
            TensorError::Device(_) => ErrorKind::Device,
        }
    }
}
