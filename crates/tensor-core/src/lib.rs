// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # tensor-core
//!
//! Strided tensors over host and device memory, the 8-bit compact float
//! format, and the validated dispatch layer that issues compact-float
//! kernels.
//!
//! This crate provides:
//! - [`Compact8`] and [`RoundingMode`]: the quantized element format.
//! - [`Shape`], [`Layout`] and [`StridedTensor`] (aliased as
//!   [`DeviceTensor`] and [`HostTensor`]): zero-copy views with explicit
//!   strides.
//! - [`Dispatcher`]: elementwise math, reductions, matrix products,
//!   gather/scatter, conversion and memory movement, validated before
//!   anything is enqueued.
//! - [`KernelBackend`] and the host [`ReferenceBackend`].
//! - [`calc_output_size`] for convolution and pooling shapes.
//!
//! ```
//! use device::{Context, MemoryBudget};
//! use tensor_core::{Compact8, DType, DeviceTensor, Dispatcher, HostTensor, RoundingMode};
//!
//! let ctx = Context::with_budget(MemoryBudget::from_mb(1))?;
//! let ops = Dispatcher::reference(&ctx, 0);
//! let host = HostTensor::from_slice([3], &[Compact8::ONE; 3])?;
//! let (a, _) = DeviceTensor::upload(&ctx, ops.queue(), &host)?;
//! let out = DeviceTensor::new(&ctx, DType::Compact8, [3])?;
//! ops.add(&a, &a, RoundingMode::NearestEven, &out)?.wait()?;
//! assert_eq!(out.to_host(ops.queue())?.get::<Compact8>(&[2])?.to_f32(), 2.0);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

mod compact;
mod conv;
mod dtype;
mod error;
pub mod kernel;
mod layout;
mod ops;
mod shape;
mod tensor;

pub use compact::{Compact8, RoundingMode};
pub use conv::{calc_output_size, output_extent};
pub use dtype::{from_bytes, to_bytes, DType, Element};
pub use error::{ErrorKind, TensorError};
pub use kernel::{
    CompareOp, DeviceOp, KernelBackend, MathOp, Operand, PoolOp, ReferenceBackend, Scales, UnaryOp,
};
pub use layout::{ElementOffsets, Layout};
pub use ops::Dispatcher;
pub use shape::Shape;
pub use tensor::{DeviceTensor, HostTensor, StridedTensor};
