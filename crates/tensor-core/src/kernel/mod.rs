// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The kernel interface between the dispatch layer and a device.
//!
//! The dispatcher turns every validated call into one [`DeviceOp`] and
//! hands it to a [`KernelBackend`] on the queue's worker thread. Backends
//! perform no validation of their own; they may assume every precondition the
//! dispatcher checks.

mod reference;

pub use reference::ReferenceBackend;

use crate::{Compact8, DeviceTensor, RoundingMode};
use device::DeviceError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Elementwise arithmetic selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MathOp {
    Add,
    Sub,
    Mul,
    Div,
    Min,
    Max,
}

/// Comparison selector for thresholding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

/// In-place unary special functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnaryOp {
    Ln,
    Exp,
    Reciprocal,
    Sqrt,
    Sigmoid,
}

/// Window reduction for 2-d pooling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolOp {
    Max,
    /// Mean over the full window; padding taps count as zero.
    Avg,
}

impl UnaryOp {
    pub fn kernel_name(self) -> &'static str {
        match self {
            UnaryOp::Ln => "ln_8",
            UnaryOp::Exp => "exp_8",
            UnaryOp::Reciprocal => "inv_8",
            UnaryOp::Sqrt => "sqrt_8",
            UnaryOp::Sigmoid => "sigmoid_8",
        }
    }
}

/// Input and output scale exponents of a product kernel.
///
/// Products are multiplied by `2^input` before accumulation and the sum by
/// `2^output` before it is rounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Scales {
    pub input: i8,
    pub output: i8,
}

impl Scales {
    pub fn new(input: i8, output: i8) -> Self {
        Self { input, output }
    }
}

/// One argument of an elementwise kernel.
#[derive(Debug, Clone)]
pub enum Operand {
    /// A full tensor, one value per output element.
    Tensor(DeviceTensor),
    /// A single-element device tensor applied to every output element.
    DeviceScalar(DeviceTensor),
    /// A value passed with the launch.
    Host(Compact8),
}

impl Operand {
    pub fn tensor(&self) -> Option<&DeviceTensor> {
        match self {
            Operand::Tensor(t) | Operand::DeviceScalar(t) => Some(t),
            Operand::Host(_) => None,
        }
    }
}

impl From<DeviceTensor> for Operand {
    fn from(t: DeviceTensor) -> Self {
        Operand::Tensor(t)
    }
}

impl From<&DeviceTensor> for Operand {
    fn from(t: &DeviceTensor) -> Self {
        Operand::Tensor(t.clone())
    }
}

impl From<Compact8> for Operand {
    fn from(v: Compact8) -> Self {
        Operand::Host(v)
    }
}

/// A fully validated kernel launch.
///
/// Element offsets and batch strides are in elements of the tensors they
/// index, which are contiguous.
#[derive(Debug, Clone)]
pub enum DeviceOp {
    /// `out[i] = op(a[i], b[i])`.
    Binary {
        a: Operand,
        b: Operand,
        op: MathOp,
        rounding: RoundingMode,
        out: DeviceTensor,
    },
    /// Full reduction of `a` into the single element of `out`.
    Reduce {
        a: DeviceTensor,
        op: MathOp,
        rounding: RoundingMode,
        out: DeviceTensor,
    },
    /// `c = beta*c + A·B`, batched over the leading dimension of `c`.
    MatMul {
        a: DeviceTensor,
        b: DeviceTensor,
        beta: bool,
        rounding: RoundingMode,
        scales: Scales,
        c: DeviceTensor,
    },
    /// `y = beta*y + A·x`.
    MatVec {
        a: DeviceTensor,
        x: DeviceTensor,
        beta: bool,
        rounding: RoundingMode,
        scales: Scales,
        y: DeviceTensor,
    },
    /// `out = 2^scale_out * (c*2^scale_c ± a*b*2^scale_ab)`.
    MulAdd {
        c: Operand,
        scale_c: i8,
        a: Operand,
        b: DeviceTensor,
        scale_ab: i8,
        subtract: bool,
        rounding: RoundingMode,
        scale_out: i8,
        out: DeviceTensor,
    },
    /// `out[i] = (a[i] op b) ? sel[i] : 0`.
    Threshold {
        a: DeviceTensor,
        b: Operand,
        sel: DeviceTensor,
        op: CompareOp,
        out: DeviceTensor,
    },
    /// In-place special function.
    Unary { op: UnaryOp, inout: DeviceTensor },
    Memset { value: Compact8, out: DeviceTensor },
    /// `dst[b*dst_batch_stride + i] = src[b*src_batch_stride + i]`.
    Memcpy {
        src: DeviceTensor,
        batch_size: usize,
        num_batches: usize,
        src_batch_stride: usize,
        dst_batch_stride: usize,
        dst: DeviceTensor,
    },
    /// `dst[dst_offset + b*dst_batch_stride + i] = src[src_offset + b*src_batch_stride]`.
    Broadcast {
        src: DeviceTensor,
        src_offset: usize,
        src_batch_stride: usize,
        dst: DeviceTensor,
        dst_offset: usize,
        dst_batch_stride: usize,
        num_broadcast: usize,
        num_batches: usize,
    },
    /// `dst[i] = src[index[i]]` or `src[i][index[i]]`; misses write `invalid`.
    Gather {
        src: DeviceTensor,
        index: DeviceTensor,
        invalid: Compact8,
        dst: DeviceTensor,
    },
    /// `dst[index[i]] = src[i]` or `dst[i][index[i]] = src[i]`; misses are skipped.
    Scatter {
        src: DeviceTensor,
        index: DeviceTensor,
        dst: DeviceTensor,
    },
    Transpose2d { input: DeviceTensor, out: DeviceTensor },
    /// `out = encode(input * 2^exp_adjust)`.
    ToCompact {
        input: DeviceTensor,
        exp_adjust: i8,
        rounding: RoundingMode,
        out: DeviceTensor,
    },
    /// `out = decode(input) * 2^exp_adjust`.
    ToFloat {
        input: DeviceTensor,
        exp_adjust: i8,
        out: DeviceTensor,
    },
    /// Unfolds NCHW `input` into `[batch, channels*k*k, out_h*out_w]`.
    Im2Col {
        input: DeviceTensor,
        kernel: usize,
        pad: (usize, usize),
        stride: usize,
        out: DeviceTensor,
    },
    /// NCHW window reduction into `[batch, channels, out_h, out_w]`:
    /// `out = 2^scales.output * reduce(decode(window) * 2^scales.input)`.
    Pool2d {
        input: DeviceTensor,
        op: PoolOp,
        kernel: usize,
        pad: (usize, usize),
        stride: usize,
        rounding: RoundingMode,
        scales: Scales,
        out: DeviceTensor,
    },
    Eye { out: DeviceTensor },
    /// Fills `out` with values drawn uniformly from `[low, high)`.
    Uniform { low: f32, high: f32, out: DeviceTensor },
    /// Fills `out` with normally distributed values.
    Gaussian { mean: f32, stddev: f32, out: DeviceTensor },
}

impl DeviceOp {
    /// Kernel identifier, also used as the event label.
    pub fn name(&self) -> &'static str {
        match self {
            DeviceOp::Binary { .. } => "binary_math_8",
            DeviceOp::Reduce { .. } => "reduce_8",
            DeviceOp::MatMul { .. } => "mm_8",
            DeviceOp::MatVec { .. } => "mv_8",
            DeviceOp::MulAdd { .. } => "mul_add_8",
            DeviceOp::Threshold { .. } => "threshold_8",
            DeviceOp::Unary { op, .. } => op.kernel_name(),
            DeviceOp::Memset { .. } => "memset_8",
            DeviceOp::Memcpy { .. } => "memcpy_8",
            DeviceOp::Broadcast { .. } => "broadcast_8",
            DeviceOp::Gather { .. } => "gather_8",
            DeviceOp::Scatter { .. } => "scatter_8",
            DeviceOp::Transpose2d { .. } => "transpose2d_8",
            DeviceOp::ToCompact { .. } => "to_compact_8",
            DeviceOp::ToFloat { .. } => "to_float_8",
            DeviceOp::Im2Col { .. } => "im2col_8",
            DeviceOp::Pool2d { .. } => "pool2d_8",
            DeviceOp::Eye { .. } => "eye_8",
            DeviceOp::Uniform { .. } => "uniform_8",
            DeviceOp::Gaussian { .. } => "gaussian_8",
        }
    }
}

/// Executes [`DeviceOp`]s.
///
/// `launch` runs on a queue worker thread. A returned error completes the
/// command's event with that error.
pub trait KernelBackend: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    fn launch(&self, op: &DeviceOp) -> Result<(), DeviceError>;
}
