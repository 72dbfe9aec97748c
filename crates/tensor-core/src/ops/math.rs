// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Elementwise arithmetic, reductions and products.

use super::{validate, Dispatcher};
use crate::kernel::{CompareOp, DeviceOp, MathOp, Operand, Scales, UnaryOp};
use crate::{DeviceTensor, RoundingMode, Shape, TensorError};
use device::Event;

impl Dispatcher {
    /// `out[i] = op(a[i], b[i])`.
    ///
    /// Tensor operands must match `out` in element count, and two full
    /// tensors must also match each other in size. Scalar operands apply to
    /// every element.
    pub fn binary(
        &self,
        a: impl Into<Operand>,
        b: impl Into<Operand>,
        op: MathOp,
        rounding: RoundingMode,
        out: &DeviceTensor,
    ) -> Result<Event, TensorError> {
        const OP: &str = "binary";
        let (a, b) = (a.into(), b.into());
        validate::compact(OP, out)?;
        let n = out.num_elements();
        validate::operand(OP, &a, n)?;
        validate::operand(OP, &b, n)?;
        if let (Operand::Tensor(x), Operand::Tensor(y)) = (&a, &b) {
            validate::same_size(OP, x, y)?;
        }
        Ok(self.enqueue(DeviceOp::Binary {
            a,
            b,
            op,
            rounding,
            out: out.clone(),
        }))
    }

    pub fn add(
        &self,
        a: impl Into<Operand>,
        b: impl Into<Operand>,
        rounding: RoundingMode,
        out: &DeviceTensor,
    ) -> Result<Event, TensorError> {
        self.binary(a, b, MathOp::Add, rounding, out)
    }

    pub fn sub(
        &self,
        a: impl Into<Operand>,
        b: impl Into<Operand>,
        rounding: RoundingMode,
        out: &DeviceTensor,
    ) -> Result<Event, TensorError> {
        self.binary(a, b, MathOp::Sub, rounding, out)
    }

    pub fn mul(
        &self,
        a: impl Into<Operand>,
        b: impl Into<Operand>,
        rounding: RoundingMode,
        out: &DeviceTensor,
    ) -> Result<Event, TensorError> {
        self.binary(a, b, MathOp::Mul, rounding, out)
    }

    /// Division by zero yields `INF`.
    pub fn div(
        &self,
        a: impl Into<Operand>,
        b: impl Into<Operand>,
        rounding: RoundingMode,
        out: &DeviceTensor,
    ) -> Result<Event, TensorError> {
        self.binary(a, b, MathOp::Div, rounding, out)
    }

    pub fn min(
        &self,
        a: impl Into<Operand>,
        b: impl Into<Operand>,
        out: &DeviceTensor,
    ) -> Result<Event, TensorError> {
        self.binary(a, b, MathOp::Min, RoundingMode::NearestEven, out)
    }

    pub fn max(
        &self,
        a: impl Into<Operand>,
        b: impl Into<Operand>,
        out: &DeviceTensor,
    ) -> Result<Event, TensorError> {
        self.binary(a, b, MathOp::Max, RoundingMode::NearestEven, out)
    }

    /// Reduces every element of `a` into the single element of `out`.
    ///
    /// Only `Add`, `Min` and `Max` are reductions. Sums are exact and
    /// rounded once.
    pub fn reduce(
        &self,
        a: &DeviceTensor,
        op: MathOp,
        rounding: RoundingMode,
        out: &DeviceTensor,
    ) -> Result<Event, TensorError> {
        const OP: &str = "reduce";
        if !matches!(op, MathOp::Add | MathOp::Min | MathOp::Max) {
            return Err(TensorError::shape(OP, format!("{op:?} is not a reduction")));
        }
        validate::compact(OP, a)?;
        validate::compact(OP, out)?;
        validate::numel(OP, out, 1)?;
        Ok(self.enqueue(DeviceOp::Reduce {
            a: a.clone(),
            op,
            rounding,
            out: out.clone(),
        }))
    }

    /// `c = (beta ? c : 0) + 2^(in+out) * A·B`.
    ///
    /// `a` is `[M, K]` or `[batch, M, K]`, `b` is `[K, N]` or
    /// `[batch, K, N]` and `c` is `[M, N]`, or `[batch, M, N]` when either
    /// input is batched. A non-batched input is shared by every batch.
    pub fn matmul(
        &self,
        a: &DeviceTensor,
        b: &DeviceTensor,
        beta: bool,
        rounding: RoundingMode,
        scales: Scales,
        c: &DeviceTensor,
    ) -> Result<Event, TensorError> {
        const OP: &str = "matmul";
        for t in [a, b, c] {
            validate::compact(OP, t)?;
            validate::rank(OP, t, &[2, 3])?;
        }
        let (ar, br) = (a.rank(), b.rank());
        let (m, k) = (a.size(ar - 2), a.size(ar - 1));
        if b.size(br - 2) != k {
            return Err(TensorError::ShapeMismatch {
                op: OP,
                lhs: a.shape().clone(),
                rhs: b.shape().clone(),
            });
        }
        let n = b.size(br - 1);

        let batch = match (ar, br) {
            (3, 3) if a.size(0) != b.size(0) => {
                return Err(TensorError::ShapeMismatch {
                    op: OP,
                    lhs: a.shape().clone(),
                    rhs: b.shape().clone(),
                })
            }
            (3, _) => Some(a.size(0)),
            (_, 3) => Some(b.size(0)),
            _ => None,
        };
        let expected = match batch {
            Some(batch) => Shape::new(vec![batch, m, n]),
            None if c.rank() == 3 => Shape::new(vec![c.size(0), m, n]),
            None => Shape::matrix(m, n),
        };
        validate::shape(OP, c, expected)?;
        validate::distinct(OP, c, a)?;
        validate::distinct(OP, c, b)?;

        Ok(self.enqueue(DeviceOp::MatMul {
            a: a.clone(),
            b: b.clone(),
            beta,
            rounding,
            scales,
            c: c.clone(),
        }))
    }

    /// `y = (beta ? y : 0) + 2^(in+out) * A·x` for `A: [M, K]`, `x: [K]`.
    pub fn matvec(
        &self,
        a: &DeviceTensor,
        x: &DeviceTensor,
        beta: bool,
        rounding: RoundingMode,
        scales: Scales,
        y: &DeviceTensor,
    ) -> Result<Event, TensorError> {
        const OP: &str = "matvec";
        for t in [a, x, y] {
            validate::compact(OP, t)?;
        }
        validate::rank(OP, a, &[2])?;
        validate::rank(OP, x, &[1])?;
        validate::rank(OP, y, &[1])?;
        validate::shape(OP, x, Shape::vector(a.size(1)))?;
        validate::shape(OP, y, Shape::vector(a.size(0)))?;
        validate::distinct(OP, y, a)?;
        validate::distinct(OP, y, x)?;
        Ok(self.enqueue(DeviceOp::MatVec {
            a: a.clone(),
            x: x.clone(),
            beta,
            rounding,
            scales,
            y: y.clone(),
        }))
    }

    /// `out = 2^scale_out * (c*2^scale_c ± a*b*2^scale_ab)`.
    ///
    /// `b` is always a full tensor; `c` and `a` may be scalars.
    #[allow(clippy::too_many_arguments)]
    pub fn mul_add(
        &self,
        c: impl Into<Operand>,
        scale_c: i8,
        a: impl Into<Operand>,
        b: &DeviceTensor,
        scale_ab: i8,
        subtract: bool,
        rounding: RoundingMode,
        scale_out: i8,
        out: &DeviceTensor,
    ) -> Result<Event, TensorError> {
        const OP: &str = "mul_add";
        let (c, a) = (c.into(), a.into());
        validate::compact(OP, b)?;
        validate::compact(OP, out)?;
        let n = out.num_elements();
        validate::numel(OP, b, n)?;
        validate::operand(OP, &c, n)?;
        validate::operand(OP, &a, n)?;
        Ok(self.enqueue(DeviceOp::MulAdd {
            c,
            scale_c,
            a,
            b: b.clone(),
            scale_ab,
            subtract,
            rounding,
            scale_out,
            out: out.clone(),
        }))
    }

    /// `out[i] = (a[i] op b[i]) ? sel[i] : 0`.
    pub fn threshold(
        &self,
        a: &DeviceTensor,
        b: impl Into<Operand>,
        sel: &DeviceTensor,
        op: CompareOp,
        out: &DeviceTensor,
    ) -> Result<Event, TensorError> {
        const OP: &str = "threshold";
        let b = b.into();
        for t in [a, sel, out] {
            validate::compact(OP, t)?;
        }
        validate::same_size(OP, a, out)?;
        validate::same_size(OP, sel, out)?;
        validate::operand(OP, &b, out.num_elements())?;
        Ok(self.enqueue(DeviceOp::Threshold {
            a: a.clone(),
            b,
            sel: sel.clone(),
            op,
            out: out.clone(),
        }))
    }

    /// Applies `op` to `input`, writing `out`.
    ///
    /// When `out` is not `input` itself, `input` is first copied into it and
    /// the kernel then runs in place on `out`. The returned event is that of
    /// the kernel.
    pub fn unary(
        &self,
        op: UnaryOp,
        input: &DeviceTensor,
        out: &DeviceTensor,
    ) -> Result<Event, TensorError> {
        const OP: &str = "unary";
        validate::compact(OP, input)?;
        validate::compact(OP, out)?;
        validate::numel(OP, out, input.num_elements())?;
        if !out.is_same_instance(input) {
            let n = input.num_elements();
            self.enqueue(DeviceOp::Memcpy {
                src: input.clone(),
                batch_size: n,
                num_batches: 1,
                src_batch_stride: n,
                dst_batch_stride: n,
                dst: out.clone(),
            });
        }
        Ok(self.enqueue(DeviceOp::Unary {
            op,
            inout: out.clone(),
        }))
    }

    /// Natural logarithm; non-positive inputs yield `INF`.
    pub fn ln(&self, input: &DeviceTensor, out: &DeviceTensor) -> Result<Event, TensorError> {
        self.unary(UnaryOp::Ln, input, out)
    }

    pub fn exp(&self, input: &DeviceTensor, out: &DeviceTensor) -> Result<Event, TensorError> {
        self.unary(UnaryOp::Exp, input, out)
    }

    pub fn reciprocal(
        &self,
        input: &DeviceTensor,
        out: &DeviceTensor,
    ) -> Result<Event, TensorError> {
        self.unary(UnaryOp::Reciprocal, input, out)
    }

    pub fn sqrt(&self, input: &DeviceTensor, out: &DeviceTensor) -> Result<Event, TensorError> {
        self.unary(UnaryOp::Sqrt, input, out)
    }

    pub fn sigmoid(&self, input: &DeviceTensor, out: &DeviceTensor) -> Result<Event, TensorError> {
        self.unary(UnaryOp::Sigmoid, input, out)
    }
}
