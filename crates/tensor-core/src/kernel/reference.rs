// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Host emulation of the compact-float kernels.
//!
//! Every kernel decodes its inputs to `f64`, computes exactly where `f64`
//! allows (dot products accumulate without intermediate rounding, like a
//! quire), and rounds once when encoding the result. `INF` inputs decode to
//! NaN and therefore propagate to `INF` outputs.
//!
//! Inputs are read in full before any output is written, so in-place and
//! aliased launches see the pre-launch values.

use super::{CompareOp, DeviceOp, KernelBackend, MathOp, Operand, PoolOp, Scales, UnaryOp};
use crate::compact::pow2;
use crate::conv::output_extent;
use crate::{Compact8, DeviceTensor, RoundingMode, TensorError};
use device::DeviceError;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Reference [`KernelBackend`] running on the queue's worker thread.
///
/// Stochastic rounding and the random initialisers draw from one generator;
/// a seeded backend gives reproducible results for a fixed launch order.
#[derive(Debug)]
pub struct ReferenceBackend {
    rng: Mutex<StdRng>,
    launches: AtomicU64,
}

impl ReferenceBackend {
    /// A backend seeded from system entropy.
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    pub fn seeded(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    fn with_rng(rng: StdRng) -> Self {
        Self {
            rng: Mutex::new(rng),
            launches: AtomicU64::new(0),
        }
    }

    /// Kernels launched so far.
    pub fn launches(&self) -> u64 {
        self.launches.load(Ordering::Relaxed)
    }

    fn execute(&self, op: &DeviceOp, rng: &mut StdRng) -> Result<(), TensorError> {
        match op {
            DeviceOp::Binary {
                a,
                b,
                op,
                rounding,
                out,
            } => binary(a, b, *op, *rounding, out, rng),
            DeviceOp::Reduce {
                a,
                op,
                rounding,
                out,
            } => reduce(a, *op, *rounding, out, rng),
            DeviceOp::MatMul {
                a,
                b,
                beta,
                rounding,
                scales,
                c,
            } => matmul(a, b, *beta, *rounding, *scales, c, rng),
            DeviceOp::MatVec {
                a,
                x,
                beta,
                rounding,
                scales,
                y,
            } => {
                let (m, k) = (a.size(0), a.size(1));
                let y_old = if *beta { decode(y)? } else { Vec::new() };
                let result = dot_rows(&decode(a)?, &decode(x)?, m, k, 1, *scales, |i| {
                    y_old.get(i).copied().unwrap_or(0.0)
                });
                encode_into(y, result, *rounding, rng)
            }
            DeviceOp::MulAdd {
                c,
                scale_c,
                a,
                b,
                scale_ab,
                subtract,
                rounding,
                scale_out,
                out,
            } => {
                let (c, a, b) = (Values::load(c)?, Values::load(a)?, decode(b)?);
                let result = b.iter().enumerate().map(|(i, &bv)| {
                    let base = c.get(i).to_f64() * pow2(*scale_c);
                    let prod = a.get(i).to_f64() * bv * pow2(*scale_ab);
                    let sum = if *subtract { base - prod } else { base + prod };
                    sum * pow2(*scale_out)
                });
                encode_into(out, result.collect(), *rounding, rng)
            }
            DeviceOp::Threshold { a, b, sel, op, out } => {
                let (a, b, sel) = (decode(a)?, Values::load(b)?, load(sel)?);
                let result: Vec<Compact8> = a
                    .iter()
                    .enumerate()
                    .map(|(i, &x)| {
                        if compare(x, b.get(i).to_f64(), *op) {
                            sel[i]
                        } else {
                            Compact8::ZERO
                        }
                    })
                    .collect();
                out.write_elements(&result)
            }
            DeviceOp::Unary { op, inout } => {
                let result = decode(inout)?.into_iter().map(|x| unary(*op, x)).collect();
                encode_into(inout, result, RoundingMode::NearestEven, rng)
            }
            DeviceOp::Memset { value, out } => {
                out.write_elements(&vec![*value; out.num_elements()])
            }
            DeviceOp::Memcpy {
                src,
                batch_size,
                num_batches,
                src_batch_stride,
                dst_batch_stride,
                dst,
            } => {
                let src_values = load(src)?;
                let mut dst_values = load(dst)?;
                for b in 0..*num_batches {
                    let s = b * src_batch_stride;
                    let d = b * dst_batch_stride;
                    dst_values[d..d + batch_size].copy_from_slice(&src_values[s..s + batch_size]);
                }
                dst.write_elements(&dst_values)
            }
            DeviceOp::Broadcast {
                src,
                src_offset,
                src_batch_stride,
                dst,
                dst_offset,
                dst_batch_stride,
                num_broadcast,
                num_batches,
            } => {
                let src_values = load(src)?;
                let mut dst_values = load(dst)?;
                for b in 0..*num_batches {
                    let value = src_values[src_offset + b * src_batch_stride];
                    let d = dst_offset + b * dst_batch_stride;
                    dst_values[d..d + num_broadcast].fill(value);
                }
                dst.write_elements(&dst_values)
            }
            DeviceOp::Gather {
                src,
                index,
                invalid,
                dst,
            } => {
                let src_values = load(src)?;
                let indices = index.read_elements::<u32>()?;
                let row_len = if src.rank() == 2 { src.size(1) } else { src.size(0) };
                let result: Vec<Compact8> = indices
                    .iter()
                    .enumerate()
                    .map(|(i, &idx)| {
                        let idx = idx as usize;
                        let row = if src.rank() == 2 { i * row_len } else { 0 };
                        if idx < row_len {
                            src_values[row + idx]
                        } else {
                            *invalid
                        }
                    })
                    .collect();
                dst.write_elements(&result)
            }
            DeviceOp::Scatter { src, index, dst } => {
                let src_values = load(src)?;
                let indices = index.read_elements::<u32>()?;
                let mut dst_values = load(dst)?;
                let row_len = if dst.rank() == 2 { dst.size(1) } else { dst.size(0) };
                // Applied in index order: with duplicate indices the last write wins.
                for (i, (&idx, &value)) in indices.iter().zip(&src_values).enumerate() {
                    let idx = idx as usize;
                    if idx >= row_len {
                        continue;
                    }
                    let row = if dst.rank() == 2 { i * row_len } else { 0 };
                    dst_values[row + idx] = value;
                }
                dst.write_elements(&dst_values)
            }
            DeviceOp::Transpose2d { input, out } => {
                let values = load(input)?;
                let (rows, cols) = (input.size(0), input.size(1));
                let mut result = vec![Compact8::ZERO; values.len()];
                for i in 0..rows {
                    for j in 0..cols {
                        result[j * rows + i] = values[i * cols + j];
                    }
                }
                out.write_elements(&result)
            }
            DeviceOp::ToCompact {
                input,
                exp_adjust,
                rounding,
                out,
            } => {
                let scale = pow2(*exp_adjust);
                let result = input
                    .read_elements::<f32>()?
                    .into_iter()
                    .map(|x| f64::from(x) * scale)
                    .collect();
                encode_into(out, result, *rounding, rng)
            }
            DeviceOp::ToFloat {
                input,
                exp_adjust,
                out,
            } => {
                let result: Vec<f32> = load(input)?
                    .into_iter()
                    .map(|p| p.dequantize(*exp_adjust))
                    .collect();
                out.write_elements(&result)
            }
            DeviceOp::Im2Col {
                input,
                kernel,
                pad,
                stride,
                out,
            } => im2col(input, *kernel, *pad, *stride, out),
            DeviceOp::Pool2d {
                input,
                op,
                kernel,
                pad,
                stride,
                rounding,
                scales,
                out,
            } => {
                let result = pool2d(input, *op, *kernel, *pad, *stride, *scales)?;
                encode_into(out, result, *rounding, rng)
            }
            DeviceOp::Eye { out } => {
                let (rows, cols) = (out.size(0), out.size(1));
                let result: Vec<Compact8> = (0..rows * cols)
                    .map(|i| {
                        if i / cols == i % cols {
                            Compact8::ONE
                        } else {
                            Compact8::ZERO
                        }
                    })
                    .collect();
                out.write_elements(&result)
            }
            DeviceOp::Uniform { low, high, out } => {
                let result: Vec<Compact8> = (0..out.num_elements())
                    .map(|_| {
                        let x = if low < high {
                            rng.gen_range(*low..*high)
                        } else {
                            *low
                        };
                        Compact8::from_f32(x)
                    })
                    .collect();
                out.write_elements(&result)
            }
            DeviceOp::Gaussian { mean, stddev, out } => {
                let normal = Normal::new(*mean, *stddev).map_err(|e| {
                    TensorError::range("gaussian", format!("N({mean}, {stddev}): {e}"))
                })?;
                let result: Vec<Compact8> = (0..out.num_elements())
                    .map(|_| Compact8::from_f32(normal.sample(rng)))
                    .collect();
                out.write_elements(&result)
            }
        }
    }
}

impl Default for ReferenceBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl KernelBackend for ReferenceBackend {
    fn name(&self) -> &str {
        "reference"
    }

    fn launch(&self, op: &DeviceOp) -> Result<(), DeviceError> {
        self.launches.fetch_add(1, Ordering::Relaxed);
        let kernel = op.name();
        let mut rng = self.rng.lock().map_err(|_| DeviceError::LockPoisoned)?;
        self.execute(op, &mut rng).map_err(|e| match e {
            TensorError::Device(inner) => inner,
            other => DeviceError::Kernel {
                kernel,
                detail: other.to_string(),
            },
        })
    }
}

/// Per-element operand values.
enum Values {
    Each(Vec<Compact8>),
    Splat(Compact8),
}

impl Values {
    fn load(operand: &Operand) -> Result<Self, TensorError> {
        Ok(match operand {
            Operand::Tensor(t) => Values::Each(load(t)?),
            Operand::DeviceScalar(t) => {
                Values::Splat(load(t)?.first().copied().unwrap_or(Compact8::INF))
            }
            Operand::Host(v) => Values::Splat(*v),
        })
    }

    fn get(&self, i: usize) -> Compact8 {
        match self {
            Values::Each(v) => v[i],
            Values::Splat(v) => *v,
        }
    }
}

fn load(t: &DeviceTensor) -> Result<Vec<Compact8>, TensorError> {
    t.read_elements::<Compact8>()
}

fn decode(t: &DeviceTensor) -> Result<Vec<f64>, TensorError> {
    Ok(load(t)?.into_iter().map(Compact8::to_f64).collect())
}

fn encode_into(
    out: &DeviceTensor,
    values: Vec<f64>,
    rounding: RoundingMode,
    rng: &mut StdRng,
) -> Result<(), TensorError> {
    let codes: Vec<Compact8> = values
        .into_iter()
        .map(|x| Compact8::round_from(x, rounding, rng))
        .collect();
    out.write_elements(&codes)
}

fn binary(
    a: &Operand,
    b: &Operand,
    op: MathOp,
    rounding: RoundingMode,
    out: &DeviceTensor,
    rng: &mut StdRng,
) -> Result<(), TensorError> {
    let (a, b) = (Values::load(a)?, Values::load(b)?);
    let result: Vec<Compact8> = (0..out.num_elements())
        .map(|i| apply_math(a.get(i), b.get(i), op, rounding, rng))
        .collect();
    out.write_elements(&result)
}

fn apply_math(
    x: Compact8,
    y: Compact8,
    op: MathOp,
    rounding: RoundingMode,
    rng: &mut StdRng,
) -> Compact8 {
    if x.is_inf() || y.is_inf() {
        return Compact8::INF;
    }
    let (a, b) = (x.to_f64(), y.to_f64());
    let exact = match op {
        MathOp::Min => return if a <= b { x } else { y },
        MathOp::Max => return if a >= b { x } else { y },
        MathOp::Add => a + b,
        MathOp::Sub => a - b,
        MathOp::Mul => a * b,
        MathOp::Div if b == 0.0 => return Compact8::INF,
        MathOp::Div => a / b,
    };
    Compact8::round_from(exact, rounding, rng)
}

fn reduce(
    a: &DeviceTensor,
    op: MathOp,
    rounding: RoundingMode,
    out: &DeviceTensor,
    rng: &mut StdRng,
) -> Result<(), TensorError> {
    let values = load(a)?;
    let by_value = |x: &Compact8, y: &Compact8| x.to_f64().total_cmp(&y.to_f64());
    let result = if values.iter().any(|v| v.is_inf()) {
        Compact8::INF
    } else {
        match op {
            MathOp::Add => {
                let sum = values.iter().map(|v| v.to_f64()).sum();
                Compact8::round_from(sum, rounding, rng)
            }
            MathOp::Min => values.iter().copied().min_by(by_value).unwrap_or(Compact8::INF),
            MathOp::Max => values.iter().copied().max_by(by_value).unwrap_or(Compact8::INF),
            other => {
                return Err(TensorError::shape(
                    "reduce",
                    format!("{other:?} is not a reduction"),
                ))
            }
        }
    };
    out.write_elements(&[result])
}

/// `out[i] = 2^(in+out) * Σ_p a[i*k + p] * rhs(p, j) + base(i)` for every row
/// of `a` and every column of `rhs`, which is `[k, n]`.
fn dot_rows(
    a: &[f64],
    rhs: &[f64],
    m: usize,
    k: usize,
    n: usize,
    scales: Scales,
    base: impl Fn(usize) -> f64,
) -> Vec<f64> {
    let scale = pow2(scales.input) * pow2(scales.output);
    let mut out = Vec::with_capacity(m * n);
    for i in 0..m {
        let row = &a[i * k..(i + 1) * k];
        for j in 0..n {
            let acc: f64 = row
                .iter()
                .enumerate()
                .map(|(p, &av)| av * rhs[p * n + j])
                .sum();
            out.push(acc * scale + base(i * n + j));
        }
    }
    out
}

fn matmul(
    a: &DeviceTensor,
    b: &DeviceTensor,
    beta: bool,
    rounding: RoundingMode,
    scales: Scales,
    c: &DeviceTensor,
    rng: &mut StdRng,
) -> Result<(), TensorError> {
    let rank = c.rank();
    let batches = if rank == 3 { c.size(0) } else { 1 };
    let (m, n) = (c.size(rank - 2), c.size(rank - 1));
    let k = a.size(a.rank() - 1);

    let (av, bv) = (decode(a)?, decode(b)?);
    let c_old = if beta { decode(c)? } else { Vec::new() };
    let mut result = Vec::with_capacity(batches * m * n);
    for batch in 0..batches {
        let a_base = if a.rank() == 3 { batch * m * k } else { 0 };
        let b_base = if b.rank() == 3 { batch * k * n } else { 0 };
        let c_base = batch * m * n;
        result.extend(dot_rows(
            &av[a_base..a_base + m * k],
            &bv[b_base..b_base + k * n],
            m,
            k,
            n,
            scales,
            |i| c_old.get(c_base + i).copied().unwrap_or(0.0),
        ));
    }
    encode_into(c, result, rounding, rng)
}

fn compare(x: f64, y: f64, op: CompareOp) -> bool {
    match op {
        CompareOp::Eq => x == y,
        CompareOp::Ne => x != y,
        CompareOp::Lt => x < y,
        CompareOp::Le => x <= y,
        CompareOp::Gt => x > y,
        CompareOp::Ge => x >= y,
    }
}

fn unary(op: UnaryOp, x: f64) -> f64 {
    if x.is_nan() {
        return x;
    }
    match op {
        UnaryOp::Ln if x <= 0.0 => f64::NAN,
        UnaryOp::Ln => x.ln(),
        UnaryOp::Exp => x.exp().min(f64::MAX),
        UnaryOp::Reciprocal if x == 0.0 => f64::NAN,
        UnaryOp::Reciprocal => 1.0 / x,
        UnaryOp::Sqrt => x.sqrt(),
        UnaryOp::Sigmoid => 1.0 / (1.0 + (-x).exp()),
    }
}

fn im2col(
    input: &DeviceTensor,
    kernel: usize,
    (pad_h, pad_w): (usize, usize),
    stride: usize,
    out: &DeviceTensor,
) -> Result<(), TensorError> {
    let (batches, channels, h, w) = (input.size(0), input.size(1), input.size(2), input.size(3));
    let out_h = output_extent(h, pad_h, pad_h, kernel, stride)?;
    let out_w = output_extent(w, pad_w, pad_w, kernel, stride)?;
    let rows = channels * kernel * kernel;
    let cols = out_h * out_w;

    let values = load(input)?;
    let mut result = vec![Compact8::ZERO; batches * rows * cols];
    for b in 0..batches {
        for c in 0..channels {
            let plane = &values[(b * channels + c) * h * w..][..h * w];
            for ky in 0..kernel {
                for kx in 0..kernel {
                    let row = (c * kernel + ky) * kernel + kx;
                    let dst = &mut result[(b * rows + row) * cols..][..cols];
                    for oy in 0..out_h {
                        let Some(iy) = (oy * stride + ky).checked_sub(pad_h).filter(|&y| y < h)
                        else {
                            continue;
                        };
                        for ox in 0..out_w {
                            if let Some(ix) =
                                (ox * stride + kx).checked_sub(pad_w).filter(|&x| x < w)
                            {
                                dst[oy * out_w + ox] = plane[iy * w + ix];
                            }
                        }
                    }
                }
            }
        }
    }
    out.write_elements(&result)
}

fn pool2d(
    input: &DeviceTensor,
    op: PoolOp,
    kernel: usize,
    (pad_h, pad_w): (usize, usize),
    stride: usize,
    scales: Scales,
) -> Result<Vec<f64>, TensorError> {
    let (batches, channels, h, w) = (input.size(0), input.size(1), input.size(2), input.size(3));
    let out_h = output_extent(h, pad_h, pad_h, kernel, stride)?;
    let out_w = output_extent(w, pad_w, pad_w, kernel, stride)?;
    let (in_scale, out_scale) = (pow2(scales.input), pow2(scales.output));
    let window = (kernel * kernel) as f64;

    let values = decode(input)?;
    let mut result = Vec::with_capacity(batches * channels * out_h * out_w);
    for plane in values.chunks_exact(h * w) {
        for oy in 0..out_h {
            for ox in 0..out_w {
                let taps = (0..kernel)
                    .filter_map(|ky| (oy * stride + ky).checked_sub(pad_h).filter(|&y| y < h))
                    .flat_map(|iy| {
                        (0..kernel)
                            .filter_map(move |kx| {
                                (ox * stride + kx).checked_sub(pad_w).filter(|&x| x < w)
                            })
                            .map(move |ix| plane[iy * w + ix] * in_scale)
                    });
                let reduced = match op {
                    PoolOp::Avg => taps.sum::<f64>() / window,
                    PoolOp::Max => taps
                        .reduce(|m, x| {
                            if m.is_nan() || x.is_nan() {
                                f64::NAN
                            } else {
                                m.max(x)
                            }
                        })
                        .unwrap_or(0.0),
                };
                result.push(reduced * out_scale);
            }
        }
    }
    Ok(result)
}
