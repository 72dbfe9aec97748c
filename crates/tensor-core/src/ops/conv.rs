// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Convolution and pooling over NCHW tensors.

use super::{validate, Dispatcher};
use crate::conv::output_extent;
use crate::kernel::{DeviceOp, PoolOp, Scales};
use crate::{DeviceTensor, RoundingMode, Shape, TensorError};
use device::Event;

impl Dispatcher {
    /// Shape of the [`Dispatcher::im2col`] output for an NCHW input.
    pub fn im2col_shape(
        input: &Shape,
        kernel: usize,
        pad: (usize, usize),
        stride: usize,
    ) -> Result<Shape, TensorError> {
        let dims = input.dims();
        if dims.len() != 4 {
            return Err(TensorError::shape(
                "im2col",
                format!("expected an NCHW input, got rank {}", dims.len()),
            ));
        }
        let out_h = output_extent(dims[2], pad.0, pad.0, kernel, stride)?;
        let out_w = output_extent(dims[3], pad.1, pad.1, kernel, stride)?;
        Ok(Shape::new(vec![
            dims[0],
            dims[1] * kernel * kernel,
            out_h * out_w,
        ]))
    }

    /// Unfolds an NCHW `input` for convolution as a matrix product.
    ///
    /// `out` is `[batch, channels * kernel * kernel, out_h * out_w]`, with
    /// `out_h`/`out_w` from [`crate::calc_output_size`] under symmetric
    /// padding `pad = (pad_h, pad_w)`. Padding reads as zero.
    pub fn im2col(
        &self,
        input: &DeviceTensor,
        kernel: usize,
        pad: (usize, usize),
        stride: usize,
        out: &DeviceTensor,
    ) -> Result<Event, TensorError> {
        const OP: &str = "im2col";
        validate::compact(OP, input)?;
        validate::compact(OP, out)?;
        validate::rank(OP, input, &[4])?;
        let expected = Self::im2col_shape(input.shape(), kernel, pad, stride)?;
        validate::shape(OP, out, expected)?;
        validate::distinct(OP, out, input)?;
        Ok(self.enqueue(DeviceOp::Im2Col {
            input: input.clone(),
            kernel,
            pad,
            stride,
            out: out.clone(),
        }))
    }

    /// 2-d convolution of an NCHW `input` with a square `weight` of shape
    /// `[out_channels, in_channels, k, k]`.
    ///
    /// Runs as [`Dispatcher::im2col`] into `workspace` (shaped by
    /// [`Dispatcher::im2col_shape`]), a per-image broadcast of `bias` into
    /// `out`, then one batched [`Dispatcher::matmul`] accumulating onto the
    /// bias. `out` is `[batch, out_channels, out_h, out_w]` and is rounded
    /// once. Every operand is checked before the first kernel is issued; the
    /// returned event is the final product's.
    #[allow(clippy::too_many_arguments)]
    pub fn conv2d(
        &self,
        input: &DeviceTensor,
        weight: &DeviceTensor,
        bias: Option<&DeviceTensor>,
        pad: (usize, usize),
        stride: usize,
        rounding: RoundingMode,
        scales: Scales,
        workspace: &DeviceTensor,
        out: &DeviceTensor,
    ) -> Result<Event, TensorError> {
        const OP: &str = "conv2d";
        for t in [input, weight, workspace, out] {
            validate::compact(OP, t)?;
        }
        validate::rank(OP, input, &[4])?;
        validate::rank(OP, weight, &[4])?;
        let (out_channels, kernel) = (weight.size(0), weight.size(2));
        if weight.size(3) != kernel || input.size(1) != weight.size(1) {
            return Err(TensorError::ShapeMismatch {
                op: OP,
                lhs: input.shape().clone(),
                rhs: weight.shape().clone(),
            });
        }
        let cols = Self::im2col_shape(input.shape(), kernel, pad, stride)?;
        validate::shape(OP, workspace, cols.clone())?;
        let out_h = output_extent(input.size(2), pad.0, pad.0, kernel, stride)?;
        let out_w = output_extent(input.size(3), pad.1, pad.1, kernel, stride)?;
        let batches = input.size(0);
        validate::shape(
            OP,
            out,
            Shape::new(vec![batches, out_channels, out_h, out_w]),
        )?;
        if let Some(bias) = bias {
            validate::compact(OP, bias)?;
            validate::shape(OP, bias, Shape::vector(out_channels))?;
            validate::distinct(OP, out, bias)?;
        }
        for t in [input, weight, workspace] {
            validate::distinct(OP, out, t)?;
        }
        validate::distinct(OP, workspace, input)?;
        validate::distinct(OP, workspace, weight)?;

        let plane = out_h * out_w;
        let weight_2d = weight.view(Shape::matrix(out_channels, cols.dims()[1]))?;
        let out_3d = out.view(Shape::new(vec![batches, out_channels, plane]))?;

        self.im2col(input, kernel, pad, stride, workspace)?;
        if let Some(bias) = bias {
            for b in 0..batches {
                let offset = b * out_channels * plane;
                self.broadcast(bias, 0, 1, out, offset, plane, plane, out_channels)?;
            }
        }
        self.matmul(&weight_2d, workspace, bias.is_some(), rounding, scales, &out_3d)
    }

    /// Max or average pooling of an NCHW `input` into
    /// `[batch, channels, out_h, out_w]`.
    ///
    /// Windows are `kernel x kernel` with symmetric padding. Max ignores
    /// padding taps; average divides by the full window size.
    #[allow(clippy::too_many_arguments)]
    pub fn pool2d(
        &self,
        input: &DeviceTensor,
        op: PoolOp,
        kernel: usize,
        pad: (usize, usize),
        stride: usize,
        rounding: RoundingMode,
        scales: Scales,
        out: &DeviceTensor,
    ) -> Result<Event, TensorError> {
        const OP: &str = "pool2d";
        validate::compact(OP, input)?;
        validate::compact(OP, out)?;
        validate::rank(OP, input, &[4])?;
        let out_h = output_extent(input.size(2), pad.0, pad.0, kernel, stride)?;
        let out_w = output_extent(input.size(3), pad.1, pad.1, kernel, stride)?;
        let expected = Shape::new(vec![input.size(0), input.size(1), out_h, out_w]);
        validate::shape(OP, out, expected)?;
        validate::distinct(OP, out, input)?;
        Ok(self.enqueue(DeviceOp::Pool2d {
            input: input.clone(),
            op,
            kernel,
            pad,
            stride,
            rounding,
            scales,
            out: out.clone(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        Compact8, DType, DeviceTensor, Dispatcher, HostTensor, PoolOp, ReferenceBackend,
        RoundingMode, Scales, Shape,
    };
    use device::{Context, MemoryBudget};
    use std::sync::Arc;

    fn upload(ctx: &Context, d: &Dispatcher, shape: &[usize], values: &[f32]) -> DeviceTensor {
        let codes: Vec<Compact8> = values.iter().map(|&v| Compact8::from_f32(v)).collect();
        let host = HostTensor::from_slice(shape.to_vec(), &codes).unwrap();
        DeviceTensor::upload(ctx, d.queue(), &host).unwrap().0
    }

    fn read(d: &Dispatcher, t: &DeviceTensor) -> Vec<f32> {
        t.to_host(d.queue())
            .unwrap()
            .to_vec::<Compact8>()
            .unwrap()
            .into_iter()
            .map(Compact8::to_f32)
            .collect()
    }

    const IMAGE: [f32; 9] = [1.0, 2.0, 0.0, 0.0, 1.0, 0.0, 2.0, 0.0, 1.0];

    #[test]
    fn test_im2col_with_padding() {
        let ctx = Context::with_budget(MemoryBudget::from_mb(1)).unwrap();
        let d = Dispatcher::reference(&ctx, 0);
        // 1x1x2x2 input, 2x2 kernel, pad 1, stride 2 -> 2x2 output positions
        let values: Vec<Compact8> = [1.0f32, 2.0, 3.0, 4.0]
            .iter()
            .map(|&v| Compact8::from_f32(v))
            .collect();
        let host = HostTensor::from_slice([1, 1, 2, 2], &values).unwrap();
        let (input, _) = DeviceTensor::upload(&ctx, d.queue(), &host).unwrap();
        let out = DeviceTensor::new(&ctx, DType::Compact8, [1, 4, 4]).unwrap();
        d.im2col(&input, 2, (1, 1), 2, &out).unwrap().wait().unwrap();

        let got: Vec<f32> = out
            .to_host(d.queue())
            .unwrap()
            .to_vec::<Compact8>()
            .unwrap()
            .into_iter()
            .map(Compact8::to_f32)
            .collect();
        // Each kernel tap sees exactly one input pixel across the four windows.
        assert_eq!(
            got,
            vec![
                0.0, 0.0, 0.0, 4.0, //
                0.0, 0.0, 3.0, 0.0, //
                0.0, 2.0, 0.0, 0.0, //
                1.0, 0.0, 0.0, 0.0,
            ]
        );
    }

    #[test]
    fn test_im2col_rejects_wrong_output() {
        let ctx = Context::with_budget(MemoryBudget::from_mb(1)).unwrap();
        let d = Dispatcher::reference(&ctx, 0);
        let input = DeviceTensor::new(&ctx, DType::Compact8, [1, 2, 7, 7]).unwrap();
        let out = DeviceTensor::new(&ctx, DType::Compact8, [1, 18, 15]).unwrap();
        assert!(d.im2col(&input, 3, (1, 1), 2, &out).is_err());
        let out = DeviceTensor::new(&ctx, DType::Compact8, [1, 18, 16]).unwrap();
        assert!(d.im2col(&input, 3, (1, 1), 2, &out).is_ok());
    }

    #[test]
    fn test_conv2d_adds_bias_per_image() {
        let ctx = Context::with_budget(MemoryBudget::from_mb(1)).unwrap();
        let d = Dispatcher::reference(&ctx, 0);
        // Two images: IMAGE and its negation.
        let mut pixels = IMAGE.to_vec();
        pixels.extend(IMAGE.iter().map(|v| -v));
        let input = upload(&ctx, &d, &[2, 1, 3, 3], &pixels);
        // Channel 0 sums the window, channel 1 picks its top-left tap.
        let weight = upload(&ctx, &d, &[2, 1, 2, 2], &[1.0, 1.0, 1.0, 1.0, 1.0, 0.0, 0.0, 0.0]);
        let bias = upload(&ctx, &d, &[2], &[1.0, -1.0]);

        let cols = Dispatcher::im2col_shape(input.shape(), 2, (0, 0), 1).unwrap();
        assert_eq!(cols, Shape::new(vec![2, 4, 4]));
        let workspace = DeviceTensor::new(&ctx, DType::Compact8, cols).unwrap();
        let out = DeviceTensor::new(&ctx, DType::Compact8, [2, 2, 2, 2]).unwrap();
        d.conv2d(
            &input,
            &weight,
            Some(&bias),
            (0, 0),
            1,
            RoundingMode::NearestEven,
            Scales::default(),
            &workspace,
            &out,
        )
        .unwrap()
        .wait()
        .unwrap();

        assert_eq!(
            read(&d, &out),
            vec![
                5.0, 4.0, 4.0, 3.0, //
                0.0, 1.0, -1.0, 0.0, //
                -3.0, -2.0, -2.0, -1.0, //
                -2.0, -3.0, -1.0, -2.0,
            ]
        );
    }

    #[test]
    fn test_conv2d_without_bias_overwrites_output() {
        let ctx = Context::with_budget(MemoryBudget::from_mb(1)).unwrap();
        let d = Dispatcher::reference(&ctx, 0);
        let input = upload(&ctx, &d, &[1, 1, 3, 3], &IMAGE);
        let weight = upload(&ctx, &d, &[1, 1, 3, 3], &[1.0; 9]);
        let workspace = DeviceTensor::new(&ctx, DType::Compact8, [1, 9, 1]).unwrap();
        let out = upload(&ctx, &d, &[1, 1, 1, 1], &[8.0]);
        d.conv2d(
            &input,
            &weight,
            None,
            (0, 0),
            1,
            RoundingMode::NearestEven,
            Scales::new(0, -1),
            &workspace,
            &out,
        )
        .unwrap();
        // 7 * 2^-1
        assert_eq!(read(&d, &out), vec![3.5]);
    }

    #[test]
    fn test_conv2d_rejects_before_issuing() {
        let ctx = Context::with_budget(MemoryBudget::from_mb(1)).unwrap();
        let backend = Arc::new(ReferenceBackend::seeded(0));
        let d = Dispatcher::new(ctx.default_queue().clone(), backend.clone());
        let input = DeviceTensor::new(&ctx, DType::Compact8, [1, 2, 5, 5]).unwrap();
        let weight = DeviceTensor::new(&ctx, DType::Compact8, [3, 2, 3, 3]).unwrap();
        let workspace = DeviceTensor::new(&ctx, DType::Compact8, [1, 18, 9]).unwrap();
        let bias = DeviceTensor::new(&ctx, DType::Compact8, [3]).unwrap();
        let ne = RoundingMode::NearestEven;
        let s = Scales::default();

        // Output extent is 3x3, not 2x2.
        let wrong_out = DeviceTensor::new(&ctx, DType::Compact8, [1, 3, 2, 2]).unwrap();
        assert!(d
            .conv2d(&input, &weight, Some(&bias), (0, 0), 1, ne, s, &workspace, &wrong_out)
            .is_err());

        let out = DeviceTensor::new(&ctx, DType::Compact8, [1, 3, 3, 3]).unwrap();
        let wrong_bias = DeviceTensor::new(&ctx, DType::Compact8, [2]).unwrap();
        assert!(d
            .conv2d(&input, &weight, Some(&wrong_bias), (0, 0), 1, ne, s, &workspace, &out)
            .is_err());

        let wrong_channels = DeviceTensor::new(&ctx, DType::Compact8, [3, 1, 3, 3]).unwrap();
        assert!(d
            .conv2d(&input, &wrong_channels, None, (0, 0), 1, ne, s, &workspace, &out)
            .is_err());

        let small_workspace = DeviceTensor::new(&ctx, DType::Compact8, [1, 18, 4]).unwrap();
        assert!(d
            .conv2d(&input, &weight, None, (0, 0), 1, ne, s, &small_workspace, &out)
            .is_err());

        d.finish().unwrap();
        assert_eq!(backend.launches(), 0);

        d.conv2d(&input, &weight, Some(&bias), (0, 0), 1, ne, s, &workspace, &out)
            .unwrap();
        d.finish().unwrap();
        // im2col, one bias broadcast, matmul
        assert_eq!(backend.launches(), 3);
    }

    const GRID: [f32; 16] = [
        1.0, 3.0, 0.0, 2.0, //
        1.0, -1.0, 2.0, 2.0, //
        0.0, 0.0, -2.0, -1.0, //
        4.0, 2.0, -1.0, 0.0,
    ];

    #[test]
    fn test_pool2d_max_and_avg() {
        let ctx = Context::with_budget(MemoryBudget::from_mb(1)).unwrap();
        let d = Dispatcher::reference(&ctx, 0);
        let input = upload(&ctx, &d, &[1, 1, 4, 4], &GRID);
        let out = DeviceTensor::new(&ctx, DType::Compact8, [1, 1, 2, 2]).unwrap();
        let ne = RoundingMode::NearestEven;

        d.pool2d(&input, PoolOp::Max, 2, (0, 0), 2, ne, Scales::default(), &out)
            .unwrap();
        assert_eq!(read(&d, &out), vec![3.0, 2.0, 4.0, 0.0]);

        d.pool2d(&input, PoolOp::Avg, 2, (0, 0), 2, ne, Scales::default(), &out)
            .unwrap();
        assert_eq!(read(&d, &out), vec![1.0, 1.5, 1.5, -1.0]);

        d.pool2d(&input, PoolOp::Avg, 2, (0, 0), 2, ne, Scales::new(1, 0), &out)
            .unwrap();
        assert_eq!(read(&d, &out), vec![2.0, 3.0, 3.0, -2.0]);
    }

    #[test]
    fn test_pool2d_padding() {
        let ctx = Context::with_budget(MemoryBudget::from_mb(1)).unwrap();
        let d = Dispatcher::reference(&ctx, 0);
        let input = upload(&ctx, &d, &[1, 1, 2, 2], &[1.0; 4]);
        let out = DeviceTensor::new(&ctx, DType::Compact8, [1, 1, 3, 3]).unwrap();
        let ne = RoundingMode::NearestEven;

        d.pool2d(&input, PoolOp::Avg, 2, (1, 1), 1, ne, Scales::default(), &out)
            .unwrap();
        assert_eq!(
            read(&d, &out),
            vec![0.25, 0.5, 0.25, 0.5, 1.0, 0.5, 0.25, 0.5, 0.25]
        );

        d.pool2d(&input, PoolOp::Max, 2, (1, 1), 1, ne, Scales::default(), &out)
            .unwrap();
        assert_eq!(read(&d, &out), vec![1.0; 9]);
    }

    #[test]
    fn test_pool2d_propagates_inf() {
        let ctx = Context::with_budget(MemoryBudget::from_mb(1)).unwrap();
        let d = Dispatcher::reference(&ctx, 0);
        let mut codes = vec![Compact8::ONE; 4];
        codes[3] = Compact8::INF;
        let host = HostTensor::from_slice([1, 1, 2, 2], &codes).unwrap();
        let (input, _) = DeviceTensor::upload(&ctx, d.queue(), &host).unwrap();
        let out = DeviceTensor::new(&ctx, DType::Compact8, [1, 1, 1, 1]).unwrap();
        for op in [PoolOp::Max, PoolOp::Avg] {
            d.pool2d(&input, op, 2, (0, 0), 1, RoundingMode::NearestEven, Scales::default(), &out)
                .unwrap();
            let got = out.to_host(d.queue()).unwrap().to_vec::<Compact8>().unwrap();
            assert_eq!(got, vec![Compact8::INF], "{op:?}");
        }
    }

    #[test]
    fn test_pool2d_rejects_wrong_output() {
        let ctx = Context::with_budget(MemoryBudget::from_mb(1)).unwrap();
        let d = Dispatcher::reference(&ctx, 0);
        let input = DeviceTensor::new(&ctx, DType::Compact8, [2, 3, 6, 6]).unwrap();
        let out = DeviceTensor::new(&ctx, DType::Compact8, [2, 3, 2, 2]).unwrap();
        let ne = RoundingMode::NearestEven;
        let s = Scales::default();
        assert!(d.pool2d(&input, PoolOp::Max, 2, (0, 0), 2, ne, s, &out).is_err());
        assert!(d.pool2d(&input, PoolOp::Max, 0, (0, 0), 2, ne, s, &out).is_err());
        assert!(d.pool2d(&input, PoolOp::Max, 3, (0, 0), 3, ne, s, &out).is_ok());
    }
}
