// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Fully connected layer.

use super::{Layer, LayerState, ParameterInfo};
use crate::RuntimeError;
use device::Context;
use tensor_core::{
    Compact8, DType, DeviceTensor, Dispatcher, HostTensor, RoundingMode, Scales, Shape, TensorError,
};

/// `y = W·x + b` for `x: [in]` or `x: [batch, in]`.
///
/// The weight is stored as `[out, in]` together with a transposed copy used
/// by the batched forward pass. Replace weights through the setters so the
/// copy stays in sync, or call [`Linear::refresh_transpose`] after editing
/// [`Linear::weight`] in place.
#[derive(Debug)]
pub struct Linear {
    in_features: usize,
    out_features: usize,
    weight: DeviceTensor,
    weight_t: DeviceTensor,
    bias: Option<DeviceTensor>,
    grad_weight: DeviceTensor,
    grad_bias: Option<DeviceTensor>,
    scales: Scales,
    state: LayerState,
}

impl Linear {
    /// Allocates the layer and initialises it with [`Linear::reset`].
    pub fn new(
        ctx: &Context,
        ops: &Dispatcher,
        in_features: usize,
        out_features: usize,
        bias: bool,
        scales: Scales,
    ) -> Result<Self, RuntimeError> {
        let matrix = |rows, cols| DeviceTensor::new(ctx, DType::Compact8, Shape::matrix(rows, cols));
        let vector = || DeviceTensor::new(ctx, DType::Compact8, Shape::vector(out_features));
        let mut layer = Self {
            in_features,
            out_features,
            weight: matrix(out_features, in_features)?,
            weight_t: matrix(in_features, out_features)?,
            bias: bias.then(vector).transpose()?,
            grad_weight: matrix(out_features, in_features)?,
            grad_bias: bias.then(vector).transpose()?,
            scales,
            state: LayerState::default(),
        };
        layer.reset(ops)?;
        Ok(layer)
    }

    /// Draws weights and bias uniformly from `±1/sqrt(in_features)`.
    pub fn reset(&mut self, ops: &Dispatcher) -> Result<(), RuntimeError> {
        let stdv = 1.0 / (self.in_features as f32).sqrt();
        ops.uniform(-stdv, stdv, &self.weight)?;
        self.refresh_transpose(ops)?;
        if let Some(bias) = &self.bias {
            ops.uniform(-stdv, stdv, bias)?;
        }
        Ok(())
    }

    pub fn in_features(&self) -> usize {
        self.in_features
    }

    pub fn out_features(&self) -> usize {
        self.out_features
    }

    pub fn scales(&self) -> Scales {
        self.scales
    }

    pub fn set_scales(&mut self, scales: Scales) {
        self.scales = scales;
    }

    pub fn weight(&self) -> &DeviceTensor {
        &self.weight
    }

    pub fn bias(&self) -> Option<&DeviceTensor> {
        self.bias.as_ref()
    }

    /// Recomputes the transposed weight copy.
    pub fn refresh_transpose(&self, ops: &Dispatcher) -> Result<(), RuntimeError> {
        ops.transpose2d(&self.weight, &self.weight_t)?;
        Ok(())
    }

    /// Quantizes an `f32` `[out, in]` host matrix into the weight.
    pub fn set_weight_host(
        &mut self,
        ctx: &Context,
        ops: &Dispatcher,
        weight: &HostTensor,
    ) -> Result<(), RuntimeError> {
        self.expect_shape("set_weight_host", weight.shape(), &self.weight_shape())?;
        let (staged, _) = DeviceTensor::upload(ctx, ops.queue(), weight)?;
        ops.to_compact(&staged, 0, RoundingMode::NearestEven, &self.weight)?;
        self.refresh_transpose(ops)
    }

    /// Copies a `Compact8` `[out, in]` device matrix into the weight.
    pub fn set_weight(&mut self, ops: &Dispatcher, weight: &DeviceTensor) -> Result<(), RuntimeError> {
        self.expect_shape("set_weight", weight.shape(), &self.weight_shape())?;
        ops.copy(weight, &self.weight)?;
        self.refresh_transpose(ops)
    }

    /// Quantizes an `f32` `[out]` host vector into the bias, adding a bias
    /// if the layer had none.
    pub fn set_bias_host(
        &mut self,
        ctx: &Context,
        ops: &Dispatcher,
        bias: &HostTensor,
    ) -> Result<(), RuntimeError> {
        self.expect_shape("set_bias_host", bias.shape(), &Shape::vector(self.out_features))?;
        let (staged, _) = DeviceTensor::upload(ctx, ops.queue(), bias)?;
        let target = self.ensure_bias(ctx)?;
        ops.to_compact(&staged, 0, RoundingMode::NearestEven, &target)?;
        Ok(())
    }

    /// Copies a `Compact8` `[out]` device vector into the bias, adding a
    /// bias if the layer had none.
    pub fn set_bias(
        &mut self,
        ctx: &Context,
        ops: &Dispatcher,
        bias: &DeviceTensor,
    ) -> Result<(), RuntimeError> {
        self.expect_shape("set_bias", bias.shape(), &Shape::vector(self.out_features))?;
        let target = self.ensure_bias(ctx)?;
        ops.copy(bias, &target)?;
        Ok(())
    }

    fn ensure_bias(&mut self, ctx: &Context) -> Result<DeviceTensor, RuntimeError> {
        let shape = Shape::vector(self.out_features);
        if self.grad_bias.is_none() {
            self.grad_bias = Some(DeviceTensor::new(ctx, DType::Compact8, shape.clone())?);
        }
        match &self.bias {
            Some(bias) => Ok(bias.clone()),
            None => {
                let bias = DeviceTensor::new(ctx, DType::Compact8, shape)?;
                self.bias = Some(bias.clone());
                Ok(bias)
            }
        }
    }

    fn weight_shape(&self) -> Shape {
        Shape::matrix(self.out_features, self.in_features)
    }

    fn expect_shape(&self, op: &'static str, got: &Shape, expected: &Shape) -> Result<(), RuntimeError> {
        if got != expected {
            return Err(TensorError::ShapeMismatch {
                op,
                lhs: expected.clone(),
                rhs: got.clone(),
            }
            .into());
        }
        Ok(())
    }

    fn expect_features(&self, op: &'static str, t: &DeviceTensor, features: usize) -> Result<(), RuntimeError> {
        if !(1..=2).contains(&t.rank()) || t.size(t.rank() - 1) != features {
            return Err(TensorError::Shape {
                op,
                detail: format!("expected [{features}] or [batch, {features}], got {}", t.shape()),
            }
            .into());
        }
        Ok(())
    }
}

/// Power-of-two exponent of a gradient scale.
fn scale_exponent(scale: f32) -> Result<i8, RuntimeError> {
    let exp = scale.log2();
    if scale > 0.0 && exp.fract() == 0.0 && (f32::from(i8::MIN)..=f32::from(i8::MAX)).contains(&exp) {
        return Ok(exp as i8);
    }
    Err(TensorError::Range {
        op: "acc_grad_parameters",
        detail: format!("gradient scale {scale} is not a power of two"),
    }
    .into())
}

impl Layer for Linear {
    fn describe(&self) -> String {
        format!(
            "Linear ({} -> {}){}",
            self.in_features,
            self.out_features,
            if self.bias.is_some() { " (biased)" } else { "" }
        )
    }

    fn rounding(&self) -> RoundingMode {
        self.state.rounding
    }

    fn set_rounding(&mut self, mode: RoundingMode) {
        self.state.rounding = mode;
    }

    fn forward(
        &mut self,
        ctx: &Context,
        ops: &Dispatcher,
        input: &DeviceTensor,
    ) -> Result<DeviceTensor, RuntimeError> {
        self.expect_features("linear_forward", input, self.in_features)?;
        self.state.input = Some(input.clone());
        let rounding = self.state.rounding;
        let has_bias = self.bias.is_some();

        if input.rank() == 1 {
            let output = self.state.output_for(ctx, Shape::vector(self.out_features))?;
            if let Some(bias) = &self.bias {
                ops.memcpy(bias, self.out_features, 1, 0, 0, &output)?;
            }
            ops.matvec(&self.weight, input, has_bias, rounding, self.scales, &output)?;
            Ok(output)
        } else {
            let batch = input.size(0);
            let output = self
                .state
                .output_for(ctx, Shape::matrix(batch, self.out_features))?;
            if let Some(bias) = &self.bias {
                ops.memcpy(bias, self.out_features, batch, 0, self.out_features, &output)?;
            }
            // (batch x in) x (in x out) = (batch x out)
            ops.matmul(input, &self.weight_t, has_bias, rounding, self.scales, &output)?;
            Ok(output)
        }
    }

    fn update_grad_input(
        &mut self,
        ctx: &Context,
        ops: &Dispatcher,
        input: &DeviceTensor,
        grad_output: &DeviceTensor,
    ) -> Result<DeviceTensor, RuntimeError> {
        self.state.check_input("linear_backward", input)?;
        self.expect_features("linear_backward", grad_output, self.out_features)?;
        let grad_input = self.state.grad_input_for(ctx, input.shape().clone())?;
        let rounding = self.state.rounding;
        if input.rank() == 1 {
            ops.matvec(&self.weight_t, grad_output, false, rounding, Scales::default(), &grad_input)?;
        } else {
            // (batch x out) x (out x in) = (batch x in)
            ops.matmul(grad_output, &self.weight, false, rounding, Scales::default(), &grad_input)?;
        }
        Ok(grad_input)
    }

    /// `scale` must be a power of two; it becomes the output exponent of the
    /// accumulating products.
    fn acc_grad_parameters(
        &mut self,
        ctx: &Context,
        ops: &Dispatcher,
        scale: f32,
        input: &DeviceTensor,
        grad_output: &DeviceTensor,
    ) -> Result<(), RuntimeError> {
        self.expect_features("acc_grad_parameters", input, self.in_features)?;
        self.expect_features("acc_grad_parameters", grad_output, self.out_features)?;
        let exp = scale_exponent(scale)?;
        let rounding = self.state.rounding;
        let scales = Scales::new(0, exp);

        if input.rank() == 1 {
            // Outer product: [out, 1] x [1, in].
            let column = grad_output.upcast_inner(2)?;
            let row = input.upcast_outer(2)?;
            ops.matmul(&column, &row, true, rounding, scales, &self.grad_weight)?;
            if let Some(grad_bias) = &self.grad_bias {
                ops.mul_add(
                    grad_bias,
                    0,
                    Compact8::ONE,
                    grad_output,
                    exp,
                    false,
                    rounding,
                    0,
                    grad_bias,
                )?;
            }
        } else {
            let batch = input.size(0);
            let grad_output_t =
                DeviceTensor::new(ctx, DType::Compact8, Shape::matrix(self.out_features, batch))?;
            ops.transpose2d(grad_output, &grad_output_t)?;
            ops.matmul(&grad_output_t, input, true, rounding, scales, &self.grad_weight)?;
            if let Some(grad_bias) = &self.grad_bias {
                let ones = DeviceTensor::new(ctx, DType::Compact8, Shape::vector(batch))?;
                ops.memset(Compact8::ONE, &ones)?;
                ops.matvec(&grad_output_t, &ones, true, rounding, scales, grad_bias)?;
            }
        }
        Ok(())
    }

    fn parameters(&self) -> Vec<ParameterInfo> {
        let mut params = vec![ParameterInfo {
            param: self.weight.clone(),
            grad: self.grad_weight.clone(),
            name: format!("{} weight", self.describe()),
        }];
        if let (Some(bias), Some(grad)) = (&self.bias, &self.grad_bias) {
            params.push(ParameterInfo {
                param: bias.clone(),
                grad: grad.clone(),
                name: format!("{} bias", self.describe()),
            });
        }
        params
    }

    fn zero_grad(&mut self, ops: &Dispatcher) -> Result<(), RuntimeError> {
        ops.memset(Compact8::ZERO, &self.grad_weight)?;
        if let Some(grad_bias) = &self.grad_bias {
            ops.memset(Compact8::ZERO, grad_bias)?;
        }
        Ok(())
    }

    fn input(&self) -> Option<&DeviceTensor> {
        self.state.input.as_ref()
    }

    fn output(&self) -> Option<&DeviceTensor> {
        self.state.output.as_ref()
    }

    fn grad_input(&self) -> Option<&DeviceTensor> {
        self.state.grad_input.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use device::MemoryBudget;

    fn setup() -> (Context, Dispatcher) {
        let ctx = Context::with_budget(MemoryBudget::from_mb(4)).unwrap();
        let ops = Dispatcher::reference(&ctx, 5);
        (ctx, ops)
    }

    fn upload(ctx: &Context, ops: &Dispatcher, shape: &[usize], values: &[f32]) -> DeviceTensor {
        let codes: Vec<Compact8> = values.iter().map(|&v| Compact8::from_f32(v)).collect();
        let host = HostTensor::from_slice(shape, &codes).unwrap();
        DeviceTensor::upload(ctx, ops.queue(), &host).unwrap().0
    }

    fn read(ops: &Dispatcher, t: &DeviceTensor) -> Vec<f32> {
        t.to_host(ops.queue())
            .unwrap()
            .to_vec::<Compact8>()
            .unwrap()
            .into_iter()
            .map(Compact8::to_f32)
            .collect()
    }

    /// Linear (2 -> 2) with W = [[1, 2], [3, 4]] and b = [0.5, -1].
    fn fixed_layer(ctx: &Context, ops: &Dispatcher) -> Linear {
        let mut layer = Linear::new(ctx, ops, 2, 2, true, Scales::default()).unwrap();
        let w = HostTensor::from_slice([2, 2], &[1.0f32, 2.0, 3.0, 4.0]).unwrap();
        let b = HostTensor::from_slice([2], &[0.5f32, -1.0]).unwrap();
        layer.set_weight_host(ctx, ops, &w).unwrap();
        layer.set_bias_host(ctx, ops, &b).unwrap();
        layer
    }

    #[test]
    fn test_describe() {
        let (ctx, ops) = setup();
        let layer = Linear::new(&ctx, &ops, 4, 8, true, Scales::default()).unwrap();
        assert_eq!(layer.describe(), "Linear (4 -> 8) (biased)");
        assert_eq!(layer.parameters().len(), 2);
    }

    #[test]
    fn test_reset_stays_in_bounds() {
        let (ctx, ops) = setup();
        let layer = Linear::new(&ctx, &ops, 16, 4, false, Scales::default()).unwrap();
        assert!(read(&ops, layer.weight()).iter().all(|w| w.abs() <= 0.25));
        assert!(layer.bias().is_none());
    }

    #[test]
    fn test_forward_vector_and_batch() {
        let (ctx, ops) = setup();
        let mut layer = fixed_layer(&ctx, &ops);

        let x = upload(&ctx, &ops, &[2], &[1.0, 1.0]);
        let y = layer.forward(&ctx, &ops, &x).unwrap();
        assert_eq!(read(&ops, &y), vec![3.5, 6.0]);

        let xb = upload(&ctx, &ops, &[2, 2], &[1.0, 0.0, 0.0, 1.0]);
        let yb = layer.forward(&ctx, &ops, &xb).unwrap();
        assert_eq!(read(&ops, &yb), vec![1.5, 2.0, 2.5, 3.0]);
    }

    #[test]
    fn test_backward_and_grad_accumulation() {
        let (ctx, ops) = setup();
        let mut layer = fixed_layer(&ctx, &ops);
        layer.zero_grad(&ops).unwrap();

        let x = upload(&ctx, &ops, &[2], &[1.0, 2.0]);
        layer.forward(&ctx, &ops, &x).unwrap();
        let g = upload(&ctx, &ops, &[2], &[1.0, 0.5]);
        let gi = layer.update_grad_input(&ctx, &ops, &x, &g).unwrap();
        // W^T g = [1 + 1.5, 2 + 2]
        assert_eq!(read(&ops, &gi), vec![2.5, 4.0]);

        layer.acc_grad_parameters(&ctx, &ops, 1.0, &x, &g).unwrap();
        let params = layer.parameters();
        // g x^T = [[1, 2], [0.5, 1]]
        assert_eq!(read(&ops, &params[0].grad), vec![1.0, 2.0, 0.5, 1.0]);
        assert_eq!(read(&ops, &params[1].grad), vec![1.0, 0.5]);

        layer.acc_grad_parameters(&ctx, &ops, 0.5, &x, &g).unwrap();
        assert_eq!(read(&ops, &params[1].grad), vec![1.5, 0.75]);
        assert!(layer.acc_grad_parameters(&ctx, &ops, 0.3, &x, &g).is_err());
    }

    #[test]
    fn test_batched_grad_bias_sums_over_batch() {
        let (ctx, ops) = setup();
        let mut layer = fixed_layer(&ctx, &ops);
        layer.zero_grad(&ops).unwrap();
        let x = upload(&ctx, &ops, &[2, 2], &[1.0, 0.0, 0.0, 1.0]);
        let g = upload(&ctx, &ops, &[2, 2], &[1.0, 2.0, 3.0, 4.0]);
        layer.acc_grad_parameters(&ctx, &ops, 1.0, &x, &g).unwrap();
        let params = layer.parameters();
        assert_eq!(read(&ops, &params[1].grad), vec![4.0, 6.0]);
        // g^T x = [[1, 3], [2, 4]]
        assert_eq!(read(&ops, &params[0].grad), vec![1.0, 3.0, 2.0, 4.0]);
    }

    #[test]
    fn test_backward_requires_forward_input() {
        let (ctx, ops) = setup();
        let mut layer = fixed_layer(&ctx, &ops);
        let x = upload(&ctx, &ops, &[2], &[1.0, 2.0]);
        let g = upload(&ctx, &ops, &[2], &[1.0, 1.0]);
        assert!(layer.update_grad_input(&ctx, &ops, &x, &g).is_err());
    }

    #[test]
    fn test_wrong_feature_count() {
        let (ctx, ops) = setup();
        let mut layer = fixed_layer(&ctx, &ops);
        let x = upload(&ctx, &ops, &[3], &[1.0, 2.0, 3.0]);
        assert!(matches!(
            layer.forward(&ctx, &ops, &x),
            Err(RuntimeError::Tensor(TensorError::Shape { .. }))
        ));
    }
}
