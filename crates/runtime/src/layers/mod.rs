// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Network layers built on the dispatch layer.
//!
//! A [`Layer`] issues kernels through a [`Dispatcher`] and keeps the
//! tensors it needs for the backward pass: the last input, its output and
//! its gradient with respect to the input. Output buffers are reused across
//! calls while the input size is unchanged.

mod activation;
mod linear;
mod sequential;

pub use activation::{ReLU, Sigmoid};
pub use linear::Linear;
pub use sequential::Sequential;

use crate::config::LayerSpec;
use crate::weight_loader::{bias_name, weight_name, WeightLoader};
use crate::RuntimeError;
use device::Context;
use std::fmt;
use tensor_core::{DType, DeviceTensor, Dispatcher, RoundingMode, Scales, Shape};

/// A trainable parameter together with its gradient accumulator.
#[derive(Debug, Clone)]
pub struct ParameterInfo {
    pub param: DeviceTensor,
    pub grad: DeviceTensor,
    pub name: String,
}

/// A differentiable network layer over `Compact8` tensors.
///
/// All methods enqueue work and return without waiting for it.
pub trait Layer: Send + fmt::Debug {
    /// One-line description, e.g. `"Linear (4 -> 8) (biased)"`.
    fn describe(&self) -> String;

    fn rounding(&self) -> RoundingMode;

    fn set_rounding(&mut self, mode: RoundingMode);

    /// Computes the layer output for `input`.
    fn forward(
        &mut self,
        ctx: &Context,
        ops: &Dispatcher,
        input: &DeviceTensor,
    ) -> Result<DeviceTensor, RuntimeError>;

    /// Gradient with respect to the input, given the gradient with respect
    /// to the output. `input` is the tensor last passed to `forward`.
    fn update_grad_input(
        &mut self,
        ctx: &Context,
        ops: &Dispatcher,
        input: &DeviceTensor,
        grad_output: &DeviceTensor,
    ) -> Result<DeviceTensor, RuntimeError>;

    /// Accumulates `scale * dLoss/dParam` into the parameter gradients.
    fn acc_grad_parameters(
        &mut self,
        _ctx: &Context,
        _ops: &Dispatcher,
        _scale: f32,
        _input: &DeviceTensor,
        _grad_output: &DeviceTensor,
    ) -> Result<(), RuntimeError> {
        Ok(())
    }

    fn parameters(&self) -> Vec<ParameterInfo> {
        Vec::new()
    }

    fn zero_grad(&mut self, _ops: &Dispatcher) -> Result<(), RuntimeError> {
        Ok(())
    }

    /// The input of the last forward pass.
    fn input(&self) -> Option<&DeviceTensor>;

    /// The output of the last forward pass.
    fn output(&self) -> Option<&DeviceTensor>;

    /// The result of the last backward pass.
    fn grad_input(&self) -> Option<&DeviceTensor>;
}

/// Tensors every layer keeps between passes.
#[derive(Debug, Clone, Default)]
pub(crate) struct LayerState {
    pub(crate) input: Option<DeviceTensor>,
    pub(crate) output: Option<DeviceTensor>,
    pub(crate) grad_input: Option<DeviceTensor>,
    pub(crate) rounding: RoundingMode,
}

impl LayerState {
    /// The output buffer, reallocated when `shape` changes.
    pub(crate) fn output_for(
        &mut self,
        ctx: &Context,
        shape: impl Into<Shape>,
    ) -> Result<DeviceTensor, RuntimeError> {
        reuse_or_alloc(&mut self.output, ctx, shape.into())
    }

    /// The input-gradient buffer, reallocated when `shape` changes.
    pub(crate) fn grad_input_for(
        &mut self,
        ctx: &Context,
        shape: impl Into<Shape>,
    ) -> Result<DeviceTensor, RuntimeError> {
        reuse_or_alloc(&mut self.grad_input, ctx, shape.into())
    }

    /// Fails unless `input` is the tensor last seen by `forward`.
    pub(crate) fn check_input(&self, op: &'static str, input: &DeviceTensor) -> Result<(), RuntimeError> {
        match &self.input {
            Some(last) if last.is_same_instance(input) => Ok(()),
            _ => Err(tensor_core::TensorError::Aliasing {
                op,
                detail: "input is not the tensor of the last forward pass".into(),
            }
            .into()),
        }
    }
}

fn reuse_or_alloc(
    slot: &mut Option<DeviceTensor>,
    ctx: &Context,
    shape: Shape,
) -> Result<DeviceTensor, RuntimeError> {
    match slot {
        Some(t) if t.shape() == &shape => Ok(t.clone()),
        _ => {
            let t = DeviceTensor::new(ctx, DType::Compact8, shape)?;
            *slot = Some(t.clone());
            Ok(t)
        }
    }
}

/// Instantiates layer `index` of a network as described by `spec`.
///
/// Linear parameters are taken from `weights` under the names
/// `"<index>.weight"` and `"<index>.bias"`.
pub fn build_layer(
    ctx: &Context,
    ops: &Dispatcher,
    index: usize,
    spec: &LayerSpec,
    rounding: RoundingMode,
    weights: &mut WeightLoader,
) -> Result<Box<dyn Layer>, RuntimeError> {
    let mut layer: Box<dyn Layer> = match *spec {
        LayerSpec::Linear {
            in_features,
            out_features,
            bias,
            input_scale,
            output_scale,
        } => {
            let mut linear = Linear::new(
                ctx,
                ops,
                in_features,
                out_features,
                bias,
                Scales::new(input_scale, output_scale),
            )?;
            let weight = weights.load(&weight_name(index), [out_features, in_features], in_features)?;
            linear.set_weight_host(ctx, ops, &weight)?;
            if bias {
                let values = weights.load(&bias_name(index), [out_features], in_features)?;
                linear.set_bias_host(ctx, ops, &values)?;
            }
            Box::new(linear)
        }
        LayerSpec::Relu => Box::new(ReLU::new()),
        LayerSpec::Sigmoid => Box::new(Sigmoid::new()),
    };
    layer.set_rounding(rounding);
    Ok(layer)
}
