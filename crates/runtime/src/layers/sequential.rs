// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Ordered layer container.

use super::{Layer, LayerState, ParameterInfo};
use crate::RuntimeError;
use device::Context;
use tensor_core::{DeviceTensor, Dispatcher, RoundingMode, TensorError};

/// Runs its layers in order on the forward pass and in reverse on the
/// backward pass.
///
/// Errors raised by a child are attributed to it as
/// `"<index>: <description>"`.
#[derive(Debug, Default)]
pub struct Sequential {
    name: String,
    layers: Vec<Box<dyn Layer>>,
    state: LayerState,
}

impl Sequential {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Appends `layer`, which adopts this container's rounding mode.
    pub fn push(&mut self, mut layer: Box<dyn Layer>) {
        layer.set_rounding(self.state.rounding);
        self.layers.push(layer);
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    pub fn layer(&self, index: usize) -> Option<&dyn Layer> {
        self.layers.get(index).map(|l| l.as_ref())
    }

    pub fn layer_mut(&mut self, index: usize) -> Option<&mut (dyn Layer + 'static)> {
        self.layers.get_mut(index).map(|l| l.as_mut())
    }

    /// Forward pass calling `observe(index, layer, output)` after each layer
    /// has been issued.
    pub fn forward_observed<F>(
        &mut self,
        ctx: &Context,
        ops: &Dispatcher,
        input: &DeviceTensor,
        mut observe: F,
    ) -> Result<DeviceTensor, RuntimeError>
    where
        F: FnMut(usize, &dyn Layer, &DeviceTensor) -> Result<(), RuntimeError>,
    {
        self.state.input = Some(input.clone());
        let mut current = input.clone();
        for (index, layer) in self.layers.iter_mut().enumerate() {
            current = layer
                .forward(ctx, ops, &current)
                .map_err(|e| e.in_layer(format!("{index}: {}", layer.describe())))?;
            tracing::trace!(layer = index, shape = %current.shape(), "layer issued");
            observe(index, &**layer, &current)?;
        }
        self.state.output = Some(current.clone());
        Ok(current)
    }
}

impl Layer for Sequential {
    fn describe(&self) -> String {
        let mut out = String::from("Sequential");
        if !self.name.is_empty() {
            out.push(' ');
            out.push_str(&self.name);
        }
        for (index, layer) in self.layers.iter().enumerate() {
            out.push_str(&format!("\n{index}: {}", layer.describe()));
        }
        out
    }

    fn rounding(&self) -> RoundingMode {
        self.state.rounding
    }

    fn set_rounding(&mut self, mode: RoundingMode) {
        self.state.rounding = mode;
        for layer in &mut self.layers {
            layer.set_rounding(mode);
        }
    }

    fn forward(
        &mut self,
        ctx: &Context,
        ops: &Dispatcher,
        input: &DeviceTensor,
    ) -> Result<DeviceTensor, RuntimeError> {
        self.forward_observed(ctx, ops, input, |_, _, _| Ok(()))
    }

    fn update_grad_input(
        &mut self,
        ctx: &Context,
        ops: &Dispatcher,
        input: &DeviceTensor,
        grad_output: &DeviceTensor,
    ) -> Result<DeviceTensor, RuntimeError> {
        self.state.check_input("sequential_backward", input)?;
        let mut grad = grad_output.clone();
        for (index, layer) in self.layers.iter_mut().enumerate().rev() {
            let layer_input = layer.input().cloned().ok_or_else(|| {
                RuntimeError::from(TensorError::Aliasing {
                    op: "sequential_backward",
                    detail: "layer has not run forward".into(),
                })
            })?;
            grad = layer
                .update_grad_input(ctx, ops, &layer_input, &grad)
                .map_err(|e| e.in_layer(format!("{index}: {}", layer.describe())))?;
        }
        self.state.grad_input = Some(grad.clone());
        Ok(grad)
    }

    fn acc_grad_parameters(
        &mut self,
        ctx: &Context,
        ops: &Dispatcher,
        scale: f32,
        input: &DeviceTensor,
        grad_output: &DeviceTensor,
    ) -> Result<(), RuntimeError> {
        // Layer i sees the output of layer i-1 and the input gradient of i+1.
        let inputs: Vec<DeviceTensor> = std::iter::once(Some(input.clone()))
            .chain(self.layers.iter().map(|l| l.output().cloned()))
            .take(self.layers.len())
            .collect::<Option<_>>()
            .ok_or_else(|| missing("acc_grad_parameters", "layer has not run forward"))?;
        let grads: Vec<DeviceTensor> = self
            .layers
            .iter()
            .skip(1)
            .map(|l| l.grad_input().cloned())
            .chain(std::iter::once(Some(grad_output.clone())))
            .collect::<Option<_>>()
            .ok_or_else(|| missing("acc_grad_parameters", "layer has not run backward"))?;

        for (index, layer) in self.layers.iter_mut().enumerate() {
            layer
                .acc_grad_parameters(ctx, ops, scale, &inputs[index], &grads[index])
                .map_err(|e| e.in_layer(format!("{index}: {}", layer.describe())))?;
        }
        Ok(())
    }

    fn parameters(&self) -> Vec<ParameterInfo> {
        self.layers.iter().flat_map(|l| l.parameters()).collect()
    }

    fn zero_grad(&mut self, ops: &Dispatcher) -> Result<(), RuntimeError> {
        for layer in &mut self.layers {
            layer.zero_grad(ops)?;
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

fn missing(op: &'static str, detail: &str) -> RuntimeError {
    TensorError::Aliasing {
        op,
        detail: detail.into(),
    }
    .into()
}
