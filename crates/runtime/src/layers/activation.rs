// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Elementwise activations.

use super::{Layer, LayerState};
use crate::RuntimeError;
use device::Context;
use tensor_core::{Compact8, CompareOp, DeviceTensor, Dispatcher, RoundingMode, TensorError};

fn expect_same_size(op: &'static str, a: &DeviceTensor, b: &DeviceTensor) -> Result<(), RuntimeError> {
    if !a.is_same_size(b) {
        return Err(TensorError::ShapeMismatch {
            op,
            lhs: a.shape().clone(),
            rhs: b.shape().clone(),
        }
        .into());
    }
    Ok(())
}

/// `max(x, 0)`.
#[derive(Debug, Default)]
pub struct ReLU {
    state: LayerState,
}

impl ReLU {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Layer for ReLU {
    fn describe(&self) -> String {
        "ReLU".to_string()
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
        let output = self.state.output_for(ctx, input.shape().clone())?;
        self.state.input = Some(input.clone());
        ops.max(input, Compact8::ZERO, &output)?;
        Ok(output)
    }

    /// `grad_input = input > 0 ? grad_output : 0`.
    fn update_grad_input(
        &mut self,
        ctx: &Context,
        ops: &Dispatcher,
        input: &DeviceTensor,
        grad_output: &DeviceTensor,
    ) -> Result<DeviceTensor, RuntimeError> {
        self.state.check_input("relu_backward", input)?;
        expect_same_size("relu_backward", input, grad_output)?;
        let grad_input = self.state.grad_input_for(ctx, grad_output.shape().clone())?;
        ops.threshold(input, Compact8::ZERO, grad_output, CompareOp::Gt, &grad_input)?;
        Ok(grad_input)
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

/// `1 / (1 + e^-x)`.
#[derive(Debug, Default)]
pub struct Sigmoid {
    state: LayerState,
}

impl Sigmoid {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Layer for Sigmoid {
    fn describe(&self) -> String {
        "Sigmoid".to_string()
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
        let output = self.state.output_for(ctx, input.shape().clone())?;
        self.state.input = Some(input.clone());
        ops.sigmoid(input, &output)?;
        Ok(output)
    }

    /// `grad_input = grad_output * (1 - output) * output`.
    fn update_grad_input(
        &mut self,
        ctx: &Context,
        ops: &Dispatcher,
        input: &DeviceTensor,
        grad_output: &DeviceTensor,
    ) -> Result<DeviceTensor, RuntimeError> {
        self.state.check_input("sigmoid_backward", input)?;
        let output = match &self.state.output {
            Some(output) => output.clone(),
            None => missing_output("sigmoid_backward")?,
        };
        expect_same_size("sigmoid_backward", &output, grad_output)?;
        let rounding = self.state.rounding;
        let grad_input = self.state.grad_input_for(ctx, output.shape().clone())?;
        // 1 - output
        ops.mul_add(
            Compact8::ONE,
            0,
            Compact8::ONE,
            &output,
            0,
            true,
            rounding,
            0,
            &grad_input,
        )?;
        ops.mul(&grad_input, &output, rounding, &grad_input)?;
        ops.mul(&grad_input, grad_output, rounding, &grad_input)?;
        Ok(grad_input)
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

fn missing_output(op: &'static str) -> Result<DeviceTensor, RuntimeError> {
    Err(TensorError::Aliasing {
        op,
        detail: "no forward pass has produced an output".into(),
    }
    .into())
}
