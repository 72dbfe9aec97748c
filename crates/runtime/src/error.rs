// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for the runtime.

use device::DeviceError;
use tensor_core::TensorError;

/// Errors that can occur while configuring or running a network.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Failed to load or bind a weight tensor.
    #[error("weight loading failed for '{name}': {detail}")]
    WeightLoad { name: String, detail: String },

    /// A tensor operation failed inside a layer of a network.
    #[error("execution error in layer '{layer}': {source}")]
    Layer {
        layer: String,
        #[source]
        source: TensorError,
    },

    /// A tensor operation failed outside of any layer.
    #[error(transparent)]
    Tensor(#[from] TensorError),

    /// Device allocation, queue or kernel failure.
    #[error(transparent)]
    Device(#[from] DeviceError),

    /// The blocking task driving the device was cancelled or panicked.
    #[error("execution task failed: {0}")]
    Task(String),
}

impl RuntimeError {
    /// Attributes a bare tensor error to `layer`. Other variants pass
    /// through unchanged, so the innermost attribution wins.
    pub fn in_layer(self, layer: impl Into<String>) -> Self {
        match self {
            RuntimeError::Tensor(source) => RuntimeError::Layer {
                layer: layer.into(),
                source,
            },
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_layer_wraps_tensor_errors_once() {
        let err = RuntimeError::from(TensorError::Range {
            op: "narrow",
            detail: "out of bounds".into(),
        })
        .in_layer("0: Linear (2 -> 3)")
        .in_layer("Sequential");
        match err {
            RuntimeError::Layer { layer, .. } => assert_eq!(layer, "0: Linear (2 -> 3)"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_device_error_display_is_transparent() {
        let err = RuntimeError::from(DeviceError::ProfilingUnavailable);
        assert_eq!(err.to_string(), DeviceError::ProfilingUnavailable.to_string());
    }
}
