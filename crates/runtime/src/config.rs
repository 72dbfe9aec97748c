// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Runtime configuration loaded from TOML files or constructed programmatically.
//!
//! # TOML Format
//! ```toml
//! memory_budget = "64M"
//! rounding = "nearest_even"
//! seed = 7
//! enable_profiling = true
//! weights_path = "./models/mlp/model.safetensors"
//!
//! [[layers]]
//! type = "linear"
//! in_features = 784
//! out_features = 128
//! output_scale = -2
//!
//! [[layers]]
//! type = "relu"
//! ```

use crate::RuntimeError;
use device::MemoryBudget;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tensor_core::RoundingMode;

/// One layer of the network, in execution order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LayerSpec {
    Linear {
        in_features: usize,
        out_features: usize,
        #[serde(default = "default_true")]
        bias: bool,
        /// Exponent applied to every product before accumulation.
        #[serde(default)]
        input_scale: i8,
        /// Exponent applied to the accumulated sum.
        #[serde(default)]
        output_scale: i8,
    },
    Relu,
    Sigmoid,
}

/// Configuration for the runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Device memory budget (human-readable, e.g. `"64M"`).
    pub memory_budget: String,
    /// Rounding applied by every layer.
    #[serde(default)]
    pub rounding: RoundingMode,
    /// Seed for stochastic rounding and synthetic weights.
    #[serde(default)]
    pub seed: u64,
    /// Whether to record per-layer timing.
    #[serde(default = "default_true")]
    pub enable_profiling: bool,
    /// SafeTensors file holding `"<index>.weight"`/`"<index>.bias"` tensors.
    /// Synthetic weights are generated when absent.
    #[serde(default)]
    pub weights_path: Option<PathBuf>,
    /// Exponent applied when quantizing inputs.
    #[serde(default)]
    pub input_exp_adjust: i8,
    /// Exponent applied when dequantizing outputs.
    #[serde(default)]
    pub output_exp_adjust: i8,
    #[serde(default)]
    pub layers: Vec<LayerSpec>,
}

fn default_true() -> bool {
    true
}

impl RuntimeConfig {
    /// Loads configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, RuntimeError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            RuntimeError::Config(format!("cannot read config '{}': {e}", path.display()))
        })?;
        Self::from_toml(&content)
    }

    /// Parses configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self, RuntimeError> {
        toml::from_str(toml_str)
            .map_err(|e| RuntimeError::Config(format!("TOML parse error: {e}")))
    }

    /// Serialises configuration to TOML.
    pub fn to_toml(&self) -> Result<String, RuntimeError> {
        toml::to_string_pretty(self)
            .map_err(|e| RuntimeError::Config(format!("TOML serialise error: {e}")))
    }

    /// Parses the memory budget string into a [`MemoryBudget`].
    pub fn parse_budget(&self) -> Result<MemoryBudget, RuntimeError> {
        MemoryBudget::parse(&self.memory_budget)
            .map_err(|e| RuntimeError::Config(format!("invalid budget: {e}")))
    }

    /// Checks that the layer stack is non-empty and that consecutive
    /// linear layers agree on their feature counts.
    pub fn validate(&self) -> Result<(), RuntimeError> {
        if self.layers.is_empty() {
            return Err(RuntimeError::Config("no layers configured".into()));
        }
        let mut features: Option<usize> = None;
        for (index, layer) in self.layers.iter().enumerate() {
            if let LayerSpec::Linear {
                in_features,
                out_features,
                ..
            } = layer
            {
                if *in_features == 0 || *out_features == 0 {
                    return Err(RuntimeError::Config(format!(
                        "layer {index}: feature counts must be non-zero"
                    )));
                }
                if let Some(previous) = features {
                    if previous != *in_features {
                        return Err(RuntimeError::Config(format!(
                            "layer {index}: expects {in_features} input features, previous layer produces {previous}"
                        )));
                    }
                }
                features = Some(*out_features);
            }
        }
        Ok(())
    }

    /// Input feature count of the first linear layer, if any.
    pub fn input_features(&self) -> Option<usize> {
        self.layers.iter().find_map(|l| match l {
            LayerSpec::Linear { in_features, .. } => Some(*in_features),
            _ => None,
        })
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            memory_budget: "64M".to_string(),
            rounding: RoundingMode::NearestEven,
            seed: 0,
            enable_profiling: true,
            weights_path: None,
            input_exp_adjust: 0,
            output_exp_adjust: 0,
            layers: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mlp() -> Vec<LayerSpec> {
        vec![
            LayerSpec::Linear {
                in_features: 4,
                out_features: 8,
                bias: true,
                input_scale: 0,
                output_scale: 0,
            },
            LayerSpec::Relu,
            LayerSpec::Linear {
                in_features: 8,
                out_features: 2,
                bias: false,
                input_scale: 0,
                output_scale: -1,
            },
            LayerSpec::Sigmoid,
        ]
    }

    #[test]
    fn test_default() {
        let c = RuntimeConfig::default();
        assert_eq!(c.memory_budget, "64M");
        assert_eq!(c.rounding, RoundingMode::NearestEven);
        assert!(c.enable_profiling);
        assert!(c.layers.is_empty());
    }

    #[test]
    fn test_parse_budget() {
        let c = RuntimeConfig {
            memory_budget: "256M".into(),
            ..Default::default()
        };
        assert_eq!(c.parse_budget().unwrap().as_mb(), 256);

        let bad = RuntimeConfig {
            memory_budget: "lots".into(),
            ..Default::default()
        };
        assert!(matches!(bad.parse_budget(), Err(RuntimeError::Config(_))));
    }

    #[test]
    fn test_from_toml() {
        let toml = r#"
memory_budget = "1G"
rounding = "stochastic"
seed = 11
enable_profiling = false

[[layers]]
type = "linear"
in_features = 4
out_features = 8
output_scale = -2

[[layers]]
type = "relu"
"#;
        let c = RuntimeConfig::from_toml(toml).unwrap();
        assert_eq!(c.memory_budget, "1G");
        assert_eq!(c.rounding, RoundingMode::Stochastic);
        assert_eq!(c.seed, 11);
        assert!(!c.enable_profiling);
        assert_eq!(
            c.layers[0],
            LayerSpec::Linear {
                in_features: 4,
                out_features: 8,
                bias: true,
                input_scale: 0,
                output_scale: -2,
            }
        );
        assert_eq!(c.layers[1], LayerSpec::Relu);
    }

    #[test]
    fn test_to_toml_roundtrip() {
        let c = RuntimeConfig {
            layers: mlp(),
            ..Default::default()
        };
        let toml = c.to_toml().unwrap();
        let back = RuntimeConfig::from_toml(&toml).unwrap();
        assert_eq!(back.layers, c.layers);
        assert_eq!(back.memory_budget, c.memory_budget);
    }

    #[test]
    fn test_validate() {
        let mut c = RuntimeConfig {
            layers: mlp(),
            ..Default::default()
        };
        c.validate().unwrap();
        assert_eq!(c.input_features(), Some(4));

        c.layers[2] = LayerSpec::Linear {
            in_features: 5,
            out_features: 2,
            bias: false,
            input_scale: 0,
            output_scale: 0,
        };
        assert!(c.validate().is_err());
        assert!(RuntimeConfig::default().validate().is_err());
    }

    #[test]
    fn test_unknown_layer_type_rejected() {
        let toml = "memory_budget = \"1M\"\n[[layers]]\ntype = \"conv3d\"\n";
        assert!(RuntimeConfig::from_toml(toml).is_err());
    }
}
