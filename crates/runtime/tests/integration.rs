// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Integration tests: end-to-end inference pipeline.
//!
//! These tests exercise the complete flow from a TOML file and a
//! SafeTensors weight file through context creation, network construction
//! and execution, proving that the three crates compose correctly.

use device::{Context, MemoryBudget};
use runtime::layers::{Layer, Linear, Sequential, Sigmoid};
use runtime::{InferenceEngine, RuntimeConfig, RuntimeError};
use std::io::Write;
use std::path::Path;
use tensor_core::{Compact8, DeviceTensor, Dispatcher, HostTensor, Scales, Shape};

// ── Helpers ────────────────────────────────────────────────────

/// Writes a SafeTensors file holding `tensors` as `F32`.
fn write_safetensors(path: &Path, tensors: &[(&str, &[usize], &[f32])]) {
    let mut header = String::from("{");
    let mut data = Vec::new();
    for (i, (name, shape, values)) in tensors.iter().enumerate() {
        let start = data.len();
        for v in values.iter() {
            data.extend_from_slice(&v.to_le_bytes());
        }
        if i > 0 {
            header.push(',');
        }
        header.push_str(&format!(
            "\"{name}\":{{\"dtype\":\"F32\",\"shape\":{shape:?},\"data_offsets\":[{start},{}]}}",
            data.len()
        ));
    }
    header.push('}');

    let mut file = std::fs::File::create(path).unwrap();
    file.write_all(&(header.len() as u64).to_le_bytes()).unwrap();
    file.write_all(header.as_bytes()).unwrap();
    file.write_all(&data).unwrap();
}

/// Writes `network.toml` and `weights.safetensors` for a 2 -> 2 linear
/// layer followed by ReLU.
fn write_model(dir: &Path, profiling: bool) -> std::path::PathBuf {
    let weights = dir.join("weights.safetensors");
    write_safetensors(
        &weights,
        &[
            ("0.weight", &[2, 2], &[1.0, 2.0, 3.0, 4.0]),
            ("0.bias", &[2], &[0.5, -1.0]),
        ],
    );

    let config = dir.join("network.toml");
    std::fs::write(
        &config,
        format!(
            r#"
memory_budget = "1M"
enable_profiling = {profiling}
weights_path = "{}"

[[layers]]
type = "linear"
in_features = 2
out_features = 2

[[layers]]
type = "relu"
"#,
            weights.display()
        ),
    )
    .unwrap();
    config
}

// ── Tests ──────────────────────────────────────────────────────

#[tokio::test]
async fn test_file_backed_network() {
    let dir = tempfile::tempdir().unwrap();
    let config = RuntimeConfig::from_file(&write_model(dir.path(), true)).unwrap();
    let engine = InferenceEngine::new(config).prepare().unwrap();

    let input = HostTensor::from_slice([2, 2], &[1.0f32, 1.0, 1.0, -1.0]).unwrap();
    let output = engine.run(input).await.unwrap();

    assert_eq!(output.shape, Shape::matrix(2, 2));
    // [1, 1] -> [3.5, 6]; [1, -1] -> relu([-0.5, -2])
    assert_eq!(output.values, vec![3.5, 6.0, 0.0, 0.0]);
    assert_eq!(output.metrics.layer_metrics.len(), 2);
    assert_eq!(output.metrics.layer_metrics[1].layer_name, "1: ReLU");
}

#[tokio::test]
async fn test_exponent_adjustment_at_the_boundary() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = RuntimeConfig::from_file(&write_model(dir.path(), false)).unwrap();
    config.input_exp_adjust = -1;
    config.output_exp_adjust = 2;
    let engine = InferenceEngine::new(config).prepare().unwrap();

    // Input is halved on the way in and the output quadrupled on the way out.
    let input = HostTensor::from_slice([2], &[2.0f32, 2.0]).unwrap();
    let output = engine.run(input).await.unwrap();
    assert_eq!(output.values, vec![14.0, 24.0]);
}

#[tokio::test]
async fn test_missing_weights_fall_back_to_synthetic() {
    let dir = tempfile::tempdir().unwrap();
    let config = RuntimeConfig::from_toml(&format!(
        r#"
memory_budget = "1M"
seed = 7
weights_path = "{}"

[[layers]]
type = "linear"
in_features = 3
out_features = 1
bias = false

[[layers]]
type = "sigmoid"
"#,
        dir.path().join("absent.safetensors").display()
    ))
    .unwrap();

    let engine = InferenceEngine::new(config).prepare().unwrap();
    let output = engine
        .run(HostTensor::from_slice([3], &[0.5f32, 0.5, 0.5]).unwrap())
        .await
        .unwrap();
    assert_eq!(output.values.len(), 1);
    assert!((0.0..=1.0).contains(&output.values[0]));
}

#[test]
fn test_bad_weight_shape_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let weights = dir.path().join("weights.safetensors");
    write_safetensors(&weights, &[("0.weight", &[4], &[1.0, 2.0, 3.0, 4.0])]);

    let config = RuntimeConfig {
        memory_budget: "1M".into(),
        weights_path: Some(weights),
        layers: vec![runtime::LayerSpec::Linear {
            in_features: 2,
            out_features: 2,
            bias: false,
            input_scale: 0,
            output_scale: 0,
        }],
        ..Default::default()
    };
    match InferenceEngine::new(config).prepare() {
        Err(RuntimeError::WeightLoad { name, .. }) => assert_eq!(name, "0.weight"),
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn test_budget_too_small_for_network() {
    let config = RuntimeConfig {
        memory_budget: "1K".into(),
        layers: vec![runtime::LayerSpec::Linear {
            in_features: 64,
            out_features: 64,
            bias: true,
            input_scale: 0,
            output_scale: 0,
        }],
        ..Default::default()
    };
    assert!(InferenceEngine::new(config).prepare().is_err());
}

/// One gradient step through a hand-assembled network.
#[test]
fn test_training_step_through_layers() {
    let ctx = Context::with_budget(MemoryBudget::from_mb(2)).unwrap();
    let ops = Dispatcher::reference(&ctx, 1);

    let mut linear = Linear::new(&ctx, &ops, 2, 1, true, Scales::default()).unwrap();
    linear
        .set_weight_host(&ctx, &ops, &HostTensor::from_slice([1, 2], &[1.0f32, -1.0]).unwrap())
        .unwrap();
    linear
        .set_bias_host(&ctx, &ops, &HostTensor::from_slice([1], &[0.0f32]).unwrap())
        .unwrap();

    let mut net = Sequential::new("probe");
    net.push(Box::new(linear));
    net.push(Box::new(Sigmoid::new()));

    let codes = [Compact8::from_f32(1.0), Compact8::from_f32(1.0)];
    let (x, _) = DeviceTensor::upload(&ctx, ops.queue(), &HostTensor::from_slice([2], &codes).unwrap()).unwrap();
    let y = net.forward(&ctx, &ops, &x).unwrap();
    // sigmoid(1 - 1 + 0) = 0.5
    let out = y.to_host(ops.queue()).unwrap().to_vec::<Compact8>().unwrap();
    assert_eq!(out[0].to_f32(), 0.5);

    let (g, _) = DeviceTensor::upload(
        &ctx,
        ops.queue(),
        &HostTensor::from_slice([1], &[Compact8::ONE]).unwrap(),
    )
    .unwrap();
    net.zero_grad(&ops).unwrap();
    net.update_grad_input(&ctx, &ops, &x, &g).unwrap();
    net.acc_grad_parameters(&ctx, &ops, 1.0, &x, &g).unwrap();

    // d sigmoid = 0.25, so every weight gradient is 0.25 * x = 0.25.
    let params = net.parameters();
    assert_eq!(params.len(), 2);
    let grad_w = params[0].grad.to_host(ops.queue()).unwrap().to_vec::<Compact8>().unwrap();
    assert!(grad_w.iter().all(|c| c.to_f32() == 0.25));
    let grad_b = params[1].grad.to_host(ops.queue()).unwrap().to_vec::<Compact8>().unwrap();
    assert_eq!(grad_b[0].to_f32(), 0.25);
}
