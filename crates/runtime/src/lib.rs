// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # runtime
//!
//! Runs small networks on the compact-float device.
//!
//! The runtime takes:
//! - A [`RuntimeConfig`] describing the memory budget, rounding mode and
//!   the layer stack (`[[layers]]` in TOML).
//! - Optionally a SafeTensors file with the layer weights.
//!
//! And builds the layers from [`layers`] on a device context, then executes
//! them with per-layer timing and memory profiling.
//!
//! # Type-State Pipeline
//! ```text
//! InferenceEngine<Idle> → InferenceEngine<Ready>
//! ```
//! Transitions are compile-time checked.
//!
//! # Async Execution
//! `run` hands device work to `tokio`'s blocking pool and awaits its
//! completion, so callers on the async runtime are never blocked by the
//! device queue.

mod config;
mod engine;
mod error;
pub mod layers;
mod metrics;
mod weight_loader;

pub use config::{LayerSpec, RuntimeConfig};
pub use engine::{EngineState, Idle, InferenceEngine, InferenceOutput, Ready};
pub use error::RuntimeError;
pub use metrics::{InferenceMetrics, LayerMetrics};
pub use weight_loader::{bias_name, weight_name, WeightLoader};
