// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The inference engine with a type-state-enforced pipeline.
//!
//! ```text
//! InferenceEngine<Idle>
//!     │  .prepare()
//!     ▼
//! InferenceEngine<Ready>
//!     │  .run()
//!     ▼
//!   InferenceOutput
//! ```
//!
//! `prepare` opens the device context, builds the configured network and
//! binds its weights. Each state transition consumes the old value, so
//! running an unprepared engine is a compile error.

use crate::layers::{build_layer, Layer, Sequential};
use crate::{InferenceMetrics, RuntimeConfig, RuntimeError, WeightLoader};
use device::{AllocationStats, Context, DeviceError, DeviceInfo};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tensor_core::{
    DType, DeviceTensor, Dispatcher, HostTensor, KernelBackend, ReferenceBackend, Shape,
};

// ── Type-state markers ─────────────────────────────────────────

/// Engine is created but holds no device resources.
#[derive(Debug)]
pub struct Idle;

/// Device context is open and the network is built.
pub struct Ready {
    ctx: Arc<Context>,
    ops: Dispatcher,
    network: Arc<Mutex<Sequential>>,
}

impl std::fmt::Debug for Ready {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ready")
            .field("live_bytes", &self.ctx.live_bytes())
            .field("backend", &self.ops.backend().name())
            .finish()
    }
}

/// Sealed trait for engine states.
pub trait EngineState: std::fmt::Debug {}
impl EngineState for Idle {}
impl EngineState for Ready {}

// ── Inference output ───────────────────────────────────────────

/// The result of a single inference run.
#[derive(Debug)]
pub struct InferenceOutput {
    /// Dequantized network output, row-major.
    pub values: Vec<f32>,
    pub shape: Shape,
    pub metrics: InferenceMetrics,
}

// ── Engine ─────────────────────────────────────────────────────

/// Runs a configured network on the compact-float device.
///
/// # Example
/// ```no_run
/// use runtime::{InferenceEngine, RuntimeConfig};
/// use tensor_core::HostTensor;
///
/// # async fn example() -> Result<(), runtime::RuntimeError> {
/// let config = RuntimeConfig::from_file("network.toml".as_ref())?;
/// let engine = InferenceEngine::new(config).prepare()?;
/// let input = HostTensor::from_slice([2], &[0.5f32, -1.0])?;
/// let output = engine.run(input).await?;
/// println!("{}", output.metrics.summary());
/// # Ok(())
/// # }
/// ```
pub struct InferenceEngine<S: EngineState = Idle> {
    config: RuntimeConfig,
    state: S,
}

impl<S: EngineState> InferenceEngine<S> {
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }
}

// ── Idle → Ready ───────────────────────────────────────────────

impl InferenceEngine<Idle> {
    /// Creates a new engine from the given configuration.
    pub fn new(config: RuntimeConfig) -> Self {
        tracing::info!(
            "engine created: {} layers, {} rounding",
            config.layers.len(),
            config.rounding
        );
        Self { config, state: Idle }
    }

    /// Opens the device context and builds the network.
    /// Transitions to the `Ready` state.
    ///
    /// Steps:
    /// 1. Validate the layer stack and parse the memory budget.
    /// 2. Open a context and a dispatcher on a seeded reference backend.
    /// 3. Build each layer, binding weights from file or synthetic data.
    pub fn prepare(self) -> Result<InferenceEngine<Ready>, RuntimeError> {
        let backend = Arc::new(ReferenceBackend::seeded(self.config.seed));
        self.prepare_with_backend(backend)
    }

    /// Like [`prepare`](Self::prepare), launching kernels on `backend`.
    pub fn prepare_with_backend(
        self,
        backend: Arc<dyn KernelBackend>,
    ) -> Result<InferenceEngine<Ready>, RuntimeError> {
        self.config.validate()?;
        let budget = self.config.parse_budget()?;
        tracing::info!("memory budget: {budget}");

        let info = DeviceInfo {
            profiling: self.config.enable_profiling,
            ..DeviceInfo::default()
        };
        let ctx = Context::new(info, budget)?;
        let ops = Dispatcher::new(ctx.default_queue().clone(), backend);

        let mut weights = WeightLoader::new(self.config.weights_path.as_deref(), self.config.seed)?;
        tracing::info!(
            "weight loader: {} mode",
            if weights.is_file_backed() { "file-backed" } else { "synthetic" }
        );

        let mut network = Sequential::new("network");
        network.set_rounding(self.config.rounding);
        for (index, spec) in self.config.layers.iter().enumerate() {
            network.push(build_layer(
                &ctx,
                &ops,
                index,
                spec,
                self.config.rounding,
                &mut weights,
            )?);
        }
        ops.finish()?;
        tracing::info!(
            "network ready, {} bytes of device memory in use",
            ctx.live_bytes()
        );

        Ok(InferenceEngine {
            config: self.config,
            state: Ready {
                ctx: Arc::new(ctx),
                ops,
                network: Arc::new(Mutex::new(network)),
            },
        })
    }
}

// ── Ready: run inference ───────────────────────────────────────

impl InferenceEngine<Ready> {
    pub fn context(&self) -> &Context {
        &self.state.ctx
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.state.ops
    }

    /// Returns the current device allocator statistics.
    pub fn memory_stats(&self) -> AllocationStats {
        self.state.ctx.memory_stats()
    }

    /// Description of the network, one line per layer.
    pub fn describe(&self) -> Result<String, RuntimeError> {
        let network = self
            .state
            .network
            .lock()
            .map_err(|_| DeviceError::LockPoisoned)?;
        Ok(network.describe())
    }

    /// Runs the network on an `F32` input of shape `[features]` or
    /// `[batch, features]`.
    ///
    /// The input is quantized with `input_exp_adjust`, passed through every
    /// layer and dequantized with `output_exp_adjust`. Device work runs on a
    /// blocking task; concurrent calls are serialized.
    pub async fn run(&self, input: HostTensor) -> Result<InferenceOutput, RuntimeError> {
        let ctx = Arc::clone(&self.state.ctx);
        let ops = self.state.ops.clone();
        let network = Arc::clone(&self.state.network);
        let settings = RunSettings::from(&self.config);

        tokio::task::spawn_blocking(move || execute(&ctx, &ops, &network, &input, settings))
            .await
            .map_err(|e| RuntimeError::Task(e.to_string()))?
    }
}

#[derive(Debug, Clone, Copy)]
struct RunSettings {
    input_exp_adjust: i8,
    output_exp_adjust: i8,
    rounding: tensor_core::RoundingMode,
    profiling: bool,
}

impl From<&RuntimeConfig> for RunSettings {
    fn from(config: &RuntimeConfig) -> Self {
        Self {
            input_exp_adjust: config.input_exp_adjust,
            output_exp_adjust: config.output_exp_adjust,
            rounding: config.rounding,
            profiling: config.enable_profiling,
        }
    }
}

fn execute(
    ctx: &Context,
    ops: &Dispatcher,
    network: &Mutex<Sequential>,
    input: &HostTensor,
    settings: RunSettings,
) -> Result<InferenceOutput, RuntimeError> {
    let run_start = Instant::now();
    let samples = if input.rank() == 2 { input.size(0) } else { 1 };
    let mut metrics = InferenceMetrics::new(samples);
    let mut network = network.lock().map_err(|_| DeviceError::LockPoisoned)?;

    tracing::debug!("starting inference: input {}", input.shape());

    let transfer_start = Instant::now();
    let (staged, _) = DeviceTensor::upload(ctx, ops.queue(), input)?;
    let x = DeviceTensor::new(ctx, DType::Compact8, input.shape().clone())?;
    ops.to_compact(&staged, settings.input_exp_adjust, settings.rounding, &x)?;
    ops.finish()?;
    let mut transfer = transfer_start.elapsed();

    let mut layer_start = Instant::now();
    let y = network.forward_observed(ctx, ops, &x, |index, layer, _| {
        if settings.profiling {
            ops.finish()?;
        }
        metrics.record_layer(
            format!("{index}: {}", layer.describe()),
            layer_start.elapsed(),
            ctx.live_bytes(),
        );
        layer_start = Instant::now();
        Ok(())
    })?;

    let readback_start = Instant::now();
    let out = DeviceTensor::new(ctx, DType::F32, y.shape().clone())?;
    ops.to_float(&y, settings.output_exp_adjust, &out)?;
    let host = out.to_host(ops.queue())?;
    transfer += readback_start.elapsed();

    metrics.finalise(
        run_start.elapsed(),
        transfer,
        ctx.memory_stats().peak_live_bytes,
    );
    tracing::info!("{}", metrics.summary());

    Ok(InferenceOutput {
        values: host.to_vec::<f32>()?,
        shape: host.shape().clone(),
        metrics,
    })
}

impl<S: EngineState> std::fmt::Debug for InferenceEngine<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InferenceEngine")
            .field("state", &self.state)
            .field("layers", &self.config.layers.len())
            .field("rounding", &self.config.rounding)
            .finish()
    }
}
