// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Inference profiling metrics.
//!
//! [`InferenceMetrics`] collects per-layer timing and device memory for one
//! call to the engine. Layer times cover kernel execution only when the
//! engine runs with profiling enabled; otherwise they measure enqueue time.

use std::time::Duration;

/// Metrics for a single layer's forward pass.
#[derive(Debug, Clone, serde::Serialize)]
pub struct LayerMetrics {
    /// Layer description.
    pub layer_name: String,
    pub compute_duration: Duration,
    /// Device bytes live once the layer's output was allocated.
    pub live_device_bytes: usize,
}

/// Aggregate metrics for a complete inference run.
#[derive(Debug, Clone, serde::Serialize)]
pub struct InferenceMetrics {
    /// Wall-clock time including host/device transfers.
    pub total_duration: Duration,
    /// Time spent uploading the input, quantizing it and reading back the result.
    pub transfer_duration: Duration,
    pub total_compute_duration: Duration,
    /// Highest device usage of the context so far.
    pub peak_device_bytes: usize,
    pub layer_metrics: Vec<LayerMetrics>,
    /// Number of input samples (batch rows) processed.
    pub samples: usize,
}

impl InferenceMetrics {
    pub fn new(samples: usize) -> Self {
        Self {
            total_duration: Duration::ZERO,
            transfer_duration: Duration::ZERO,
            total_compute_duration: Duration::ZERO,
            peak_device_bytes: 0,
            layer_metrics: Vec::new(),
            samples,
        }
    }

    pub fn record_layer(&mut self, name: String, compute: Duration, live_bytes: usize) {
        self.total_compute_duration += compute;
        self.peak_device_bytes = self.peak_device_bytes.max(live_bytes);
        self.layer_metrics.push(LayerMetrics {
            layer_name: name,
            compute_duration: compute,
            live_device_bytes: live_bytes,
        });
    }

    /// Finalises metrics with the total wall-clock time, the transfer time
    /// and the context's peak usage.
    pub fn finalise(&mut self, total: Duration, transfer: Duration, peak_bytes: usize) {
        self.total_duration = total;
        self.transfer_duration = transfer;
        self.peak_device_bytes = self.peak_device_bytes.max(peak_bytes);
    }

    pub fn samples_per_second(&self) -> f64 {
        let secs = self.total_duration.as_secs_f64();
        if secs <= 0.0 || self.samples == 0 {
            return 0.0;
        }
        self.samples as f64 / secs
    }

    /// Returns a human-readable summary.
    pub fn summary(&self) -> String {
        let peak_kb = self.peak_device_bytes as f64 / 1024.0;
        let transfer_pct = if self.total_duration.as_secs_f64() > 0.0 {
            self.transfer_duration.as_secs_f64() / self.total_duration.as_secs_f64() * 100.0
        } else {
            0.0
        };

        format!(
            "Inference: {:.3}ms total, {} layers, {:.3}ms transfer ({:.0}%), \
             {:.3}ms compute, peak {:.1} KiB, {} samples ({:.1} samples/s)",
            self.total_duration.as_secs_f64() * 1000.0,
            self.layer_metrics.len(),
            self.transfer_duration.as_secs_f64() * 1000.0,
            transfer_pct,
            self.total_compute_duration.as_secs_f64() * 1000.0,
            peak_kb,
            self.samples,
            self.samples_per_second(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_metrics() {
        let m = InferenceMetrics::new(0);
        assert_eq!(m.samples_per_second(), 0.0);
        assert!(m.layer_metrics.is_empty());
    }

    #[test]
    fn test_record_and_finalise() {
        let mut m = InferenceMetrics::new(4);
        m.record_layer("Linear (2 -> 3)".into(), Duration::from_millis(2), 600);
        m.record_layer("ReLU".into(), Duration::from_millis(1), 900);
        m.finalise(Duration::from_millis(10), Duration::from_millis(4), 700);

        assert_eq!(m.layer_metrics.len(), 2);
        assert_eq!(m.total_compute_duration, Duration::from_millis(3));
        assert_eq!(m.peak_device_bytes, 900);
        assert!((m.samples_per_second() - 400.0).abs() < 0.01);
    }

    #[test]
    fn test_summary_format() {
        let mut m = InferenceMetrics::new(1);
        m.record_layer("Sigmoid".into(), Duration::from_millis(1), 2048);
        m.finalise(Duration::from_millis(5), Duration::from_millis(1), 0);

        let s = m.summary();
        assert!(s.contains("Inference:"));
        assert!(s.contains("1 layers"));
        assert!(s.contains("peak 2.0 KiB"));
        assert!(s.contains("(20%)"));
    }
}
