// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Tensor initialisers.

use super::{validate, Dispatcher};
use crate::kernel::DeviceOp;
use crate::{DeviceTensor, TensorError};
use device::Event;

impl Dispatcher {
    /// Identity matrix (ones on the main diagonal of a possibly
    /// rectangular `out`).
    pub fn eye(&self, out: &DeviceTensor) -> Result<Event, TensorError> {
        validate::compact("eye", out)?;
        validate::rank("eye", out, &[2])?;
        Ok(self.enqueue(DeviceOp::Eye { out: out.clone() }))
    }

    /// Fills `out` with values drawn uniformly from `[low, high)` by the
    /// backend's generator, rounded to nearest.
    pub fn uniform(&self, low: f32, high: f32, out: &DeviceTensor) -> Result<Event, TensorError> {
        const OP: &str = "uniform";
        if !low.is_finite() || !high.is_finite() || low > high {
            return Err(TensorError::range(
                OP,
                format!("invalid bounds [{low}, {high})"),
            ));
        }
        validate::compact(OP, out)?;
        Ok(self.enqueue(DeviceOp::Uniform {
            low,
            high,
            out: out.clone(),
        }))
    }

    /// Fills `out` with draws from `N(mean, stddev^2)`, rounded to nearest.
    pub fn gaussian(
        &self,
        mean: f32,
        stddev: f32,
        out: &DeviceTensor,
    ) -> Result<Event, TensorError> {
        const OP: &str = "gaussian";
        if !mean.is_finite() || !stddev.is_finite() || stddev < 0.0 {
            return Err(TensorError::range(
                OP,
                format!("invalid distribution N({mean}, {stddev}^2)"),
            ));
        }
        validate::compact(OP, out)?;
        Ok(self.enqueue(DeviceOp::Gaussian {
            mean,
            stddev,
            out: out.clone(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use crate::{Compact8, DType, DeviceTensor, Dispatcher, ErrorKind};
    use device::{Context, MemoryBudget};

    #[test]
    fn test_eye_rectangular() {
        let ctx = Context::with_budget(MemoryBudget::from_mb(1)).unwrap();
        let d = Dispatcher::reference(&ctx, 0);
        let out = DeviceTensor::new(&ctx, DType::Compact8, [2, 3]).unwrap();
        d.eye(&out).unwrap().wait().unwrap();
        let got = out.to_host(d.queue()).unwrap().to_vec::<Compact8>().unwrap();
        let one = Compact8::ONE;
        let zero = Compact8::ZERO;
        assert_eq!(got, vec![one, zero, zero, zero, one, zero]);
    }

    #[test]
    fn test_uniform_in_bounds_and_seeded() {
        let sample = |seed| {
            let ctx = Context::with_budget(MemoryBudget::from_mb(1)).unwrap();
            let d = Dispatcher::reference(&ctx, seed);
            let out = DeviceTensor::new(&ctx, DType::Compact8, [64]).unwrap();
            d.uniform(-0.5, 0.5, &out).unwrap().wait().unwrap();
            out.to_host(d.queue()).unwrap().to_vec::<Compact8>().unwrap()
        };
        let a = sample(42);
        assert!(a.iter().all(|v| v.to_f32().abs() <= 0.5));
        assert_eq!(a, sample(42));
    }

    #[test]
    fn test_uniform_rejects_bad_bounds() {
        let ctx = Context::with_budget(MemoryBudget::from_mb(1)).unwrap();
        let d = Dispatcher::reference(&ctx, 0);
        let out = DeviceTensor::new(&ctx, DType::Compact8, [4]).unwrap();
        let err = d.uniform(1.0, -1.0, &out).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Range);
        assert!(d.uniform(f32::NAN, 1.0, &out).is_err());
    }

    #[test]
    fn test_gaussian_moments_and_seeded() {
        let sample = |seed| {
            let ctx = Context::with_budget(MemoryBudget::from_mb(1)).unwrap();
            let d = Dispatcher::reference(&ctx, seed);
            let out = DeviceTensor::new(&ctx, DType::Compact8, [4096]).unwrap();
            d.gaussian(1.0, 0.5, &out).unwrap();
            out.to_host(d.queue()).unwrap().to_vec::<Compact8>().unwrap()
        };
        let a = sample(7);
        assert_eq!(a, sample(7));
        assert_ne!(a, sample(8));

        let values: Vec<f64> = a.iter().map(|v| v.to_f64()).collect();
        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
        assert!((mean - 1.0).abs() < 0.05, "mean {mean}");
        assert!((var.sqrt() - 0.5).abs() < 0.05, "stddev {}", var.sqrt());
    }

    #[test]
    fn test_gaussian_zero_stddev_is_constant() {
        let ctx = Context::with_budget(MemoryBudget::from_mb(1)).unwrap();
        let d = Dispatcher::reference(&ctx, 0);
        let out = DeviceTensor::new(&ctx, DType::Compact8, [8]).unwrap();
        d.gaussian(-2.0, 0.0, &out).unwrap();
        let got = out.to_host(d.queue()).unwrap().to_vec::<Compact8>().unwrap();
        assert_eq!(got, vec![Compact8::from_f32(-2.0); 8]);
    }

    #[test]
    fn test_gaussian_rejects_bad_parameters() {
        let ctx = Context::with_budget(MemoryBudget::from_mb(1)).unwrap();
        let d = Dispatcher::reference(&ctx, 0);
        let out = DeviceTensor::new(&ctx, DType::Compact8, [4]).unwrap();
        let err = d.gaussian(0.0, -1.0, &out).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Range);
        assert!(d.gaussian(f32::INFINITY, 1.0, &out).is_err());
        assert!(d.gaussian(0.0, f32::NAN, &out).is_err());
    }
}
