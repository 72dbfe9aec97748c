// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Weight loading from SafeTensors files with memory-mapped I/O.
//!
//! [`WeightLoader`] provides two modes:
//!
//! 1. **File-backed**: maps a `.safetensors` file and copies `F32` tensors
//!    out of it on demand.
//! 2. **Synthetic**: draws weights uniformly from `±1/sqrt(fan_in)` with a
//!    seeded generator, so runs without a weights file are reproducible.
//!
//! Tensors are named `"<layer index>.weight"` and `"<layer index>.bias"`.

use crate::RuntimeError;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::path::{Path, PathBuf};
use tensor_core::{HostTensor, Shape};

/// Name of the weight tensor of layer `index`.
pub fn weight_name(index: usize) -> String {
    format!("{index}.weight")
}

/// Name of the bias tensor of layer `index`.
pub fn bias_name(index: usize) -> String {
    format!("{index}.bias")
}

/// Loads `F32` host tensors by name.
pub struct WeightLoader {
    path: Option<PathBuf>,
    mmap: Option<memmap2::Mmap>,
    rng: StdRng,
}

impl WeightLoader {
    /// Maps `path` if it exists. A missing or absent path selects synthetic
    /// mode.
    pub fn new(path: Option<&Path>, seed: u64) -> Result<Self, RuntimeError> {
        let mmap = match path {
            Some(p) if p.exists() => {
                let file = std::fs::File::open(p).map_err(|e| RuntimeError::WeightLoad {
                    name: p.display().to_string(),
                    detail: format!("cannot open: {e}"),
                })?;
                // SAFETY: the mapping is read-only and the file is not
                // modified while the loader holds it.
                let mmap = unsafe { memmap2::Mmap::map(&file) }.map_err(|e| {
                    RuntimeError::WeightLoad {
                        name: p.display().to_string(),
                        detail: format!("mmap failed: {e}"),
                    }
                })?;
                tracing::info!(
                    "weight loader: mmap'd {} ({:.2} KiB)",
                    p.display(),
                    mmap.len() as f64 / 1024.0,
                );
                Some(mmap)
            }
            Some(p) => {
                tracing::warn!(
                    "weight loader: '{}' not found, using synthetic mode",
                    p.display(),
                );
                None
            }
            None => None,
        };

        Ok(Self {
            path: path.map(Path::to_path_buf),
            mmap,
            rng: StdRng::seed_from_u64(seed),
        })
    }

    /// Creates a loader in synthetic mode (no file needed).
    pub fn synthetic(seed: u64) -> Self {
        Self {
            path: None,
            mmap: None,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn is_file_backed(&self) -> bool {
        self.mmap.is_some()
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Loads tensor `name` with the given shape. `fan_in` bounds the
    /// synthetic distribution and is ignored for file-backed loads.
    pub fn load(
        &mut self,
        name: &str,
        shape: impl Into<Shape>,
        fan_in: usize,
    ) -> Result<HostTensor, RuntimeError> {
        let shape = shape.into();
        match &self.mmap {
            Some(mmap) => load_from_safetensors(mmap, name, shape),
            None => {
                let bound = 1.0 / (fan_in.max(1) as f32).sqrt();
                let values: Vec<f32> = (0..shape.num_elements())
                    .map(|_| self.rng.gen_range(-bound..bound))
                    .collect();
                Ok(HostTensor::from_slice(shape, &values)?)
            }
        }
    }
}

fn load_from_safetensors(
    mmap: &memmap2::Mmap,
    name: &str,
    shape: Shape,
) -> Result<HostTensor, RuntimeError> {
    let fail = |detail: String| RuntimeError::WeightLoad {
        name: name.to_string(),
        detail,
    };

    let st = safetensors::SafeTensors::deserialize(mmap)
        .map_err(|e| fail(format!("SafeTensors parse error: {e}")))?;
    let view = st
        .tensor(name)
        .map_err(|e| fail(format!("tensor not found: {e}")))?;

    if view.dtype() != safetensors::Dtype::F32 {
        return Err(fail(format!("expected F32, found {:?}", view.dtype())));
    }
    if view.shape() != shape.dims() {
        return Err(fail(format!(
            "shape mismatch: expected {shape}, found {:?}",
            view.shape()
        )));
    }

    HostTensor::from_bytes(shape, tensor_core::DType::F32, view.data().to_vec())
        .map_err(|e| fail(e.to_string()))
}

impl std::fmt::Debug for WeightLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WeightLoader")
            .field("path", &self.path)
            .field("file_backed", &self.is_file_backed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    /// Writes a SafeTensors file holding `tensors` as `F32`.
    fn write_safetensors(tensors: &[(&str, &[usize], &[f32])]) -> tempfile::NamedTempFile {
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

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&(header.len() as u64).to_le_bytes()).unwrap();
        file.write_all(header.as_bytes()).unwrap();
        file.write_all(&data).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_names() {
        assert_eq!(weight_name(0), "0.weight");
        assert_eq!(bias_name(2), "2.bias");
    }

    #[test]
    fn test_synthetic_is_bounded_and_seeded() {
        let mut a = WeightLoader::synthetic(11);
        let mut b = WeightLoader::synthetic(11);
        let ta = a.load("0.weight", [4, 16], 16).unwrap();
        let tb = b.load("0.weight", [4, 16], 16).unwrap();

        let va = ta.to_vec::<f32>().unwrap();
        assert_eq!(va, tb.to_vec::<f32>().unwrap());
        assert!(va.iter().all(|v| v.abs() < 0.25));
    }

    #[test]
    fn test_file_backed_load() {
        let file = write_safetensors(&[
            ("0.weight", &[2, 2], &[1.0, 2.0, 3.0, 4.0]),
            ("0.bias", &[2], &[0.5, -1.0]),
        ]);
        let mut loader = WeightLoader::new(Some(file.path()), 0).unwrap();
        assert!(loader.is_file_backed());

        let w = loader.load("0.weight", [2, 2], 2).unwrap();
        assert_eq!(w.to_vec::<f32>().unwrap(), vec![1.0, 2.0, 3.0, 4.0]);
        let b = loader.load("0.bias", [2], 2).unwrap();
        assert_eq!(b.to_vec::<f32>().unwrap(), vec![0.5, -1.0]);
    }

    #[test]
    fn test_shape_mismatch_and_missing_tensor() {
        let file = write_safetensors(&[("0.weight", &[2, 2], &[1.0, 2.0, 3.0, 4.0])]);
        let mut loader = WeightLoader::new(Some(file.path()), 0).unwrap();

        assert!(matches!(
            loader.load("0.weight", [4], 4),
            Err(RuntimeError::WeightLoad { .. })
        ));
        assert!(matches!(
            loader.load("1.weight", [2, 2], 2),
            Err(RuntimeError::WeightLoad { .. })
        ));
    }

    #[test]
    fn test_missing_file_is_synthetic() {
        let dir = tempfile::tempdir().unwrap();
        let loader = WeightLoader::new(Some(&dir.path().join("absent.safetensors")), 0).unwrap();
        assert!(!loader.is_file_backed());
    }
}
