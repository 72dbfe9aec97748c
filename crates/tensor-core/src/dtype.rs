// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Supported tensor element data types.

use crate::Compact8;

/// Enumerates the element types a [`StridedTensor`](crate::StridedTensor)
/// can hold.
///
/// Kernels operate on `Compact8`; `F32` tensors are the endpoints of format
/// conversion and `U32` tensors carry gather/scatter indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DType {
    /// 8-bit compact float.
    Compact8,
    /// 32-bit IEEE 754 floating point.
    F32,
    /// 32-bit unsigned integer.
    U32,
    /// 16-bit unsigned integer, the narrowest type compact pairs can be
    /// reinterpreted as.
    U16,
}

impl DType {
    /// Returns the size of a single element in bytes.
    pub fn size_bytes(self) -> usize {
        match self {
            DType::Compact8 => 1,
            DType::U16 => 2,
            DType::F32 | DType::U32 => 4,
        }
    }

    /// Returns a human-readable label for this data type.
    pub fn as_str(self) -> &'static str {
        match self {
            DType::Compact8 => "compact8",
            DType::F32 => "f32",
            DType::U32 => "u32",
            DType::U16 => "u16",
        }
    }
}

impl std::fmt::Display for DType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A Rust type with a fixed little-endian byte layout matching a [`DType`].
pub trait Element: Copy + Send + Sync + std::fmt::Debug + PartialEq + 'static {
    const DTYPE: DType;

    /// Reads one element from the first `DTYPE.size_bytes()` bytes.
    fn read_le(bytes: &[u8]) -> Self;

    /// Writes one element into the first `DTYPE.size_bytes()` bytes.
    fn write_le(self, out: &mut [u8]);
}

impl Element for Compact8 {
    const DTYPE: DType = DType::Compact8;

    fn read_le(bytes: &[u8]) -> Self {
        Compact8::from_bits(bytes[0])
    }

    fn write_le(self, out: &mut [u8]) {
        out[0] = self.to_bits();
    }
}

macro_rules! impl_element_le {
    ($ty:ty, $dtype:expr, $n:expr) => {
        impl Element for $ty {
            const DTYPE: DType = $dtype;

            fn read_le(bytes: &[u8]) -> Self {
                let mut raw = [0u8; $n];
                raw.copy_from_slice(&bytes[..$n]);
                <$ty>::from_le_bytes(raw)
            }

            fn write_le(self, out: &mut [u8]) {
                out[..$n].copy_from_slice(&self.to_le_bytes());
            }
        }
    };
}

impl_element_le!(f32, DType::F32, 4);
impl_element_le!(u32, DType::U32, 4);
impl_element_le!(u16, DType::U16, 2);

/// Encodes a slice of elements into a fresh byte vector.
pub fn to_bytes<T: Element>(values: &[T]) -> Vec<u8> {
    let width = T::DTYPE.size_bytes();
    let mut bytes = vec![0u8; values.len() * width];
    for (chunk, v) in bytes.chunks_exact_mut(width).zip(values) {
        v.write_le(chunk);
    }
    bytes
}

/// Decodes a byte slice into elements. Trailing partial elements are ignored.
pub fn from_bytes<T: Element>(bytes: &[u8]) -> Vec<T> {
    bytes
        .chunks_exact(T::DTYPE.size_bytes())
        .map(T::read_le)
        .collect()
}
