// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Output-size arithmetic for convolution and pooling windows.

use crate::TensorError;

/// `((input + pad_before + pad_after - kernel) / stride) + 1`.
///
/// Signed arithmetic with truncating division, so windows larger than the
/// padded input give zero or negative sizes rather than wrapping.
///
/// # Panics
/// Panics if `stride` is zero.
///
/// # Examples
/// ```
/// use tensor_core::calc_output_size;
/// assert_eq!(calc_output_size(7, 1, 1, 3, 2), 4);
/// ```
pub fn calc_output_size(input: i64, pad_before: i64, pad_after: i64, kernel: i64, stride: i64) -> i64 {
    ((input + pad_before + pad_after - kernel) / stride) + 1
}

/// Checked variant of [`calc_output_size`] for tensor dimensions.
///
/// Fails with a shape error when `stride` is zero or the window does not
/// fit the padded input at least once.
pub fn output_extent(
    input: usize,
    pad_before: usize,
    pad_after: usize,
    kernel: usize,
    stride: usize,
) -> Result<usize, TensorError> {
    if stride == 0 {
        return Err(TensorError::shape("output_extent", "stride must be non-zero"));
    }
    if kernel == 0 || kernel > input + pad_before + pad_after {
        return Err(TensorError::shape(
            "output_extent",
            format!("kernel {kernel} does not fit input {input} with padding ({pad_before}, {pad_after})"),
        ));
    }
    let size = calc_output_size(
        input as i64,
        pad_before as i64,
        pad_after as i64,
        kernel as i64,
        stride as i64,
    );
    Ok(size as usize)
}
