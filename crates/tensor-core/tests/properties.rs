// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Property tests for the compact format and strided views.

use proptest::prelude::*;
use tensor_core::{Compact8, Layout, Shape};

fn small_shape() -> impl Strategy<Value = Vec<usize>> {
    prop::collection::vec(1usize..6, 1..5)
}

proptest! {
    #[test]
    fn quantize_round_trip_is_close(x in 0.0625f32..16.0, negative: bool) {
        let x = if negative { -x } else { x };
        let back = Compact8::quantize(x, 0).dequantize(0);
        prop_assert!((back - x).abs() <= x.abs() * 0.07, "{x} -> {back}");
    }

    #[test]
    fn exp_adjust_matches_power_of_two_scaling(x in 0.25f32..4.0, adjust in -3i8..3) {
        let scaled = Compact8::quantize(x, adjust);
        prop_assert_eq!(scaled, Compact8::from_f64(f64::from(x) * 2f64.powi(i32::from(adjust))));
    }

    #[test]
    fn negate_is_an_involution(bits: u8) {
        let v = Compact8::from_bits(bits);
        prop_assert_eq!(v.negate().negate(), v);
    }

    #[test]
    fn decode_encode_is_identity_on_finite_codes(bits in 0u8..=255) {
        let v = Compact8::from_bits(bits);
        prop_assume!(!v.is_inf());
        prop_assert_eq!(Compact8::from_f64(v.to_f64()), v);
    }

    #[test]
    fn view_preserves_element_count(dims in small_shape()) {
        let layout = Layout::contiguous(dims.clone()).unwrap();
        let total: usize = dims.iter().product();
        let flat = layout.view([total]).unwrap();
        prop_assert_eq!(flat.num_elements(), layout.num_elements());
        prop_assert_eq!(flat.offset(), layout.offset());
        prop_assert!(flat.is_contiguous());
    }

    #[test]
    fn transpose_twice_restores(dims in small_shape(), d1 in 0usize..4, d2 in 0usize..4) {
        let layout = Layout::contiguous(dims.clone()).unwrap();
        prop_assume!(d1 < dims.len() && d2 < dims.len());
        let back = layout.transpose(d1, d2).unwrap().transpose(d1, d2).unwrap();
        prop_assert_eq!(back.sizes(), layout.sizes());
        prop_assert_eq!(back.strides(), layout.strides());
    }

    #[test]
    fn fresh_layouts_are_contiguous(dims in small_shape()) {
        let layout = Layout::contiguous(Shape::new(dims)).unwrap();
        prop_assert!(layout.is_contiguous());
        prop_assert_eq!(layout.extent(), layout.num_elements());
    }

    #[test]
    fn narrow_stays_inside_parent(dims in small_shape(), start in 0usize..3) {
        let layout = Layout::contiguous(dims.clone()).unwrap();
        let dim = dims.len() - 1;
        prop_assume!(start < dims[dim]);
        let narrowed = layout.narrow(dim, start, dims[dim] - start).unwrap();
        prop_assert!(narrowed.offsets().all(|o| o < layout.num_elements()));
    }
}
