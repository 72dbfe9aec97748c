// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The 8-bit compact float and its rounding modes.
//!
//! A [`Compact8`] is sign-magnitude: bit 7 is the sign and bits 0..=6 hold a
//! magnitude read as a positive 8-bit posit with one exponent bit
//! (useed = 4). Representable magnitudes run from 2^-12 ([`Compact8::MIN`])
//! to 2^12 ([`Compact8::MAX`]). There is no negative zero: the pattern
//! `0x80` is [`Compact8::INF`], the single out-of-range sentinel.
//!
//! Encoding never underflows to zero and never overflows to `INF`; finite
//! non-zero inputs saturate at `MIN` and `MAX`. Only NaN and infinities map
//! to `INF`.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;

/// Number of magnitude bits.
const MAGNITUDE_BITS: u32 = 7;

/// Rounding policy applied when a result is encoded back to [`Compact8`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundingMode {
    /// Round to the nearest representable value, ties to the even code.
    #[default]
    NearestEven,
    /// Round up with probability proportional to the distance from the
    /// lower neighbour.
    Stochastic,
}

impl RoundingMode {
    pub fn as_str(self) -> &'static str {
        match self {
            RoundingMode::NearestEven => "nearest_even",
            RoundingMode::Stochastic => "stochastic",
        }
    }
}

impl fmt::Display for RoundingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An 8-bit compact float code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(transparent)]
pub struct Compact8(u8);

impl Compact8 {
    pub const ZERO: Self = Self(0x00);
    pub const ONE: Self = Self(0x40);
    /// Largest finite magnitude, 4096.
    pub const MAX: Self = Self(0x7f);
    /// Out-of-range sentinel (not-a-real). Also the sign bit.
    pub const INF: Self = Self(0x80);
    /// Smallest positive magnitude, 2^-12.
    pub const MIN: Self = Self(0x01);

    pub const fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    pub const fn to_bits(self) -> u8 {
        self.0
    }

    /// Flips the sign bit.
    ///
    /// This is a pure bit operation: `ZERO.negate()` is `INF` and vice
    /// versa. Arithmetic negation of a computed value goes through
    /// [`from_f64`](Self::from_f64), which never produces a negative zero.
    pub const fn negate(self) -> Self {
        Self(self.0 ^ Self::INF.0)
    }

    pub const fn is_inf(self) -> bool {
        self.0 == Self::INF.0
    }

    pub const fn is_zero(self) -> bool {
        self.0 == Self::ZERO.0
    }

    pub const fn is_negative(self) -> bool {
        self.0 & Self::INF.0 != 0 && !self.is_inf()
    }

    /// Decodes to `f64`. `INF` decodes to NaN.
    pub fn to_f64(self) -> f64 {
        if self.is_inf() {
            return f64::NAN;
        }
        let magnitude = magnitudes()[(self.0 & 0x7f) as usize];
        if self.is_negative() {
            -magnitude
        } else {
            magnitude
        }
    }

    pub fn to_f32(self) -> f32 {
        self.to_f64() as f32
    }

    /// Encodes `x` rounding to nearest, ties to even.
    pub fn from_f64(x: f64) -> Self {
        Self::encode(x, |mag| round_nearest_even(mag))
    }

    pub fn from_f32(x: f32) -> Self {
        Self::from_f64(f64::from(x))
    }

    /// Encodes `x` with the given rounding mode.
    ///
    /// `rng` is consulted only for [`RoundingMode::Stochastic`].
    pub fn round_from<R: Rng + ?Sized>(x: f64, mode: RoundingMode, rng: &mut R) -> Self {
        match mode {
            RoundingMode::NearestEven => Self::from_f64(x),
            RoundingMode::Stochastic => {
                Self::encode(x, |mag| round_stochastic(mag, rng.gen::<f64>()))
            }
        }
    }

    /// `encode(x * 2^exp_adjust)`.
    pub fn quantize(x: f32, exp_adjust: i8) -> Self {
        Self::from_f64(f64::from(x) * pow2(exp_adjust))
    }

    /// `decode(self) * 2^exp_adjust`.
    pub fn dequantize(self, exp_adjust: i8) -> f32 {
        (self.to_f64() * pow2(exp_adjust)) as f32
    }

    fn encode(x: f64, round_magnitude: impl FnOnce(f64) -> u8) -> Self {
        if x.is_nan() || x.is_infinite() {
            return Self::INF;
        }
        if x == 0.0 {
            return Self::ZERO;
        }
        let code = round_magnitude(x.abs());
        if x < 0.0 {
            Self(code | Self::INF.0)
        } else {
            Self(code)
        }
    }
}

impl fmt::Display for Compact8 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_inf() {
            write!(f, "inf")
        } else {
            write!(f, "{}", self.to_f64())
        }
    }
}

impl From<Compact8> for f32 {
    fn from(v: Compact8) -> Self {
        v.to_f32()
    }
}

/// `2^exp` as `f64`.
pub(crate) fn pow2(exp: i8) -> f64 {
    2f64.powi(i32::from(exp))
}

/// Magnitude of every 7-bit code; entry 0 is zero.
fn magnitudes() -> &'static [f64; 128] {
    static TABLE: OnceLock<[f64; 128]> = OnceLock::new();
    TABLE.get_or_init(|| {
        let mut table = [0.0; 128];
        for code in 1..128u8 {
            table[code as usize] = decode_magnitude(code);
        }
        table
    })
}

/// Reads a 7-bit pattern as regime, one exponent bit and fraction.
fn decode_magnitude(bits: u8) -> f64 {
    let bit = |i: u32| (bits >> (MAGNITUDE_BITS - 1 - i)) & 1;

    let lead = bit(0);
    let mut run = 1;
    while run < MAGNITUDE_BITS && bit(run) == lead {
        run += 1;
    }
    let k = if lead == 1 {
        run as i32 - 1
    } else {
        -(run as i32)
    };

    // Skip the regime terminator; truncated fields read as zero.
    let exp_pos = run + 1;
    let exponent = if exp_pos < MAGNITUDE_BITS {
        i32::from(bit(exp_pos))
    } else {
        0
    };
    let frac_bits = MAGNITUDE_BITS.saturating_sub(exp_pos + 1);
    let fraction = u32::from(bits) & ((1u32 << frac_bits) - 1);
    let f = f64::from(fraction) / f64::from(1u32 << frac_bits);

    2f64.powi(2 * k + exponent) * (1.0 + f)
}

/// Returns `(lo, hi)` neighbouring codes with `table[lo] < mag < table[hi]`,
/// or `Err(code)` when `mag` is exact or outside the representable range.
fn bracket(mag: f64) -> Result<(u8, u8), u8> {
    let table = magnitudes();
    if mag >= table[127] {
        return Err(Compact8::MAX.0);
    }
    if mag <= table[1] {
        return Err(Compact8::MIN.0);
    }
    let hi = table[1..].partition_point(|&v| v < mag) + 1;
    if table[hi] == mag {
        return Err(hi as u8);
    }
    Ok(((hi - 1) as u8, hi as u8))
}

fn round_nearest_even(mag: f64) -> u8 {
    let (lo, hi) = match bracket(mag) {
        Ok(pair) => pair,
        Err(code) => return code,
    };
    let table = magnitudes();
    let below = mag - table[lo as usize];
    let above = table[hi as usize] - mag;
    if below < above {
        lo
    } else if above < below {
        hi
    } else if lo % 2 == 0 {
        lo
    } else {
        hi
    }
}

fn round_stochastic(mag: f64, draw: f64) -> u8 {
    let (lo, hi) = match bracket(mag) {
        Ok(pair) => pair,
        Err(code) => return code,
    };
    let table = magnitudes();
    let p_up = (mag - table[lo as usize]) / (table[hi as usize] - table[lo as usize]);
    if draw < p_up {
        hi
    } else {
        lo
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_constants_decode() {
        assert_eq!(Compact8::ZERO.to_f64(), 0.0);
        assert_eq!(Compact8::ONE.to_f64(), 1.0);
        assert_eq!(Compact8::MAX.to_f64(), 4096.0);
        assert_eq!(Compact8::MIN.to_f64(), 2f64.powi(-12));
        assert!(Compact8::INF.to_f64().is_nan());
    }

    #[test]
    fn test_known_codes() {
        // 0x50 = 1.0100000: k=0, e=1 -> 2.0
        assert_eq!(Compact8::from_bits(0x50).to_f64(), 2.0);
        // 0x48 = 1.0010000: k=0, e=0, f=0.5 -> 1.5
        assert_eq!(Compact8::from_bits(0x48).to_f64(), 1.5);
        // 0x60 = 1.1000000: k=1 -> 4.0
        assert_eq!(Compact8::from_bits(0x60).to_f64(), 4.0);
        // 0x30 = 0.1100000: k=-1, e=1 -> 0.5
        assert_eq!(Compact8::from_bits(0x30).to_f64(), 0.5);
        assert_eq!(Compact8::from_bits(0xC0).to_f64(), -1.0);
    }

    #[test]
    fn test_table_is_strictly_increasing() {
        let table = magnitudes();
        for code in 2..128 {
            assert!(table[code] > table[code - 1], "code {code:#x}");
        }
    }

    #[test]
    fn test_exact_values_encode_exactly() {
        for code in 0..=255u8 {
            let v = Compact8::from_bits(code);
            if v.is_inf() {
                continue;
            }
            assert_eq!(Compact8::from_f64(v.to_f64()), v, "code {code:#x}");
        }
    }

    #[test]
    fn test_saturation() {
        assert_eq!(Compact8::from_f64(1e9), Compact8::MAX);
        assert_eq!(Compact8::from_f64(-1e9), Compact8::MAX.negate());
        assert_eq!(Compact8::from_f64(1e-9), Compact8::MIN);
        assert_eq!(Compact8::from_f64(f64::NAN), Compact8::INF);
        assert_eq!(Compact8::from_f64(f64::INFINITY), Compact8::INF);
        assert_eq!(Compact8::from_f64(-0.0), Compact8::ZERO);
    }

    #[test]
    fn test_ties_go_to_even_code() {
        // 0x40 = 1.0, 0x41 = 1.0625, 0x42 = 1.125
        assert_eq!(Compact8::from_f64(1.03125).to_bits(), 0x40);
        assert_eq!(Compact8::from_f64(1.09375).to_bits(), 0x42);
        assert_eq!(Compact8::from_f64(1.07).to_bits(), 0x41);
    }

    #[test]
    fn test_negate_is_bit_flip() {
        assert_eq!(Compact8::ONE.negate().to_bits(), 0xC0);
        assert_eq!(Compact8::ZERO.negate(), Compact8::INF);
        assert!(!Compact8::INF.is_negative());
        assert!(Compact8::ONE.negate().is_negative());
    }

    #[test]
    fn test_quantize_exp_adjust() {
        assert_eq!(Compact8::quantize(0.25, 2), Compact8::ONE);
        assert_eq!(Compact8::ONE.dequantize(-3), 0.125);
    }

    #[test]
    fn test_stochastic_rounding_is_unbiased() {
        let mut rng = StdRng::seed_from_u64(7);
        let x = 1.03;
        let n = 20_000;
        let mean: f64 = (0..n)
            .map(|_| Compact8::round_from(x, RoundingMode::Stochastic, &mut rng).to_f64())
            .sum::<f64>()
            / n as f64;
        assert!((mean - x).abs() < 0.005, "mean {mean}");
    }

    #[test]
    fn test_stochastic_exact_values_are_stable() {
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..100 {
            assert_eq!(
                Compact8::round_from(2.0, RoundingMode::Stochastic, &mut rng),
                Compact8::from_bits(0x50)
            );
        }
    }

    #[test]
    fn test_rounding_mode_serde_names() {
        assert_eq!(RoundingMode::default(), RoundingMode::NearestEven);
        assert_eq!(RoundingMode::Stochastic.to_string(), "stochastic");
    }
}
