// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-cooler-shaker project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Float to register-pair codec
//!
//! Process variables are 32-bit IEEE-754 floats exposed as two consecutive
//! 16-bit Modbus registers, upper half first. Supervisory peers of the
//! cooler-shaker were written against a bit layout built by hand from the
//! decimal value, so the encoder reproduces that construction instead of
//! calling `f32::to_bits`:
//!
//! 1. zero encodes to `(0, 0)`
//! 2. sign bit from the sign, then work on the magnitude
//! 3. binary digits of the integer part, then the fractional part expanded by
//!    repeated doubling (at least [`FRACTION_EXPANSION_STEPS`] steps)
//! 4. exponent = radix position - position of the first `1`, biased by 127
//! 5. mantissa = the 23 digits after the first `1`, truncated, zero padded
//!
//! Truncation matters for inputs that carry more precision than a float:
//! `encode_f64(0.1)` yields `0x3DCC_CCCC` where round-to-nearest would give
//! `0x3DCC_CCCD`.
//!
//! ### Register layout
//!
//! | Word | Bits |
//! |------|------|
//! | high | sign(1) exponent(8) mantissa[0..7] |
//! | low  | mantissa[7..23] |

use crate::error::{BridgeError, BridgeResult};

/// Minimum number of doubling steps used to expand the fractional part
pub const FRACTION_EXPANSION_STEPS: usize = 30;

const MANTISSA_BITS: usize = 23;
const EXPONENT_BIAS: i32 = 127;

/// Encode a float into `(high, low)` register words
pub fn encode(value: f32) -> BridgeResult<(u16, u16)> {
    encode_f64(f64::from(value))
}

/// Encode a double-precision value into a single-precision register pair,
/// truncating the mantissa to 23 bits
pub fn encode_f64(value: f64) -> BridgeResult<(u16, u16)> {
    let bits = encode_bits(value)?;
    Ok(split_words(bits))
}

/// Decode `(high, low)` register words back into a float
///
/// The all-zero pattern is 0.0. Every other pattern is read with an implicit
/// leading 1, so the result of a pattern with exponent 255 is an infinity and
/// never a NaN.
pub fn decode(high: u16, low: u16) -> f32 {
    let bits = join_words(high, low);
    if bits == 0 {
        return 0.0;
    }

    let negative = bits >> 31 == 1;
    let exponent = ((bits >> 23) & 0xFF) as i32;
    let fraction = bits & 0x007F_FFFF;

    let significand = f64::from(fraction | 0x0080_0000);
    let magnitude = significand * 2f64.powi(exponent - EXPONENT_BIAS - MANTISSA_BITS as i32);

    let value = if negative { -magnitude } else { magnitude };
    value as f32
}

/// Join two register words into the raw 32-bit pattern
pub fn join_words(high: u16, low: u16) -> u32 {
    (u32::from(high) << 16) | u32::from(low)
}

/// Split a raw 32-bit pattern into `(high, low)` register words
pub fn split_words(bits: u32) -> (u16, u16) {
    ((bits >> 16) as u16, (bits & 0xFFFF) as u16)
}

fn encode_bits(value: f64) -> BridgeResult<u32> {
    if !value.is_finite() {
        return Err(BridgeError::encoding(value, "value is not finite"));
    }
    if value == 0.0 {
        return Ok(0);
    }

    let sign: u32 = if value < 0.0 { 1 } else { 0 };
    let magnitude = value.abs();

    let integer_part = magnitude.trunc();
    if integer_part >= 2f64.powi(128) {
        return Err(BridgeError::encoding(value, "magnitude exceeds float range"));
    }
    // Exact: both parts of an f64 are representable and the subtraction is exact
    let mut fraction = magnitude - integer_part;

    let mut digits = integer_digits(integer_part as u128);
    let radix_position = digits.len();
    let mut first_one = digits.iter().position(|&d| d == 1);

    let mut steps = 0usize;
    loop {
        let mantissa_complete = first_one
            .map(|index| digits.len() > index + MANTISSA_BITS)
            .unwrap_or(false);
        if steps >= FRACTION_EXPANSION_STEPS && (mantissa_complete || fraction == 0.0) {
            break;
        }
        if steps >= FRACTION_EXPANSION_STEPS && first_one.is_none() && steps > 126 {
            // Below the smallest normal float; no `1` can give a valid exponent
            return Err(BridgeError::encoding(value, "magnitude below normal float range"));
        }

        fraction *= 2.0;
        let digit = if fraction >= 1.0 {
            fraction -= 1.0;
            1u8
        } else {
            0u8
        };
        digits.push(digit);
        if digit == 1 && first_one.is_none() {
            first_one = Some(digits.len() - 1);
        }
        steps += 1;
    }

    let first_one = first_one
        .ok_or_else(|| BridgeError::encoding(value, "no significant binary digit found"))?;

    let exponent = (radix_position as i32 - 1) - first_one as i32;
    let biased = exponent + EXPONENT_BIAS;
    if !(1..=254).contains(&biased) {
        return Err(BridgeError::encoding(
            value,
            format!("exponent {} outside single precision range", exponent),
        ));
    }

    let mut mantissa: u32 = 0;
    for position in 0..MANTISSA_BITS {
        let digit = digits.get(first_one + 1 + position).copied().unwrap_or(0);
        mantissa = (mantissa << 1) | u32::from(digit);
    }

    Ok((sign << 31) | ((biased as u32) << 23) | mantissa)
}

/// Binary digits of the integer part, most significant first; `[0]` for zero
fn integer_digits(mut integer: u128) -> Vec<u8> {
    if integer == 0 {
        return vec![0];
    }
    let mut digits = Vec::with_capacity(128);
    while integer > 0 {
        digits.push((integer & 1) as u8);
        integer >>= 1;
    }
    digits.reverse();
    digits
}
