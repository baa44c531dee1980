//! IEEE-11073 16-bit SFLOAT decoding.
//!
//! An SFLOAT packs a 4-bit signed exponent (high nibble) and a 12-bit
//! signed mantissa: `value = mantissa * 10^exponent`. A handful of mantissa
//! values with exponent zero are reserved for special values.

/// Not a Number.
pub const SFLOAT_NAN: u16 = 0x07FF;
/// Not at this resolution.
pub const SFLOAT_NRES: u16 = 0x0800;
/// Positive infinity.
pub const SFLOAT_POSITIVE_INFINITY: u16 = 0x07FE;
/// Negative infinity.
pub const SFLOAT_NEGATIVE_INFINITY: u16 = 0x0802;
/// Reserved for future use.
pub const SFLOAT_RESERVED: u16 = 0x0801;

/// A decoded SFLOAT.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SFloat {
    /// A finite value.
    Value(f64),
    /// Not a Number.
    NaN,
    /// Not at this resolution.
    NRes,
    /// Positive infinity.
    PositiveInfinity,
    /// Negative infinity.
    NegativeInfinity,
    /// Reserved encoding.
    Reserved,
}

impl SFloat {
    /// Get the finite value, if any.
    pub fn value(&self) -> Option<f64> {
        match self {
            Self::Value(v) => Some(*v),
            _ => None,
        }
    }
}

/// Decode a raw SFLOAT.
pub fn decode_sfloat(raw: u16) -> SFloat {
    match raw {
        SFLOAT_NAN => return SFloat::NaN,
        SFLOAT_NRES => return SFloat::NRes,
        SFLOAT_POSITIVE_INFINITY => return SFloat::PositiveInfinity,
        SFLOAT_NEGATIVE_INFINITY => return SFloat::NegativeInfinity,
        SFLOAT_RESERVED => return SFloat::Reserved,
        _ => {}
    }

    // Sign-extend the 12-bit mantissa and the 4-bit exponent.
    let mut mantissa = (raw & 0x0FFF) as i16;
    if mantissa & 0x0800 != 0 {
        mantissa -= 0x1000;
    }
    let mut exponent = (raw >> 12) as i8;
    if exponent & 0x08 != 0 {
        exponent -= 0x10;
    }

    SFloat::Value(mantissa as f64 * 10f64.powi(exponent as i32))
}
