//! Glucose Measurement (0x2A18) parsing.
//!
//! Two layouts are supported:
//!
//! - [`GlucoseLayout::Standard`] follows the Glucose Profile record:
//!   - Byte 0: Flags
//!     - Bit 0: Time offset present
//!     - Bit 1: Concentration, type and sample location present
//!     - Bit 2: Concentration units (0 = kg/L, 1 = mol/L)
//!     - Bit 3: Sensor status annunciation present
//!   - Bytes 1-2: Sequence number (u16 little-endian)
//!   - Bytes 3-9: Base time (year u16, month, day, hours, minutes, seconds)
//!   - Optional time offset (i16 little-endian, minutes)
//!   - Optional concentration (SFLOAT) followed by a type/sample-location byte
//! - [`GlucoseLayout::LegacySingleByte`] reads one unsigned byte at offset 1
//!   as mg/dL, which is what older firmware and simulators emit.
//!
//! In both layouts a concentration of zero means "no reading".

use tracing::trace;

use super::sfloat::decode_sfloat;
use crate::utils::mmol_per_l_to_mg_per_dl;

/// Flag bit: time offset field present.
pub const FLAG_TIME_OFFSET: u8 = 1 << 0;
/// Flag bit: concentration, type and sample location present.
pub const FLAG_CONCENTRATION: u8 = 1 << 1;
/// Flag bit: concentration is in mol/L rather than kg/L.
pub const FLAG_UNITS_MOL_PER_L: u8 = 1 << 2;

/// Flags, sequence number and base time.
const HEADER_LEN: usize = 10;

/// Offset of the concentration byte in the legacy layout.
const LEGACY_CONCENTRATION_OFFSET: usize = 1;

/// 1 kg/L = 100 000 mg/dL.
const MG_PER_DL_PER_KG_PER_L: f64 = 100_000.0;

/// Wire layout used to decode glucose measurements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum GlucoseLayout {
    /// Glucose Profile record with an SFLOAT concentration.
    #[default]
    Standard,
    /// Single unsigned byte at a fixed offset, already in mg/dL.
    LegacySingleByte,
}

/// Decode a Glucose Measurement payload into mg/dL.
///
/// Returns `None` when the payload is too short, carries no concentration,
/// or the concentration is zero, negative, special or out of range.
pub fn decode_glucose_measurement(data: &[u8], layout: GlucoseLayout) -> Option<u16> {
    let value = match layout {
        GlucoseLayout::Standard => decode_standard(data)?,
        GlucoseLayout::LegacySingleByte => {
            *data.get(LEGACY_CONCENTRATION_OFFSET)? as u16
        }
    };

    if value == 0 {
        trace!("Glucose payload carried a zero concentration");
        return None;
    }

    Some(value)
}

fn decode_standard(data: &[u8]) -> Option<u16> {
    if data.len() < HEADER_LEN {
        trace!("Glucose payload too short: {} bytes", data.len());
        return None;
    }

    let flags = data[0];
    if flags & FLAG_CONCENTRATION == 0 {
        trace!("Glucose record without concentration field");
        return None;
    }

    let mut offset = HEADER_LEN;
    if flags & FLAG_TIME_OFFSET != 0 {
        offset += 2;
    }

    let raw = data.get(offset..offset + 2)?;
    let concentration = decode_sfloat(u16::from_le_bytes([raw[0], raw[1]])).value()?;

    let mg_per_dl = if flags & FLAG_UNITS_MOL_PER_L != 0 {
        mmol_per_l_to_mg_per_dl(concentration * 1000.0)
    } else {
        concentration * MG_PER_DL_PER_KG_PER_L
    };

    let rounded = mg_per_dl.round();
    if !(0.0..=u16::MAX as f64).contains(&rounded) {
        trace!("Glucose concentration out of range: {} mg/dL", mg_per_dl);
        return None;
    }

    Some(rounded as u16)
}
