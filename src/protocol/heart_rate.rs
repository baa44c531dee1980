//! Heart Rate Measurement (0x2A37) parsing.
//!
//! Payload layout:
//! - Byte 0: Flags
//!   - Bit 0: Heart rate value format (0 = u8, 1 = u16 little-endian)
//!   - Bit 1: Sensor contact status
//!   - Bit 2: Sensor contact supported
//!   - Bit 3: Energy expended present (u16 little-endian, kJ)
//!   - Bit 4: RR intervals present
//! - Byte 1..: Heart rate value, then optional energy expended, then zero or
//!   more RR intervals (u16 little-endian, 1/1024 s resolution).

use tracing::trace;

use crate::utils::rr_ticks_to_millis;

/// Flag bit: heart rate is a 16-bit value.
pub const FLAG_HR_U16: u8 = 1 << 0;
/// Flag bit: sensor contact detected.
pub const FLAG_SENSOR_CONTACT: u8 = 1 << 1;
/// Flag bit: sensor contact feature supported.
pub const FLAG_SENSOR_CONTACT_SUPPORTED: u8 = 1 << 2;
/// Flag bit: energy expended field present.
pub const FLAG_ENERGY_EXPENDED: u8 = 1 << 3;
/// Flag bit: RR interval fields present.
pub const FLAG_RR_INTERVALS: u8 = 1 << 4;

/// A decoded heart rate measurement.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct HeartRateMeasurement {
    /// Heart rate in beats per minute.
    pub bpm: u16,
    /// Inter-beat intervals in milliseconds, in the order they were sent.
    pub intervals_ms: Vec<f64>,
    /// Whether the sensor reports skin contact. `None` if unsupported.
    pub sensor_contact: Option<bool>,
    /// Accumulated energy expended in kilojoules, when present.
    pub energy_expended_kj: Option<u16>,
}

/// Decode a Heart Rate Measurement payload.
///
/// Returns `None` when no heart rate can be extracted (fewer than two bytes,
/// or a 16-bit value without its second byte). Truncated trailing fields are
/// dropped: parsing stops at the last complete field.
pub fn decode_heart_rate_measurement(data: &[u8]) -> Option<HeartRateMeasurement> {
    if data.len() < 2 {
        trace!("Heart rate payload too short: {} bytes", data.len());
        return None;
    }

    let flags = data[0];
    let mut offset = 1;

    let bpm = if flags & FLAG_HR_U16 != 0 {
        let bytes = data.get(offset..offset + 2)?;
        offset += 2;
        u16::from_le_bytes([bytes[0], bytes[1]])
    } else {
        offset += 1;
        data[1] as u16
    };

    let sensor_contact = if flags & FLAG_SENSOR_CONTACT_SUPPORTED != 0 {
        Some(flags & FLAG_SENSOR_CONTACT != 0)
    } else {
        None
    };

    let mut measurement = HeartRateMeasurement {
        bpm,
        intervals_ms: Vec::new(),
        sensor_contact,
        energy_expended_kj: None,
    };

    if flags & FLAG_ENERGY_EXPENDED != 0 {
        match data.get(offset..offset + 2) {
            Some(bytes) => {
                measurement.energy_expended_kj = Some(u16::from_le_bytes([bytes[0], bytes[1]]));
                offset += 2;
            }
            None => {
                trace!("Energy expended field truncated, ignoring remainder");
                return Some(measurement);
            }
        }
    }

    if flags & FLAG_RR_INTERVALS != 0 {
        while offset + 2 <= data.len() {
            let ticks = u16::from_le_bytes([data[offset], data[offset + 1]]);
            measurement.intervals_ms.push(rr_ticks_to_millis(ticks));
            offset += 2;
        }

        if offset < data.len() {
            trace!(
                "Ignoring {} dangling byte(s) after RR intervals",
                data.len() - offset
            );
        }
    }

    Some(measurement)
}
