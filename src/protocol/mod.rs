//! Protocol module for decoding characteristic payloads.
//!
//! This module contains the decoders for:
//! - Heart Rate Measurement (bpm and RR intervals)
//! - Glucose Measurement (standard SFLOAT record and the legacy single byte)
//! - Battery Level
//!
//! Decoders never fail loudly: anything that cannot be decoded degrades to
//! "no reading extracted".

pub mod battery;
pub mod glucose;
pub mod heart_rate;
pub mod sfloat;

pub use battery::decode_battery_level;
pub use glucose::{decode_glucose_measurement, GlucoseLayout};
pub use heart_rate::{decode_heart_rate_measurement, HeartRateMeasurement};
pub use sfloat::{decode_sfloat, SFloat};

use tracing::debug;
use uuid::Uuid;

use crate::ble::uuids::{GLUCOSE_MEASUREMENT_UUID, HEART_RATE_MEASUREMENT_UUID};
use crate::data::Reading;
use crate::error::Error;

/// Decode a notification payload into readings, routed by characteristic.
///
/// A heart rate measurement yields one [`Reading::HeartRate`] followed by one
/// [`Reading::InterBeatInterval`] per RR interval. Unknown characteristics
/// and undecodable payloads yield nothing.
pub fn decode_notification(uuid: &Uuid, data: &[u8], layout: GlucoseLayout) -> Vec<Reading> {
    if *uuid == HEART_RATE_MEASUREMENT_UUID {
        match decode_heart_rate_measurement(data) {
            Some(m) => std::iter::once(Reading::HeartRate { bpm: m.bpm })
                .chain(
                    m.intervals_ms
                        .into_iter()
                        .map(|milliseconds| Reading::InterBeatInterval { milliseconds }),
                )
                .collect(),
            None => {
                let err = Error::MalformedPayload {
                    context: format!("heart rate measurement {:02X?}", data),
                };
                debug!("{}", err);
                Vec::new()
            }
        }
    } else if *uuid == GLUCOSE_MEASUREMENT_UUID {
        decode_glucose_measurement(data, layout)
            .map(|mg_per_dl| vec![Reading::GlucoseConcentration { mg_per_dl }])
            .unwrap_or_default()
    } else {
        Vec::new()
    }
}
