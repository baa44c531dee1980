//! Decoded physiological readings.

/// A single decoded measurement.
///
/// Readings are produced by the decoders in [`crate::protocol`] and handed
/// to exactly one dispatch step.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Reading {
    /// Heart rate in beats per minute.
    HeartRate {
        /// Beats per minute.
        bpm: u16,
    },
    /// Time between two successive beats.
    InterBeatInterval {
        /// Interval length in milliseconds.
        milliseconds: f64,
    },
    /// Blood glucose concentration.
    GlucoseConcentration {
        /// Concentration in mg/dL.
        mg_per_dl: u16,
    },
}

impl Reading {
    /// Get the kind of this reading.
    pub fn kind(&self) -> ReadingKind {
        match self {
            Self::HeartRate { .. } => ReadingKind::HeartRate,
            Self::InterBeatInterval { .. } => ReadingKind::InterBeatInterval,
            Self::GlucoseConcentration { .. } => ReadingKind::GlucoseConcentration,
        }
    }

    /// Heart rate value, if this is a heart-rate reading.
    pub fn bpm(&self) -> Option<u16> {
        match self {
            Self::HeartRate { bpm } => Some(*bpm),
            _ => None,
        }
    }
}

impl std::fmt::Display for Reading {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::HeartRate { bpm } => write!(f, "{} bpm", bpm),
            Self::InterBeatInterval { milliseconds } => write!(f, "{:.1} ms", milliseconds),
            Self::GlucoseConcentration { mg_per_dl } => write!(f, "{} mg/dL", mg_per_dl),
        }
    }
}

/// Discriminant of a [`Reading`], used to match on-demand requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ReadingKind {
    /// Heart rate.
    HeartRate,
    /// Inter-beat interval.
    InterBeatInterval,
    /// Glucose concentration.
    GlucoseConcentration,
}

impl std::fmt::Display for ReadingKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::HeartRate => write!(f, "HeartRate"),
            Self::InterBeatInterval => write!(f, "InterBeatInterval"),
            Self::GlucoseConcentration => write!(f, "GlucoseConcentration"),
        }
    }
}
