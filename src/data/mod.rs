//! Data structures for decoded biometric data.
//!
//! This module contains the reading types delivered to consumers and the
//! heart rate variability estimator.

pub mod reading;
pub mod variability;

pub use reading::{Reading, ReadingKind};
pub use variability::VariabilityEstimator;
