//! Tunables for the supervisor and the btleplug device chooser.

use std::time::Duration;

use crate::data::VariabilityEstimator;
use crate::error::{Error, Result};
use crate::protocol::GlucoseLayout;

/// Settings for a [`crate::Supervisor`].
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SupervisorConfig {
    /// Quiescence delay between opening the session and service discovery.
    ///
    /// Some peripheral stacks drop connections that are queried too early.
    pub stabilization_delay: Duration,
    /// How long an on-demand request waits for a matching reading.
    pub request_timeout: Duration,
    /// Number of inter-beat intervals kept for the variability statistic.
    pub variability_window: usize,
    /// Wire layout of glucose measurements.
    pub glucose_layout: GlucoseLayout,
    /// Name reported for peripherals that do not advertise one.
    pub fallback_name: String,
}

impl SupervisorConfig {
    /// Default stabilization delay (1.2 seconds).
    pub const DEFAULT_STABILIZATION_DELAY: Duration = Duration::from_millis(1200);
    /// Default on-demand request timeout (5 seconds).
    pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);
    /// Default placeholder name.
    pub const DEFAULT_FALLBACK_NAME: &'static str = "Unknown device";

    /// Set the stabilization delay.
    pub fn with_stabilization_delay(mut self, delay: Duration) -> Self {
        self.stabilization_delay = delay;
        self
    }

    /// Set the on-demand request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the variability window size.
    pub fn with_variability_window(mut self, window: usize) -> Self {
        self.variability_window = window;
        self
    }

    /// Set the glucose wire layout.
    pub fn with_glucose_layout(mut self, layout: GlucoseLayout) -> Self {
        self.glucose_layout = layout;
        self
    }

    /// Set the placeholder name for unnamed peripherals.
    pub fn with_fallback_name(mut self, name: impl Into<String>) -> Self {
        self.fallback_name = name.into();
        self
    }

    /// Check the settings for values the supervisor cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.variability_window < VariabilityEstimator::MIN_SAMPLES {
            return Err(Error::InvalidParameter {
                name: "variability_window".to_string(),
                value: self.variability_window.to_string(),
            });
        }

        if self.request_timeout.is_zero() {
            return Err(Error::InvalidParameter {
                name: "request_timeout".to_string(),
                value: format!("{:?}", self.request_timeout),
            });
        }

        Ok(())
    }
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            stabilization_delay: Self::DEFAULT_STABILIZATION_DELAY,
            request_timeout: Self::DEFAULT_REQUEST_TIMEOUT,
            variability_window: VariabilityEstimator::DEFAULT_WINDOW,
            glucose_layout: GlucoseLayout::default(),
            fallback_name: Self::DEFAULT_FALLBACK_NAME.to_string(),
        }
    }
}

/// Settings for [`crate::ble::ScanningChooser`].
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ScanConfig {
    /// How long to scan before giving up.
    pub scan_timeout: Duration,
    /// Only accept peripherals whose name contains this text.
    pub name_filter: Option<String>,
}

impl ScanConfig {
    /// Default scan timeout (10 seconds).
    pub const DEFAULT_SCAN_TIMEOUT: Duration = Duration::from_secs(10);

    /// Set the scan timeout.
    pub fn with_scan_timeout(mut self, timeout: Duration) -> Self {
        self.scan_timeout = timeout;
        self
    }

    /// Only accept peripherals whose name contains `filter`.
    pub fn with_name_filter(mut self, filter: impl Into<String>) -> Self {
        self.name_filter = Some(filter.into());
        self
    }

    /// Whether a peripheral name passes the name filter.
    pub fn matches_name(&self, name: Option<&str>) -> bool {
        match (&self.name_filter, name) {
            (None, _) => true,
            (Some(filter), Some(name)) => name.to_lowercase().contains(&filter.to_lowercase()),
            (Some(_), None) => false,
        }
    }
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            scan_timeout: Self::DEFAULT_SCAN_TIMEOUT,
            name_filter: None,
        }
    }
}
