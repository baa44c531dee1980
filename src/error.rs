//! Error types for the biolink-ble crate.

use thiserror::Error;

/// The main error type for this crate.
#[derive(Error, Debug)]
pub enum Error {
    /// Bluetooth-related error from the underlying BLE library.
    #[error("Bluetooth error: {0}")]
    Bluetooth(#[from] btleplug::Error),

    /// The platform has no usable Bluetooth Low Energy capability.
    #[error("Bluetooth LE is not supported on this platform")]
    PlatformUnsupported,

    /// The device chooser was cancelled or found nothing to connect to.
    #[error("No device selected")]
    NoDeviceSelected,

    /// Failed to establish (or keep) the GATT session.
    #[error("GATT connection failed: {reason}")]
    GattConnectFailed {
        /// Description of why the connection failed.
        reason: String,
    },

    /// Subscribing to, or reading, a single characteristic failed.
    #[error("Subscription to {uuid} failed: {reason}")]
    SubscriptionFailed {
        /// The UUID of the characteristic.
        uuid: String,
        /// Description of the failure.
        reason: String,
    },

    /// An on-demand reading request was not fulfilled before its deadline.
    #[error("Timed out waiting for a reading")]
    RequestTimeout,

    /// The connection to the peripheral was lost.
    #[error("Connection lost")]
    ConnectionLost,

    /// Operation requires a connection but the peripheral is not connected.
    #[error("Peripheral not connected")]
    NotConnected,

    /// A discovery/connect sequence is already running.
    #[error("Connection already in progress")]
    ConnectionInProgress,

    /// The supervisor is already connected to a peripheral.
    #[error("Already connected")]
    AlreadyConnected,

    /// A payload could not be decoded.
    #[error("Malformed payload: {context}")]
    MalformedPayload {
        /// Description of what was wrong with the payload.
        context: String,
    },

    /// Characteristic not found on the device.
    #[error("Characteristic not found: {uuid}")]
    CharacteristicNotFound {
        /// The UUID of the characteristic that was not found.
        uuid: String,
    },

    /// An invalid parameter was provided.
    #[error("Invalid parameter: {name} = {value}")]
    InvalidParameter {
        /// The name of the parameter.
        name: String,
        /// The invalid value that was provided.
        value: String,
    },

    /// An internal error occurred.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether retrying the failed operation can reasonably succeed.
    ///
    /// `PlatformUnsupported` is fatal. Connection losses need a fresh
    /// `connect()` which is a retry from the caller's point of view.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Bluetooth(_)
                | Self::NoDeviceSelected
                | Self::GattConnectFailed { .. }
                | Self::RequestTimeout
                | Self::ConnectionLost
                | Self::ConnectionInProgress
        )
    }
}

/// A specialized Result type for this crate.
pub type Result<T> = std::result::Result<T, Error>;
