// Allow unusual byte groupings for UUIDs which have standard format
#![allow(clippy::unusual_byte_groupings)]

//! # biolink-ble
//!
//! A cross-platform Rust library for streaming readings from Bluetooth Low
//! Energy biometric monitors: heart rate straps and continuous glucose
//! monitors.
//!
//! ## Features
//!
//! - **Discovery**: Find peripherals advertising the Heart Rate, Glucose,
//!   Battery or Blood Pressure services
//! - **Resilient connect**: Stabilization delay before service discovery and
//!   best-effort subscriptions, so one missing characteristic does not cost
//!   the whole session
//! - **Heart rate**: bpm and RR intervals from the Heart Rate Measurement
//!   characteristic
//! - **Variability**: Rolling RMSSD over recent inter-beat intervals
//! - **Glucose**: IEEE-11073 SFLOAT concentrations in mg/dL
//! - **On-demand requests**: Await the next reading of a kind, with a
//!   deadline
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use biolink_ble::{
//!     Result, ScanConfig, ScanningChooser, Supervisor, SupervisorConfig, SupervisorObservers,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let chooser = ScanningChooser::new(ScanConfig::default()).await;
//!     let observers = SupervisorObservers::new()
//!         .on_heart_rate(|bpm| println!("Heart rate: {} bpm", bpm))
//!         .on_variability(|rmssd| println!("RMSSD: {} ms", rmssd));
//!
//!     let supervisor = Supervisor::new(Arc::new(chooser), observers, SupervisorConfig::default())?;
//!     let name = supervisor.connect().await?;
//!     println!("Connected to {}", name);
//!
//!     let bpm = supervisor.request_heart_rate().await?;
//!     println!("Next heart rate: {} bpm", bpm);
//!
//!     supervisor.disconnect().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Platform Notes
//!
//! ### macOS
//! Requires Bluetooth permission. Add `NSBluetoothAlwaysUsageDescription`
//! to your Info.plist for bundled apps.
//!
//! ### Linux
//! Requires BlueZ. User may need to be in the `bluetooth` group.
//!
//! ### Windows
//! Requires Windows 10 or later with Bluetooth LE support.
//!
//! ## Feature Flags
//!
//! - `serde`: Enable serialization/deserialization for data types

// Public modules
pub mod ble;
pub mod config;
pub mod data;
pub mod error;
pub mod protocol;
pub mod registry;
pub mod supervisor;
pub mod utils;

// Re-exports for convenience
pub use config::{ScanConfig, SupervisorConfig};
pub use error::{Error, Result};
pub use registry::{ReadingRequest, RequestRegistry};
pub use supervisor::{SubscriptionReport, Supervisor, SupervisorObservers};
pub use utils::{mg_per_dl_to_mmol_per_l, mmol_per_l_to_mg_per_dl, rr_ticks_to_millis};

// Re-export commonly used types from submodules
pub use ble::{
    ConnectionEvent, ConnectionState, DeviceChooser, DisconnectReason, DiscoveredPeripheral,
    GattLink, PeripheralHandle, ScanningChooser,
};
pub use data::{Reading, ReadingKind, VariabilityEstimator};
pub use protocol::GlucoseLayout;
