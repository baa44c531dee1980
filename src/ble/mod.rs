//! BLE communication module.
//!
//! This module defines the platform seam ([`DeviceChooser`], [`GattLink`]),
//! the connection state machine, and the btleplug implementations of both
//! seams.

pub mod characteristics;
pub mod connection;
pub mod link;
pub mod scanner;
pub mod uuids;

pub use characteristics::BtleplugLink;
pub use connection::{
    ConnectionEvent, ConnectionState, ConnectionStateMachine, DisconnectReason,
};
pub use link::{
    DeviceChooser, DiscoveredPeripheral, GattLink, LinkEvent, LinkEventStream,
    NotificationEvent, PeripheralHandle,
};
pub use scanner::ScanningChooser;
pub use uuids::*;
