//! Platform seam between the supervisor and a BLE stack.
//!
//! [`DeviceChooser`] stands in for the platform device picker and
//! [`GattLink`] for one GATT session. The btleplug-backed implementations
//! live in [`crate::ble::scanner`] and [`crate::ble::characteristics`].

use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::Result;

/// A discovered peripheral.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PeripheralHandle {
    /// Platform identifier of the peripheral.
    pub id: String,
    /// Advertised local name, if any.
    pub name: Option<String>,
    /// Last seen signal strength in dBm.
    pub rssi: Option<i16>,
    /// Advertised service UUIDs.
    pub services: Vec<Uuid>,
}

impl PeripheralHandle {
    /// Create a handle with just an identifier and a name.
    pub fn new(id: impl Into<String>, name: Option<String>) -> Self {
        Self {
            id: id.into(),
            name,
            rssi: None,
            services: Vec::new(),
        }
    }

    /// Human-readable name, or `fallback` for unnamed peripherals.
    pub fn display_name(&self, fallback: &str) -> String {
        match self.name.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => fallback.to_string(),
        }
    }
}

/// Notification event from a characteristic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationEvent {
    /// UUID of the characteristic that sent the notification.
    pub characteristic_uuid: Uuid,
    /// The notification data.
    pub data: Vec<u8>,
}

/// Event delivered by a [`GattLink`] once connected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// A characteristic value changed.
    Notification(NotificationEvent),
    /// The peripheral dropped the connection.
    Disconnected,
}

/// Ordered, single-consumer stream of link events.
pub type LinkEventStream = Pin<Box<dyn Stream<Item = LinkEvent> + Send>>;

/// A peripheral picked by a [`DeviceChooser`], together with its link.
#[derive(Clone)]
pub struct DiscoveredPeripheral {
    /// Identity of the peripheral.
    pub handle: PeripheralHandle,
    /// GATT session to the peripheral, not yet connected.
    pub link: Arc<dyn GattLink>,
}

impl std::fmt::Debug for DiscoveredPeripheral {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscoveredPeripheral")
            .field("handle", &self.handle)
            .finish()
    }
}

/// Picks a peripheral to connect to.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DeviceChooser: Send + Sync {
    /// Whether the platform has a usable BLE capability at all.
    async fn is_available(&self) -> bool;

    /// Select a peripheral. `Ok(None)` means the selection was cancelled or
    /// nothing suitable was found.
    async fn choose(&self) -> Result<Option<DiscoveredPeripheral>>;
}

/// A GATT session with one peripheral.
#[async_trait]
pub trait GattLink: Send + Sync {
    /// Open the session.
    async fn connect(&self) -> Result<()>;

    /// Whether the session is currently open.
    async fn is_connected(&self) -> bool;

    /// Discover services and cache their characteristics.
    async fn discover_services(&self) -> Result<()>;

    /// Whether a characteristic was found during service discovery.
    fn has_characteristic(&self, uuid: &Uuid) -> bool;

    /// Read a characteristic value.
    async fn read(&self, uuid: &Uuid) -> Result<Vec<u8>>;

    /// Enable notifications on a characteristic.
    async fn subscribe(&self, uuid: &Uuid) -> Result<()>;

    /// Disable notifications on a characteristic.
    async fn unsubscribe(&self, uuid: &Uuid) -> Result<()>;

    /// Stream of notifications and disconnect events for this session.
    async fn events(&self) -> Result<LinkEventStream>;

    /// Close the session.
    async fn disconnect(&self) -> Result<()>;
}
