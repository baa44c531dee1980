//! GATT session over a btleplug peripheral.
//!
//! Provides [`BtleplugLink`], which caches discovered characteristics and
//! exposes reads, subscriptions and a merged notification/disconnect stream.

use async_trait::async_trait;
use btleplug::api::{Central, CentralEvent, Characteristic, Peripheral as _};
use btleplug::platform::{Adapter, Peripheral};
use futures::stream::{self, StreamExt};
use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::{debug, trace};
use uuid::Uuid;

use crate::ble::link::{GattLink, LinkEvent, LinkEventStream, NotificationEvent};
use crate::error::{Error, Result};

/// GATT link backed by btleplug.
pub struct BtleplugLink {
    /// Adapter the peripheral was discovered on, used for disconnect events.
    adapter: Adapter,
    /// The peripheral to communicate with.
    peripheral: Peripheral,
    /// Cached characteristics by UUID.
    characteristics: RwLock<HashMap<Uuid, Characteristic>>,
}

impl BtleplugLink {
    /// Create a link for a peripheral found on `adapter`.
    pub fn new(adapter: Adapter, peripheral: Peripheral) -> Self {
        Self {
            adapter,
            peripheral,
            characteristics: RwLock::new(HashMap::new()),
        }
    }

    fn characteristic(&self, uuid: &Uuid) -> Result<Characteristic> {
        self.characteristics
            .read()
            .get(uuid)
            .cloned()
            .ok_or_else(|| Error::CharacteristicNotFound {
                uuid: uuid.to_string(),
            })
    }

    /// Refresh the characteristic cache from the peripheral's services.
    fn cache_characteristics(&self) {
        let services = self.peripheral.services();

        let mut chars = self.characteristics.write();
        chars.clear();

        for service in services {
            for characteristic in service.characteristics {
                debug!(
                    "Found characteristic: {} in service {}",
                    characteristic.uuid, service.uuid
                );
                chars.insert(characteristic.uuid, characteristic);
            }
        }

        debug!("Discovered {} characteristics", chars.len());
    }
}

#[async_trait]
impl GattLink for BtleplugLink {
    async fn connect(&self) -> Result<()> {
        if self.peripheral.is_connected().await.unwrap_or(false) {
            debug!("Peripheral already connected at BLE level");
            return Ok(());
        }

        self.peripheral.connect().await.map_err(Error::Bluetooth)
    }

    async fn is_connected(&self) -> bool {
        self.peripheral.is_connected().await.unwrap_or(false)
    }

    async fn discover_services(&self) -> Result<()> {
        self.peripheral
            .discover_services()
            .await
            .map_err(Error::Bluetooth)?;
        self.cache_characteristics();
        Ok(())
    }

    fn has_characteristic(&self, uuid: &Uuid) -> bool {
        self.characteristics.read().contains_key(uuid)
    }

    async fn read(&self, uuid: &Uuid) -> Result<Vec<u8>> {
        let characteristic = self.characteristic(uuid)?;

        let data = self
            .peripheral
            .read(&characteristic)
            .await
            .map_err(Error::Bluetooth)?;

        trace!("Read {} bytes from characteristic {}", data.len(), uuid);

        Ok(data)
    }

    async fn subscribe(&self, uuid: &Uuid) -> Result<()> {
        let characteristic = self.characteristic(uuid)?;

        debug!(
            "Subscribing to {}, properties: {:?}",
            uuid, characteristic.properties
        );

        self.peripheral
            .subscribe(&characteristic)
            .await
            .map_err(Error::Bluetooth)
    }

    async fn unsubscribe(&self, uuid: &Uuid) -> Result<()> {
        let characteristic = self.characteristic(uuid)?;

        self.peripheral
            .unsubscribe(&characteristic)
            .await
            .map_err(Error::Bluetooth)?;

        debug!("Unsubscribed from notifications from {}", uuid);

        Ok(())
    }

    async fn events(&self) -> Result<LinkEventStream> {
        let notifications = self
            .peripheral
            .notifications()
            .await
            .map_err(Error::Bluetooth)?
            .map(|notification| {
                trace!(
                    "Notification received from {}: {:02X?}",
                    notification.uuid,
                    notification.value
                );
                LinkEvent::Notification(NotificationEvent {
                    characteristic_uuid: notification.uuid,
                    data: notification.value,
                })
            });

        let id = self.peripheral.id();
        let disconnects = self
            .adapter
            .events()
            .await
            .map_err(Error::Bluetooth)?
            .filter_map(move |event| {
                let disconnected = matches!(
                    event,
                    CentralEvent::DeviceDisconnected(ref other) if *other == id
                );
                async move { disconnected.then_some(LinkEvent::Disconnected) }
            });

        Ok(Box::pin(stream::select(notifications, disconnects)))
    }

    async fn disconnect(&self) -> Result<()> {
        self.peripheral.disconnect().await.map_err(Error::Bluetooth)
    }
}
