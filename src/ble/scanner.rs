//! BLE scanning functionality.
//!
//! Provides [`ScanningChooser`], a [`DeviceChooser`] that scans for
//! peripherals advertising a biometric monitor service and picks the first
//! match.

use async_trait::async_trait;
use btleplug::api::{Central, CentralEvent, Manager as _, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Manager, PeripheralId};
use futures::stream::StreamExt;
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

use crate::ble::characteristics::BtleplugLink;
use crate::ble::link::{DeviceChooser, DiscoveredPeripheral, PeripheralHandle};
use crate::ble::uuids::is_monitor_service;
use crate::config::ScanConfig;
use crate::error::{Error, Result};

/// Device chooser that scans with btleplug.
pub struct ScanningChooser {
    /// The BLE adapter to use, `None` if the platform has none.
    adapter: Option<Adapter>,
    /// Scan settings.
    config: ScanConfig,
}

impl ScanningChooser {
    /// Create a chooser on the first available adapter.
    ///
    /// A platform without Bluetooth still yields a chooser; it reports
    /// itself unavailable.
    pub async fn new(config: ScanConfig) -> Self {
        let adapter = match Self::first_adapter().await {
            Ok(adapter) => {
                info!(
                    "Using Bluetooth adapter: {:?}",
                    adapter.adapter_info().await.ok()
                );
                Some(adapter)
            }
            Err(e) => {
                warn!("No usable Bluetooth adapter: {}", e);
                None
            }
        };

        Self { adapter, config }
    }

    /// Create a chooser with a specific adapter.
    pub fn with_adapter(adapter: Adapter, config: ScanConfig) -> Self {
        Self {
            adapter: Some(adapter),
            config,
        }
    }

    async fn first_adapter() -> Result<Adapter> {
        let manager = Manager::new()
            .await
            .map_err(|_e| Error::PlatformUnsupported)?;

        let adapters = manager.adapters().await.map_err(Error::Bluetooth)?;

        adapters
            .into_iter()
            .next()
            .ok_or(Error::PlatformUnsupported)
    }

    /// Scan until a matching peripheral shows up or the event stream ends.
    async fn scan(&self, adapter: &Adapter) -> Result<Option<DiscoveredPeripheral>> {
        let mut events = adapter.events().await.map_err(Error::Bluetooth)?;

        // Peripherals seen before this scan started may never emit another
        // discovery event.
        for peripheral in adapter.peripherals().await.map_err(Error::Bluetooth)? {
            if let Some(found) = self.evaluate(adapter, peripheral.id()).await {
                return Ok(Some(found));
            }
        }

        while let Some(event) = events.next().await {
            let id = match event {
                CentralEvent::DeviceDiscovered(id)
                | CentralEvent::DeviceUpdated(id)
                | CentralEvent::ServicesAdvertisement { id, .. } => id,
                _ => continue,
            };

            if let Some(found) = self.evaluate(adapter, id).await {
                return Ok(Some(found));
            }
        }

        Ok(None)
    }

    /// Turn a peripheral into a candidate if it looks like a monitor.
    async fn evaluate(&self, adapter: &Adapter, id: PeripheralId) -> Option<DiscoveredPeripheral> {
        let peripheral = match adapter.peripheral(&id).await {
            Ok(p) => p,
            Err(e) => {
                trace!("Failed to get peripheral: {}", e);
                return None;
            }
        };

        let properties = match peripheral.properties().await {
            Ok(Some(p)) => p,
            _ => return None,
        };

        if !properties.services.iter().any(is_monitor_service) {
            return None;
        }

        if !self.config.matches_name(properties.local_name.as_deref()) {
            trace!("Skipping {:?}: name filter", properties.local_name);
            return None;
        }

        let handle = PeripheralHandle {
            id: id.to_string(),
            name: properties.local_name,
            rssi: properties.rssi,
            services: properties.services,
        };

        debug!("Selected peripheral {:?}", handle);

        Some(DiscoveredPeripheral {
            handle,
            link: Arc::new(BtleplugLink::new(adapter.clone(), peripheral)),
        })
    }
}

#[async_trait]
impl DeviceChooser for ScanningChooser {
    async fn is_available(&self) -> bool {
        self.adapter.is_some()
    }

    async fn choose(&self) -> Result<Option<DiscoveredPeripheral>> {
        let adapter = self.adapter.as_ref().ok_or(Error::PlatformUnsupported)?;

        info!("Scanning for biometric monitors");

        adapter
            .start_scan(ScanFilter::default())
            .await
            .map_err(Error::Bluetooth)?;

        let outcome = tokio::time::timeout(self.config.scan_timeout, self.scan(adapter)).await;

        if let Err(e) = adapter.stop_scan().await {
            warn!("Failed to stop scan: {}", e);
        }

        match outcome {
            Ok(result) => result,
            Err(_) => {
                info!(
                    "No monitor found within {:?}",
                    self.config.scan_timeout
                );
                Ok(None)
            }
        }
    }
}
