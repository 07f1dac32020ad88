//! BLE Scanner Module
//!
//! Handles Bluetooth LE device discovery for the motion controller.

use crate::error::BridgeError;
use btleplug::api::{Central, CentralEvent, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Peripheral, PeripheralId};
use futures::stream::StreamExt;
use std::fmt;
use tracing::{debug, info};

/// A peripheral whose advertised name matched the prefix
#[derive(Debug, Clone)]
pub struct DiscoveredDevice {
    pub peripheral: Peripheral,
    pub name: String,
}

impl fmt::Display for DiscoveredDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.name, self.peripheral.address())
    }
}

/// BLE Scanner for discovering the controller by name prefix
pub struct BleScanner {
    adapter: Adapter,
    scanning: bool,
}

impl BleScanner {
    pub fn new(adapter: Adapter) -> Self {
        Self {
            adapter,
            scanning: false,
        }
    }

    /// Scan until a device advertising a name with `prefix` shows up
    pub async fn find(&mut self, prefix: &str) -> Result<DiscoveredDevice, BridgeError> {
        info!("Starting BLE scan for device name prefix: {:?}", prefix);

        // Subscribe before starting the scan so no advertisement is missed
        let mut events = self.adapter.events().await?;
        self.adapter.start_scan(ScanFilter::default()).await?;
        self.scanning = true;

        // Devices the adapter already knows about
        for peripheral in self.adapter.peripherals().await? {
            if let Some(device) = Self::matching(peripheral, prefix).await {
                self.stop().await;
                return Ok(device);
            }
        }

        while let Some(event) = events.next().await {
            let id = match event {
                CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => id,
                _ => continue,
            };
            if let Some(device) = self.lookup(&id, prefix).await {
                self.stop().await;
                return Ok(device);
            }
        }

        self.stop().await;
        Err(BridgeError::ConnectionLost(
            "adapter event stream ended while scanning".to_string(),
        ))
    }

    async fn lookup(&self, id: &PeripheralId, prefix: &str) -> Option<DiscoveredDevice> {
        let peripheral = self.adapter.peripheral(id).await.ok()?;
        Self::matching(peripheral, prefix).await
    }

    async fn matching(peripheral: Peripheral, prefix: &str) -> Option<DiscoveredDevice> {
        let properties = peripheral.properties().await.ok()??;
        let name = properties.local_name?;
        if !name.starts_with(prefix) {
            return None;
        }
        debug!("Advertisement matched: {} (RSSI {:?})", name, properties.rssi);
        Some(DiscoveredDevice { peripheral, name })
    }

    /// Stop scanning
    pub async fn stop(&mut self) {
        if !self.scanning {
            return;
        }
        self.scanning = false;
        info!("Stopping BLE scan...");
        if let Err(e) = self.adapter.stop_scan().await {
            debug!("Failed to stop scan: {}", e);
        }
    }
}
