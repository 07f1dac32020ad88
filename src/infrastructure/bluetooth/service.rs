//! Bluetooth Service Module
//!
//! btleplug-backed transport that combines scanning and connection handling
//! behind [`BleTransport`].

use crate::domain::settings::Settings;
use crate::error::BridgeError;
use crate::infrastructure::bluetooth::{
    connection::{BleConnection, BtleLink, ConnectionConfig},
    scanner::{BleScanner, DiscoveredDevice},
    BleTransport,
};
use btleplug::api::Manager as _;
use btleplug::platform::Manager;
use tracing::info;

pub struct BtleTransport {
    scanner: BleScanner,
    connection: BleConnection,
}

impl BtleTransport {
    /// Open the first Bluetooth adapter on the host
    pub async fn new(settings: &Settings) -> Result<Self, BridgeError> {
        let config = ConnectionConfig {
            service_uuid: settings.service_uuid()?,
            notify_char_uuid: settings.notify_char_uuid()?,
        };

        let manager = Manager::new().await?;
        let adapter = manager
            .adapters()
            .await?
            .into_iter()
            .next()
            .ok_or(BridgeError::NoAdapter)?;
        info!("Using Bluetooth adapter: {}", adapter_label(&adapter).await);

        Ok(Self {
            scanner: BleScanner::new(adapter),
            connection: BleConnection::new(config),
        })
    }
}

async fn adapter_label(adapter: &btleplug::platform::Adapter) -> String {
    use btleplug::api::Central as _;
    adapter
        .adapter_info()
        .await
        .unwrap_or_else(|_| "unknown".to_string())
}

impl BleTransport for BtleTransport {
    type Device = DiscoveredDevice;
    type Link = BtleLink;

    async fn discover(&mut self, name_prefix: &str) -> Result<DiscoveredDevice, BridgeError> {
        self.scanner.find(name_prefix).await
    }

    async fn stop_discovery(&mut self) {
        self.scanner.stop().await;
    }

    async fn connect(&mut self, device: &DiscoveredDevice) -> Result<BtleLink, BridgeError> {
        self.connection.connect(&device.peripheral).await
    }
}
