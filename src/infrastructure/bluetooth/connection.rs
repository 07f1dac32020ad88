//! BLE Connection Module
//!
//! Handles device connection and GATT notification subscription.

use crate::error::BridgeError;
use crate::infrastructure::bluetooth::BleLink;
use btleplug::api::{CharPropFlags, Characteristic, Peripheral as _, ValueNotification};
use btleplug::platform::Peripheral;
use futures::stream::{Stream, StreamExt};
use std::pin::Pin;
use tracing::{debug, info, warn};
use uuid::Uuid;

type NotificationStream = Pin<Box<dyn Stream<Item = ValueNotification> + Send>>;

/// Configuration for connection behavior
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Service UUID to look for
    pub service_uuid: Uuid,
    /// Notification characteristic UUID
    pub notify_char_uuid: Uuid,
}

/// BLE Connection handler
pub struct BleConnection {
    config: ConnectionConfig,
}

impl BleConnection {
    pub fn new(config: ConnectionConfig) -> Self {
        Self { config }
    }

    /// Connect to a peripheral and subscribe to its data characteristic.
    ///
    /// A failure after the GATT connection is up tears the connection down
    /// again so the next attempt starts clean.
    pub async fn connect(&self, peripheral: &Peripheral) -> Result<BtleLink, BridgeError> {
        info!("Connecting to Bluetooth device: {}", peripheral.address());

        // Step 1: Connect to BLE device
        peripheral.connect().await?;

        match self.subscribe(peripheral).await {
            Ok(link) => Ok(link),
            Err(e) => {
                if let Err(disconnect_err) = peripheral.disconnect().await {
                    debug!("Disconnect after failed subscription: {}", disconnect_err);
                }
                Err(e)
            }
        }
    }

    async fn subscribe(&self, peripheral: &Peripheral) -> Result<BtleLink, BridgeError> {
        // Step 2: Discover GATT services and find the data characteristic
        peripheral.discover_services().await?;
        let characteristic = self.find_characteristic(peripheral)?;
        info!("Found data characteristic {}", characteristic.uuid);

        // Step 3: Take the notification stream before enabling notifications
        let notifications = peripheral.notifications().await?;
        peripheral
            .subscribe(&characteristic)
            .await
            .map_err(|e| BridgeError::SubscriptionFailure {
                attempts: 1,
                reason: e.to_string(),
            })?;
        info!("Notifications enabled successfully");

        Ok(BtleLink {
            peripheral: peripheral.clone(),
            characteristic,
            notifications,
        })
    }

    fn find_characteristic(&self, peripheral: &Peripheral) -> Result<Characteristic, BridgeError> {
        let characteristic = peripheral.characteristics().into_iter().find(|c| {
            c.uuid == self.config.notify_char_uuid && c.service_uuid == self.config.service_uuid
        });

        let characteristic = characteristic.ok_or_else(|| BridgeError::SubscriptionFailure {
            attempts: 1,
            reason: format!(
                "characteristic {} not found in service {}",
                self.config.notify_char_uuid, self.config.service_uuid
            ),
        })?;

        if !characteristic.properties.contains(CharPropFlags::NOTIFY) {
            warn!(
                "Characteristic {} does not advertise NOTIFY ({:?}), subscribing anyway",
                characteristic.uuid, characteristic.properties
            );
        }
        Ok(characteristic)
    }
}

/// A connected, subscribed peripheral
pub struct BtleLink {
    peripheral: Peripheral,
    characteristic: Characteristic,
    notifications: NotificationStream,
}

impl BleLink for BtleLink {
    async fn next_frame(&mut self) -> Option<Vec<u8>> {
        while let Some(notification) = self.notifications.next().await {
            if notification.uuid == self.characteristic.uuid {
                return Some(notification.value);
            }
        }
        None
    }

    async fn resubscribe(&mut self) -> Result<(), BridgeError> {
        if !self.peripheral.is_connected().await? {
            return Err(BridgeError::ConnectionLost(
                "peripheral reports disconnected".to_string(),
            ));
        }

        if let Err(e) = self.peripheral.unsubscribe(&self.characteristic).await {
            debug!("Unsubscribe before resubscribe failed: {}", e);
        }
        self.notifications = self.peripheral.notifications().await?;
        self.peripheral
            .subscribe(&self.characteristic)
            .await
            .map_err(|e| BridgeError::SubscriptionFailure {
                attempts: 1,
                reason: e.to_string(),
            })?;

        // Poke the characteristic so a sleeping peripheral starts sending again
        if self.characteristic.properties.contains(CharPropFlags::READ) {
            let value = self.peripheral.read(&self.characteristic).await?;
            debug!("Re-read characteristic: {:02X?}", value);
        }
        Ok(())
    }

    async fn disconnect(&mut self) {
        if let Err(e) = self.peripheral.unsubscribe(&self.characteristic).await {
            debug!("Unsubscribe failed: {}", e);
        }
        if let Err(e) = self.peripheral.disconnect().await {
            debug!("Disconnect failed: {}", e);
        }
        info!("Disconnected from device");
    }
}
