//! Bluetooth Module
//!
//! Provides BLE communication with the motion controller.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                  ConnectionSupervisor                    │
//! │   (state machine, staleness, backoff, frame forwarding)  │
//! └─────────────────────┬───────────────────────────────────┘
//!                       │ BleTransport / BleLink
//!         ┌─────────────┼─────────────┐
//!         │             │             │
//!         ▼             ▼             ▼
//! ┌───────────┐  ┌────────────┐  ┌──────────┐
//! │  Scanner  │  │ Connection │  │ Protocol │
//! │           │  │            │  │          │
//! │ - name    │  │ - GATT     │  │ - layout │
//! │   prefix  │  │ - notify   │  │ - decode │
//! └───────────┘  └────────────┘  └──────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] - Frame layout, decoding and counter tracking
//! - [`scanner`] - Advertisement watching by device-name prefix
//! - [`connection`] - GATT connection and notification subscription
//! - [`service`] - btleplug-backed [`BleTransport`]
//! - [`supervisor`] - Connection state machine

pub mod connection;
pub mod protocol;
pub mod scanner;
pub mod service;
pub mod supervisor;

use crate::error::BridgeError;
use std::fmt;
use std::future::Future;

pub use service::BtleTransport;
pub use supervisor::ConnectionSupervisor;

/// Discovery and connection, the part of BLE the supervisor drives
pub trait BleTransport: Send {
    type Device: fmt::Display + Send + Sync;
    type Link: BleLink;

    /// Wait for an advertisement whose local name starts with `name_prefix`
    fn discover(
        &mut self,
        name_prefix: &str,
    ) -> impl Future<Output = Result<Self::Device, BridgeError>> + Send;

    /// Stop an in-flight scan, if any
    fn stop_discovery(&mut self) -> impl Future<Output = ()> + Send;

    /// Connect and subscribe to the data characteristic
    fn connect(
        &mut self,
        device: &Self::Device,
    ) -> impl Future<Output = Result<Self::Link, BridgeError>> + Send;
}

/// A subscribed connection delivering raw notifications
pub trait BleLink: Send {
    /// Next notification payload; `None` once the link is gone
    fn next_frame(&mut self) -> impl Future<Output = Option<Vec<u8>>> + Send;

    /// Re-arm notifications on the existing connection
    fn resubscribe(&mut self) -> impl Future<Output = Result<(), BridgeError>> + Send;

    fn disconnect(&mut self) -> impl Future<Output = ()> + Send;
}
