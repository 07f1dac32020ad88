//! Turns a BLE motion controller into a host pointing device.
//!
//! - [`domain`]: frame-independent logic (fusion, debouncing, motion, settings)
//! - [`infrastructure`]: btleplug transport, virtual pointer backends, logging
//! - [`runtime`]: the tasks tying both together

pub mod domain;
pub mod error;
pub mod infrastructure;
pub mod runtime;
