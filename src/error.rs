use thiserror::Error;

/// Errors raised by the bridge core.
///
/// Only [`BridgeError::VirtualDeviceUnavailable`] at startup is fatal; every
/// other kind is logged and recovered from.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("malformed frame: expected {expected} bytes, got {actual}")]
    MalformedFrame { expected: usize, actual: usize },

    #[error("connection lost: {0}")]
    ConnectionLost(String),

    #[error("subscription failed after {attempts} attempt(s): {reason}")]
    SubscriptionFailure { attempts: u32, reason: String },

    #[error("virtual pointing device unavailable: {0}")]
    VirtualDeviceUnavailable(String),

    #[error("no Bluetooth adapter found")]
    NoAdapter,

    #[error("invalid UUID {0:?}")]
    InvalidUuid(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("bluetooth error: {0}")]
    Bluetooth(#[from] btleplug::Error),
}
