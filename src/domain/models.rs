use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Instant;

/// One BLE notification, exactly as it came off the link
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    pub bytes: Vec<u8>,
    pub received_at: Instant,
}

impl RawFrame {
    pub fn new(bytes: Vec<u8>, received_at: Instant) -> Self {
        Self { bytes, received_at }
    }
}

/// Ternary state of the digital X axis
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XState {
    Left,
    Center,
    Right,
    /// Bit pattern outside the known table
    Unknown,
}

impl XState {
    /// Direction multiplier, `None` for [`XState::Unknown`]
    pub fn direction(self) -> Option<f64> {
        match self {
            Self::Left => Some(-1.0),
            Self::Center => Some(0.0),
            Self::Right => Some(1.0),
            Self::Unknown => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodedSample {
    pub counter: u8,
    pub button_mask: u8,
    pub x_state: XState,
    pub y_raw: u8,
    pub received_at: Instant,
}

/// Analog center learned at connection start
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalibrationState {
    pub y_center: f64,
    pub y_range: f64,
}

/// Pointer velocity in device units per tick.
///
/// Written by axis fusion on every sample, snapshotted by the motion tick.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PointerDelta {
    pub dx: f64,
    pub dy: f64,
}

impl PointerDelta {
    pub const ZERO: Self = Self { dx: 0.0, dy: 0.0 };

    pub fn is_zero(&self) -> bool {
        self.dx == 0.0 && self.dy == 0.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PointerEvent {
    pub dx: i32,
    pub dy: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PointerButton {
    Primary,
    Secondary,
}

impl fmt::Display for PointerButton {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Primary => f.write_str("primary"),
            Self::Secondary => f.write_str("secondary"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClickEvent {
    pub button: PointerButton,
    pub pressed: bool,
}

/// Anything the emitter writes to the virtual pointing device in one tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputEvent {
    Move(PointerEvent),
    Click(ClickEvent),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Scanning,
    Connecting,
    Subscribed,
    Stale,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Scanning => "scanning",
            Self::Connecting => "connecting",
            Self::Subscribed => "subscribed",
            Self::Stale => "stale",
        };
        f.write_str(name)
    }
}

/// What the connection supervisor hands to the frame path
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// Notifications are flowing. `recalibrate` is false when the link
    /// recovered from a stale period without being dropped.
    Subscribed { recalibrate: bool },
    Frame(RawFrame),
    /// Notifications stopped while the link is still up
    Stale,
    /// The link was fully dropped
    Lost,
}
