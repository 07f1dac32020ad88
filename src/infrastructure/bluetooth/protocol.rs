//! Motion Controller Protocol
//!
//! Frame layout and decoding for the controller's notification
//! characteristic. The layout was reverse engineered from captured traffic;
//! offsets are fixed and never discovered at runtime.

use crate::domain::models::{DecodedSample, RawFrame, XState};
use crate::error::BridgeError;
use tracing::{trace, warn};

/// Length of every data notification
pub const FRAME_LEN: usize = 6;

/// Frame counter, wraps modulo 256
pub const COUNTER_OFFSET: usize = 0;
/// Raw button mask
pub const BUTTONS_OFFSET: usize = 1;
/// Digital X axis, low nibble only
pub const X_AXIS_OFFSET: usize = 3;
/// Analog Y axis, 0-255
pub const Y_AXIS_OFFSET: usize = 4;

/// Decode one notification into a sample.
///
/// # Frame Structure (6 bytes)
///
/// ```text
/// [0] : Counter (u8, +1 per notification)
/// [1] : Button mask
/// [2] : Reserved
/// [3] : Digital X, low nibble: bit 0 is noise, bits 1-3 the axis state
/// [4] : Analog Y raw value
/// [5] : Reserved
/// ```
pub fn decode_frame(frame: &RawFrame) -> Result<DecodedSample, BridgeError> {
    let bytes = &frame.bytes;
    if bytes.len() != FRAME_LEN {
        return Err(BridgeError::MalformedFrame {
            expected: FRAME_LEN,
            actual: bytes.len(),
        });
    }

    trace!("Raw frame: {:02X?}", bytes);

    Ok(DecodedSample {
        counter: bytes[COUNTER_OFFSET],
        button_mask: bytes[BUTTONS_OFFSET],
        x_state: decode_x_state(bytes[X_AXIS_OFFSET]),
        y_raw: bytes[Y_AXIS_OFFSET],
        received_at: frame.received_at,
    })
}

/// Map the X byte to the ternary axis state.
///
/// The low nibble shifted right by one drops the noise bit; `0b001` is left,
/// `0b011` center and anything from `0b100` up is right.
pub fn decode_x_state(byte: u8) -> XState {
    match (byte & 0x0F) >> 1 {
        0b001 => XState::Left,
        0b011 => XState::Center,
        v if v >= 0b100 => XState::Right,
        _ => XState::Unknown,
    }
}

/// Watches the frame counter for gaps within one connection
#[derive(Debug, Default)]
pub struct SequenceTracker {
    last: Option<u8>,
    dropped_total: u64,
}

impl SequenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a counter value. Returns the number of frames missed since
    /// the previous one, if any.
    pub fn observe(&mut self, counter: u8) -> Option<u8> {
        let previous = self.last.replace(counter);
        let expected = previous?.wrapping_add(1);
        if counter == expected {
            return None;
        }

        let missed = counter.wrapping_sub(expected);
        self.dropped_total += u64::from(missed);
        warn!(counter, expected, missed, "Dropped frame(s) detected");
        Some(missed)
    }

    /// Forget the previous counter; the next frame starts a new sequence
    pub fn reset(&mut self) {
        self.last = None;
    }

    pub fn dropped_total(&self) -> u64 {
        self.dropped_total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn frame(counter: u8, buttons: u8, x: u8, y: u8) -> RawFrame {
        RawFrame::new(vec![counter, buttons, 0x00, x, y, 0x00], Instant::now())
    }

    #[test]
    fn test_x_state_table() {
        let expected = [
            (0x02, XState::Left),
            (0x03, XState::Left),
            (0x07, XState::Center),
            (0x0C, XState::Right),
        ];
        for (byte, state) in expected {
            let sample = decode_frame(&frame(0, 0, byte, 128)).unwrap();
            assert_eq!(sample.x_state, state, "byte {:#04X}", byte);
        }
    }

    #[test]
    fn test_x_state_ignores_high_nibble_and_noise_bit() {
        assert_eq!(decode_x_state(0xF2), XState::Left);
        assert_eq!(decode_x_state(0x06), XState::Center);
        assert_eq!(decode_x_state(0x08), XState::Right);
        assert_eq!(decode_x_state(0x0F), XState::Right);
        assert_eq!(decode_x_state(0x00), XState::Unknown);
        assert_eq!(decode_x_state(0x01), XState::Unknown);
        assert_eq!(decode_x_state(0x04), XState::Unknown);
        assert_eq!(decode_x_state(0x05), XState::Unknown);
    }

    #[test]
    fn test_decode_fields() {
        let raw = frame(42, 0x30, 0x07, 200);
        let sample = decode_frame(&raw).unwrap();
        assert_eq!(sample.counter, 42);
        assert_eq!(sample.button_mask, 0x30);
        assert_eq!(sample.y_raw, 200);
        assert_eq!(sample.received_at, raw.received_at);
    }

    #[test]
    fn test_decode_is_deterministic() {
        let now = Instant::now();
        for byte in 0..=u8::MAX {
            let raw = RawFrame::new(vec![byte, byte, byte, byte, byte, byte], now);
            assert_eq!(decode_frame(&raw).unwrap(), decode_frame(&raw).unwrap());
        }
    }

    #[test]
    fn test_rejects_wrong_length() {
        let now = Instant::now();
        for len in [0, 2, 5, 7, 20] {
            let err = decode_frame(&RawFrame::new(vec![0; len], now)).unwrap_err();
            assert!(matches!(
                err,
                BridgeError::MalformedFrame { expected: FRAME_LEN, actual } if actual == len
            ));
        }
    }

    #[test]
    fn test_counter_wraparound_is_not_a_drop() {
        let mut tracker = SequenceTracker::new();
        let drops: Vec<_> = [253, 254, 255, 0, 1, 2]
            .into_iter()
            .filter_map(|c| tracker.observe(c))
            .collect();
        assert!(drops.is_empty());
        assert_eq!(tracker.dropped_total(), 0);
    }

    #[test]
    fn test_counter_gap_logs_once() {
        let mut tracker = SequenceTracker::new();
        let drops: Vec<_> = [4, 5, 9, 10]
            .into_iter()
            .filter_map(|c| tracker.observe(c))
            .collect();
        assert_eq!(drops, vec![3]);
        assert_eq!(tracker.dropped_total(), 3);
    }

    #[test]
    fn test_reset_starts_new_sequence() {
        let mut tracker = SequenceTracker::new();
        tracker.observe(10);
        tracker.reset();
        assert_eq!(tracker.observe(200), None);
        assert_eq!(tracker.observe(202), Some(1));
    }
}
