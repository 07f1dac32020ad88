use crate::domain::models::{ClickEvent, PointerButton};
use crate::domain::settings::ButtonBinding;
use std::time::{Duration, Instant};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonState {
    Idle,
    Pressed,
}

#[derive(Debug)]
struct ButtonChannel {
    button: PointerButton,
    masks: Vec<u8>,
    /// `None` until the first sample for this button arrives
    stable: Option<ButtonState>,
    /// Since when the raw bit has disagreed with `stable`
    pending_since: Option<Instant>,
}

impl ButtonChannel {
    fn raw_state(&self, mask: u8) -> ButtonState {
        if self.masks.iter().any(|&m| mask & m == m) {
            ButtonState::Pressed
        } else {
            ButtonState::Idle
        }
    }

    fn observe(&mut self, mask: u8, now: Instant, interval: Duration) -> Option<ClickEvent> {
        let raw = self.raw_state(mask);

        let Some(stable) = self.stable else {
            self.stable = Some(raw);
            return (raw == ButtonState::Pressed).then(|| self.accept(raw));
        };

        if raw == stable {
            self.pending_since = None;
            return None;
        }

        let since = *self.pending_since.get_or_insert(now);
        if now.duration_since(since) >= interval {
            self.pending_since = None;
            self.stable = Some(raw);
            Some(self.accept(raw))
        } else {
            None
        }
    }

    fn accept(&self, state: ButtonState) -> ClickEvent {
        let pressed = state == ButtonState::Pressed;
        debug!(button = %self.button, pressed, "Debounced button transition");
        ClickEvent {
            button: self.button,
            pressed,
        }
    }
}

/// Per-button debounce state machines driven by the raw button mask
#[derive(Debug)]
pub struct ButtonDebouncer {
    interval: Duration,
    channels: Vec<ButtonChannel>,
}

impl ButtonDebouncer {
    pub fn new(bindings: &[ButtonBinding], interval: Duration) -> Self {
        let mut channels: Vec<ButtonChannel> = Vec::new();
        for binding in bindings {
            match channels.iter_mut().find(|c| c.button == binding.button) {
                Some(channel) => channel.masks.push(binding.mask),
                None => channels.push(ButtonChannel {
                    button: binding.button,
                    masks: vec![binding.mask],
                    stable: None,
                    pending_since: None,
                }),
            }
        }
        Self { interval, channels }
    }

    /// Feed one raw mask; returns the accepted transitions, if any
    pub fn observe(&mut self, mask: u8, now: Instant) -> Vec<ClickEvent> {
        let interval = self.interval;
        self.channels
            .iter_mut()
            .filter_map(|channel| channel.observe(mask, now, interval))
            .collect()
    }

    /// Release every pressed button and forget all history
    pub fn release_all(&mut self) -> Vec<ClickEvent> {
        let mut events = Vec::new();
        for channel in &mut self.channels {
            if channel.stable == Some(ButtonState::Pressed) {
                events.push(channel.accept(ButtonState::Idle));
            }
            channel.stable = None;
            channel.pending_since = None;
        }
        events
    }

    pub fn state(&self, button: PointerButton) -> Option<ButtonState> {
        self.channels
            .iter()
            .find(|c| c.button == button)
            .and_then(|c| c.stable)
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}
