use crate::domain::models::PointerButton;
use crate::error::BridgeError;
use crate::infrastructure::virtual_pointer::{PointerBackend, VirtualPointer};
use evdev::uinput::{VirtualDevice, VirtualDeviceBuilder};
use evdev::{AttributeSet, EventType, InputEvent, Key, RelativeAxisType};
use tracing::{debug, info, trace};

/// A uinput relative mouse with two buttons
pub struct UinputPointer {
    device: VirtualDevice,
}

impl UinputPointer {
    fn emit(&mut self, events: &[InputEvent]) -> Result<(), BridgeError> {
        // `emit` appends the SYN_REPORT
        self.device
            .emit(events)
            .map_err(|e| BridgeError::VirtualDeviceUnavailable(e.to_string()))
    }
}

impl VirtualPointer for UinputPointer {
    fn move_by(&mut self, dx: i32, dy: i32) -> Result<(), BridgeError> {
        trace!("Moving mouse by ({}, {})", dx, dy);
        self.emit(&[
            InputEvent::new(EventType::RELATIVE, RelativeAxisType::REL_X.0, dx),
            InputEvent::new(EventType::RELATIVE, RelativeAxisType::REL_Y.0, dy),
        ])
    }

    fn click(&mut self, button: PointerButton, pressed: bool) -> Result<(), BridgeError> {
        debug!("Mouse {} {}", button, if pressed { "down" } else { "up" });
        let key = match button {
            PointerButton::Primary => Key::BTN_LEFT,
            PointerButton::Secondary => Key::BTN_RIGHT,
        };
        self.emit(&[InputEvent::new(EventType::KEY, key.code(), i32::from(pressed))])
    }
}

pub struct UinputBackend {
    device_name: String,
}

impl UinputBackend {
    pub fn new(device_name: &str) -> Self {
        Self {
            device_name: device_name.to_string(),
        }
    }

    fn build(&self) -> std::io::Result<VirtualDevice> {
        let mut keys = AttributeSet::<Key>::new();
        keys.insert(Key::BTN_LEFT);
        keys.insert(Key::BTN_RIGHT);

        let mut axes = AttributeSet::<RelativeAxisType>::new();
        axes.insert(RelativeAxisType::REL_X);
        axes.insert(RelativeAxisType::REL_Y);

        VirtualDeviceBuilder::new()?
            .name(&self.device_name)
            .with_keys(&keys)?
            .with_relative_axes(&axes)?
            .build()
    }
}

impl PointerBackend for UinputBackend {
    fn open(&self) -> Result<Box<dyn VirtualPointer>, BridgeError> {
        let device = self.build().map_err(|e| {
            BridgeError::VirtualDeviceUnavailable(format!("cannot create uinput device: {}", e))
        })?;
        info!("Created uinput pointing device {:?}", self.device_name);
        Ok(Box::new(UinputPointer { device }))
    }
}
