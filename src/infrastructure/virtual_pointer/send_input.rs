use crate::domain::models::PointerButton;
use crate::error::BridgeError;
use crate::infrastructure::virtual_pointer::{PointerBackend, VirtualPointer};
use tracing::{debug, trace};
use windows::Win32::UI::Input::KeyboardAndMouse::{
    SendInput, INPUT, INPUT_0, INPUT_MOUSE, MOUSE_EVENT_FLAGS, MOUSEEVENTF_LEFTDOWN,
    MOUSEEVENTF_LEFTUP, MOUSEEVENTF_MOVE, MOUSEEVENTF_RIGHTDOWN, MOUSEEVENTF_RIGHTUP, MOUSEINPUT,
};

/// Relative mouse input injected through `SendInput`
pub struct SendInputPointer;

impl SendInputPointer {
    fn send(&self, dx: i32, dy: i32, flags: MOUSE_EVENT_FLAGS) -> Result<(), BridgeError> {
        let input = INPUT {
            r#type: INPUT_MOUSE,
            Anonymous: INPUT_0 {
                mi: MOUSEINPUT {
                    dx,
                    dy,
                    mouseData: 0,
                    dwFlags: flags,
                    time: 0,
                    dwExtraInfo: 0,
                },
            },
        };

        let sent = unsafe { SendInput(&[input], std::mem::size_of::<INPUT>() as i32) };
        if sent == 0 {
            return Err(BridgeError::VirtualDeviceUnavailable(format!(
                "SendInput rejected the event: {}",
                std::io::Error::last_os_error()
            )));
        }
        Ok(())
    }
}

impl VirtualPointer for SendInputPointer {
    fn move_by(&mut self, dx: i32, dy: i32) -> Result<(), BridgeError> {
        trace!("Moving mouse by ({}, {})", dx, dy);
        self.send(dx, dy, MOUSEEVENTF_MOVE)
    }

    fn click(&mut self, button: PointerButton, pressed: bool) -> Result<(), BridgeError> {
        debug!("Mouse {} {}", button, if pressed { "down" } else { "up" });
        let flags = match (button, pressed) {
            (PointerButton::Primary, true) => MOUSEEVENTF_LEFTDOWN,
            (PointerButton::Primary, false) => MOUSEEVENTF_LEFTUP,
            (PointerButton::Secondary, true) => MOUSEEVENTF_RIGHTDOWN,
            (PointerButton::Secondary, false) => MOUSEEVENTF_RIGHTUP,
        };
        self.send(0, 0, flags)
    }
}

pub struct SendInputBackend;

impl PointerBackend for SendInputBackend {
    fn open(&self) -> Result<Box<dyn VirtualPointer>, BridgeError> {
        Ok(Box::new(SendInputPointer))
    }
}
