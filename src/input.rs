//! Input simulation via `rdev`.
//! Events go to whatever has focus / sits under the pointer, which is why the
//! target is activated by pointing into the viewport first.

use rdev::{Button, EventType, Key, simulate};
use std::thread;
use std::time::Duration;

use crate::capture::TargetHandle;
use crate::error::{CaptureError, CaptureResult};
use crate::scroll::{InputSink, ScrollKey};

/// Some platforms drop events sent back-to-back.
const EVENT_GAP: Duration = Duration::from_millis(20);

fn send(event: &EventType) -> CaptureResult<()> {
    simulate(event).map_err(|e| {
        CaptureError::DriverFailure(format!("could not send {:?}: {:?}", event, e))
    })?;
    thread::sleep(EVENT_GAP);
    Ok(())
}

pub fn move_pointer(x: i32, y: i32) -> CaptureResult<()> {
    send(&EventType::MouseMove { x: x as f64, y: y as f64 })
}

pub fn click() -> CaptureResult<()> {
    send(&EventType::ButtonPress(Button::Left))?;
    send(&EventType::ButtonRelease(Button::Left))
}

fn key_for(key: ScrollKey) -> Key {
    match key {
        ScrollKey::PageDown => Key::PageDown,
    }
}

/// Delivers synthetic scroll input to the focused window.
#[derive(Clone, Copy, Debug, Default)]
pub struct RdevInput;

impl InputSink for RdevInput {
    fn key_down(&mut self, _target: TargetHandle, key: ScrollKey) -> CaptureResult<()> {
        send(&EventType::KeyPress(key_for(key)))
    }

    fn key_up(&mut self, _target: TargetHandle, key: ScrollKey) -> CaptureResult<()> {
        send(&EventType::KeyRelease(key_for(key)))
    }

    fn wheel(&mut self, _target: TargetHandle, delta: i64) -> CaptureResult<()> {
        send(&EventType::Wheel { delta_x: 0, delta_y: delta })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_down_maps_to_rdev_key() {
        assert_eq!(key_for(ScrollKey::PageDown), Key::PageDown);
    }

    #[test]
    #[ignore = "sends real input events to the desktop"]
    fn test_wheel_event_is_accepted() {
        RdevInput.wheel(TargetHandle(1), -1).expect("wheel event rejected");
    }
}
