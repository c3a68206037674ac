// Input event model

use std::fmt;
use std::time::Instant;

use crate::Key;

/// Action state of a key event.
///
/// The numeric values are evdev's (`evtest` output):
///   0 == released, 1 == pressed, 2 == repeated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum KeyAction {
    Release = 0,
    Press = 1,
    Repeat = 2,
}

impl KeyAction {
    /// True for PRESS or REPEAT.
    pub fn is_pressed(self) -> bool {
        matches!(self, KeyAction::Press | KeyAction::Repeat)
    }

    /// True only for PRESS.
    pub fn just_pressed(self) -> bool {
        matches!(self, KeyAction::Press)
    }

    pub fn is_released(self) -> bool {
        matches!(self, KeyAction::Release)
    }

    pub fn is_repeat(self) -> bool {
        matches!(self, KeyAction::Repeat)
    }

    /// Convert from an evdev event value.
    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            0 => Some(KeyAction::Release),
            1 => Some(KeyAction::Press),
            2 => Some(KeyAction::Repeat),
            _ => None,
        }
    }

    pub fn to_i32(self) -> i32 {
        self as i32
    }
}

impl fmt::Display for KeyAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyAction::Release => write!(f, "release"),
            KeyAction::Press => write!(f, "press"),
            KeyAction::Repeat => write!(f, "repeat"),
        }
    }
}

/// A timestamped key event annotated with its source device.
///
/// Repeat events never reach the engine: the Source filters them out, and
/// the kernel re-synthesizes auto-repeat from the virtual device's presses.
#[derive(Debug, Clone)]
pub struct KeyEvent {
    pub key: Key,
    pub action: KeyAction,
    pub time: Instant,
    pub device_name: String,
}

impl KeyEvent {
    pub fn new(key: Key, action: KeyAction, time: Instant, device_name: impl Into<String>) -> Self {
        Self {
            key,
            action,
            time,
            device_name: device_name.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_properties() {
        assert!(KeyAction::Press.is_pressed());
        assert!(KeyAction::Press.just_pressed());
        assert!(KeyAction::Repeat.is_pressed());
        assert!(!KeyAction::Repeat.just_pressed());
        assert!(KeyAction::Release.is_released());
        assert!(!KeyAction::Release.is_pressed());
    }

    #[test]
    fn action_from_evdev_value() {
        assert_eq!(KeyAction::from_i32(0), Some(KeyAction::Release));
        assert_eq!(KeyAction::from_i32(1), Some(KeyAction::Press));
        assert_eq!(KeyAction::from_i32(2), Some(KeyAction::Repeat));
        assert_eq!(KeyAction::from_i32(3), None);
    }
}
