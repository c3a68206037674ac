// uinput-backed Sink: the synthetic keyboard

use evdev::uinput::{VirtualDevice, VirtualDeviceBuilder};
use evdev::{AttributeSet, EventType, InputEvent};

use super::{OutputError, Sink};
use crate::Key;

/// Name prefix of the virtual device, also used by the input layer to skip
/// our own device and avoid a feedback loop.
pub const VIRT_DEVICE_PREFIX: &str = "keyflux (virtual)";

/// Sink writing to one uinput virtual keyboard registered with the full
/// universe of keys the engine can emit. Auto-repeat of held synthetic keys
/// is handled by the kernel.
pub struct UinputSink {
    device: VirtualDevice,
}

impl UinputSink {
    pub fn new() -> Result<Self, OutputError> {
        let mut keys: AttributeSet<evdev::Key> = AttributeSet::new();
        // Standard keyboard range plus FN, which sits above it.
        for code in 0..256u16 {
            keys.insert(evdev::Key::new(code));
        }
        keys.insert(evdev::Key::new(Key::parse("FN").expect("FN in key table").code()));

        let device = VirtualDeviceBuilder::new()
            .map_err(|e: std::io::Error| OutputError::DeviceCreation(e.to_string()))?
            .name(&format!("{VIRT_DEVICE_PREFIX} Keyboard"))
            .with_keys(&keys)
            .map_err(|e: std::io::Error| OutputError::DeviceCreation(e.to_string()))?
            .build()
            .map_err(|e: std::io::Error| OutputError::DeviceCreation(e.to_string()))?;

        Ok(Self { device })
    }

    fn emit(&mut self, event: InputEvent) -> Result<(), OutputError> {
        self.device
            .emit(&[event])
            .map_err(|e: std::io::Error| OutputError::WriteError(e.to_string()))
    }
}

impl Sink for UinputSink {
    fn press(&mut self, key: Key) -> Result<(), OutputError> {
        self.emit(InputEvent::new(EventType::KEY, key.code(), 1))
    }

    fn release(&mut self, key: Key) -> Result<(), OutputError> {
        self.emit(InputEvent::new(EventType::KEY, key.code(), 0))
    }

    fn sync(&mut self) -> Result<(), OutputError> {
        self.emit(InputEvent::new(EventType::SYNCHRONIZATION, 0, 0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn virtual_device_creation() {
        // Requires write access to /dev/uinput; tolerate failure in
        // containers and CI.
        match UinputSink::new() {
            Ok(mut sink) => {
                sink.press(Key::from(30)).unwrap();
                sink.sync().unwrap();
                sink.release(Key::from(30)).unwrap();
                sink.sync().unwrap();
            }
            Err(OutputError::DeviceCreation(_)) => {}
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
}
