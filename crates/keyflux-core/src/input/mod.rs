// Input side: exclusive-grab evdev Source with hotplug support

use std::os::unix::io::AsRawFd;
use std::time::Instant;

use evdev::{Device, EventType};
use udev::MonitorSocket;

use crate::output::uinput::VIRT_DEVICE_PREFIX;
use crate::{Key, KeyAction, KeyEvent};

/// Failure on the input side. A single device failing to open or read is
/// logged and dropped; running out of devices entirely is fatal.
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("no keyboard devices found")]
    NoDevices,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Listing entry for `--list-devices`.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub index: usize,
    pub name: String,
    pub path: Option<String>,
}

// Keyboard capability probe: all of the QWERTY row plus representative
// letter keys and SPACE must be present.
const QWERTY_CODES: &[u16] = &[16, 17, 18, 19, 20, 21];
const A_Z_SPACE_CODES: &[u16] = &[57, 30, 44];

fn is_keyboard_device(device: &Device) -> bool {
    if !device.supported_events().contains(EventType::KEY) {
        return false;
    }
    if is_virtual_device(device.name().unwrap_or("")) {
        return false;
    }
    let keys = match device.supported_keys() {
        Some(k) => k,
        None => return false,
    };
    let qwerty = QWERTY_CODES.iter().all(|c| keys.contains(evdev::Key::new(*c)));
    let az = A_Z_SPACE_CODES.iter().all(|c| keys.contains(evdev::Key::new(*c)));
    qwerty && az
}

/// The engine's own synthetic device must never be grabbed back in.
pub fn is_virtual_device(name: &str) -> bool {
    name.contains(VIRT_DEVICE_PREFIX)
}

/// Device selection: explicit names/paths match exactly; with no filter,
/// autodetect takes every real keyboard.
pub fn matches_device_filter(
    device_name: &str,
    device_path: &str,
    filter: &[String],
    is_keyboard: bool,
    is_virtual: bool,
) -> bool {
    if !filter.is_empty() {
        return filter
            .iter()
            .any(|wanted| device_path == wanted || device_name == wanted);
    }
    !is_virtual && is_keyboard
}

/// Exclusive-grab reader over the selected kernel input devices.
///
/// Yields `KeyEvent`s in arrival order. EV_KEY only; repeat events are
/// filtered here so the engine downstream sees presses and releases only.
/// With `watch` enabled, a udev monitor adds matching keyboards as they
/// appear; disconnected devices are pruned on poll errors.
pub struct Source {
    devices: Vec<Device>,
    device_paths: Vec<String>,
    poll_fds: Vec<libc::pollfd>,
    grabbed: bool,
    udev_monitor: Option<MonitorSocket>,
    filter: Vec<String>,
}

impl Source {
    const DISCONNECT_FLAGS: libc::c_short = libc::POLLHUP | libc::POLLERR | libc::POLLNVAL;

    /// Open and exclusively grab the selected devices.
    pub fn open(filter: &[String], watch: bool) -> Result<Self, DeviceError> {
        let mut selected: Vec<(String, Device)> = Vec::new();
        for (path, device) in evdev::enumerate() {
            let name = device.name().unwrap_or("Unknown");
            let path = path.to_str().unwrap_or_default().to_string();
            let keyboard = is_keyboard_device(&device);
            let virtual_dev = is_virtual_device(name);
            if matches_device_filter(name, &path, filter, keyboard, virtual_dev) {
                selected.push((path, device));
            }
        }

        // Grab with a defensive pre-ungrab, in case a previous instance
        // crashed without releasing the devices. A device that refuses the
        // grab is dropped, not fatal.
        let mut devices = Vec::new();
        let mut device_paths = Vec::new();
        for (path, mut device) in selected {
            let _ = device.ungrab();
            match device.grab() {
                Ok(()) => {
                    tracing::info!(
                        "grabbed {} ({})",
                        device.name().unwrap_or("Unknown"),
                        path
                    );
                    device_paths.push(path);
                    devices.push(device);
                }
                Err(e) => {
                    tracing::warn!("could not grab {}: {}, dropping device", path, e);
                }
            }
        }

        if devices.is_empty() {
            return Err(DeviceError::NoDevices);
        }

        let udev_monitor = if watch {
            match udev::MonitorBuilder::new()
                .and_then(|b| b.match_subsystem("input"))
                .and_then(|b| b.listen())
            {
                Ok(socket) => Some(socket),
                Err(e) => {
                    tracing::warn!("hotplug watch unavailable: {e}");
                    None
                }
            }
        } else {
            None
        };

        let mut poll_fds = Vec::new();
        if let Some(ref monitor) = udev_monitor {
            poll_fds.push(libc::pollfd {
                fd: monitor.as_raw_fd(),
                events: libc::POLLIN,
                revents: 0,
            });
        }
        poll_fds.extend(devices.iter().map(|d| libc::pollfd {
            fd: d.as_raw_fd(),
            events: libc::POLLIN,
            revents: 0,
        }));

        Ok(Self {
            devices,
            device_paths,
            poll_fds,
            grabbed: true,
            udev_monitor,
            filter: filter.to_vec(),
        })
    }

    /// Enumerate keyboards without grabbing, for `--list-devices`.
    pub fn list_devices() -> Result<Vec<DeviceInfo>, DeviceError> {
        let mut infos = Vec::new();
        for (index, (path, device)) in evdev::enumerate()
            .filter(|(_, d)| is_keyboard_device(d))
            .enumerate()
        {
            infos.push(DeviceInfo {
                index,
                name: device.name().unwrap_or("Unknown").to_string(),
                path: path.to_str().map(|s| s.to_string()),
            });
        }
        if infos.is_empty() {
            return Err(DeviceError::NoDevices);
        }
        Ok(infos)
    }

    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    pub fn device_names(&self) -> Vec<String> {
        self.devices
            .iter()
            .map(|d| d.name().unwrap_or("Unknown").to_string())
            .collect()
    }

    /// Wait up to `timeout_ms` for input (-1 blocks), then drain every
    /// ready device. Returns events in kernel arrival order per device.
    ///
    /// Fatal only on real I/O errors; EINTR and timeouts return empty.
    /// Exiting with zero devices left is the caller's `NoDevices` check.
    pub fn poll(&mut self, timeout_ms: i32) -> Result<Vec<KeyEvent>, DeviceError> {
        let mut events = Vec::new();

        let rc = unsafe {
            libc::poll(
                self.poll_fds.as_mut_ptr(),
                self.poll_fds.len() as libc::nfds_t,
                timeout_ms,
            )
        };
        if rc < 0 {
            let err = std::io::Error::last_os_error();
            // EINTR is a signal delivery, not a failure; the caller checks
            // its running flag and comes back.
            if err.raw_os_error() == Some(libc::EINTR) {
                return Ok(events);
            }
            return Err(DeviceError::Io(err));
        }
        if rc == 0 {
            return Ok(events);
        }

        let udev_offset = usize::from(self.udev_monitor.is_some());
        if udev_offset > 0 && self.poll_fds[0].revents & libc::POLLIN != 0 {
            self.handle_udev_events();
        }

        let now = Instant::now();
        let mut disconnected: Vec<usize> = Vec::new();
        for (i, device) in self.devices.iter_mut().enumerate() {
            let revents = self.poll_fds[i + udev_offset].revents;

            if revents & Self::DISCONNECT_FLAGS != 0 {
                tracing::warn!(
                    "device disconnected: {}",
                    device.name().unwrap_or("Unknown")
                );
                disconnected.push(i);
                continue;
            }

            if revents & libc::POLLIN != 0 {
                let device_name = device.name().unwrap_or("Unknown").to_string();
                if let Ok(device_events) = device.fetch_events() {
                    for event in device_events {
                        if event.event_type() != EventType::KEY {
                            continue;
                        }
                        let action = match KeyAction::from_i32(event.value()) {
                            Some(a) => a,
                            None => continue,
                        };
                        // Repeats are synthesized downstream by the kernel
                        // from output presses; drop them at the boundary.
                        if action.is_repeat() {
                            continue;
                        }
                        events.push(KeyEvent::new(
                            Key::from(event.code()),
                            action,
                            now,
                            device_name.clone(),
                        ));
                    }
                }
            }
        }

        for i in disconnected.into_iter().rev() {
            self.devices.remove(i);
            self.device_paths.remove(i);
            self.poll_fds.remove(i + udev_offset);
        }

        if self.devices.is_empty() {
            return Err(DeviceError::NoDevices);
        }
        Ok(events)
    }

    fn handle_udev_events(&mut self) {
        let Some(ref monitor) = self.udev_monitor else {
            return;
        };
        let added: Vec<String> = monitor
            .iter()
            .filter(|event| event.event_type() == udev::EventType::Add)
            .filter_map(|event| {
                event
                    .devnode()
                    .and_then(|p| p.to_str().map(|s| s.to_string()))
            })
            .filter(|p| p.starts_with("/dev/input/event"))
            .collect();
        for path in added {
            self.try_add_device(&path);
        }
    }

    fn try_add_device(&mut self, path: &str) {
        if self.device_paths.iter().any(|p| p == path) {
            return;
        }
        let mut device = match Device::open(path) {
            Ok(d) => d,
            Err(e) => {
                tracing::debug!("could not open {}: {}", path, e);
                return;
            }
        };
        let name = device.name().unwrap_or("Unknown").to_string();
        let keyboard = is_keyboard_device(&device);
        let virtual_dev = is_virtual_device(&name);
        if !matches_device_filter(&name, path, &self.filter, keyboard, virtual_dev) {
            return;
        }
        if let Err(e) = device.grab() {
            tracing::warn!("could not grab new device {}: {}", name, e);
            return;
        }
        tracing::info!("device connected: {} ({})", name, path);
        self.device_paths.push(path.to_string());
        self.poll_fds.push(libc::pollfd {
            fd: device.as_raw_fd(),
            events: libc::POLLIN,
            revents: 0,
        });
        self.devices.push(device);
    }

    /// Release the exclusive grabs (shutdown path).
    pub fn ungrab_all(&mut self) {
        if self.grabbed {
            for device in &mut self.devices {
                let _ = device.ungrab();
            }
            self.grabbed = false;
        }
    }
}

// Devices must be ungrabbed even on panic, or the physical keyboard stays
// dead after the process exits.
impl Drop for Source {
    fn drop(&mut self) {
        self.ungrab_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_matches_by_exact_path_or_name() {
        let filter = vec!["/dev/input/event3".to_string()];
        assert!(matches_device_filter(
            "Some Keyboard",
            "/dev/input/event3",
            &filter,
            true,
            false
        ));
        assert!(!matches_device_filter(
            "Some Keyboard",
            "/dev/input/event4",
            &filter,
            true,
            false
        ));

        let filter = vec!["Some Keyboard".to_string()];
        assert!(matches_device_filter(
            "Some Keyboard",
            "/dev/input/event9",
            &filter,
            true,
            false
        ));
    }

    #[test]
    fn explicit_filter_overrides_keyboard_probe() {
        // A named non-keyboard (e.g. a foot pedal) can be selected
        // explicitly.
        let filter = vec!["Foot Pedal".to_string()];
        assert!(matches_device_filter(
            "Foot Pedal",
            "/dev/input/event7",
            &filter,
            false,
            false
        ));
    }

    #[test]
    fn autodetect_takes_only_real_keyboards() {
        assert!(matches_device_filter(
            "USB Keyboard",
            "/dev/input/event0",
            &[],
            true,
            false
        ));
        assert!(!matches_device_filter(
            "USB Mouse",
            "/dev/input/event1",
            &[],
            false,
            false
        ));
    }

    #[test]
    fn own_virtual_device_is_never_selected() {
        let name = format!("{VIRT_DEVICE_PREFIX} Keyboard");
        assert!(is_virtual_device(&name));
        assert!(!matches_device_filter(&name, "/dev/input/event8", &[], true, true));
        assert!(!is_virtual_device("Logitech USB Keyboard"));
    }
}
