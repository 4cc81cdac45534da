//! Device discovery and construction.

use crate::device::AudioDevice;
use crate::device_core::DeviceCore;
use crate::hal::{AudioHal, DeviceId, DeviceProperty, ObserverToken, PropertyObserver};

use std::sync::{Arc, Mutex, MutexGuard, Weak};

/// One scanned device, with its channel counts per direction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub id: DeviceId,
    pub name: String,
    pub input_channels: u32,
    pub output_channels: u32,
}

#[derive(Default)]
struct ScanState {
    has_scanned: bool,
    input_names: Vec<String>,
    input_ids: Vec<DeviceId>,
    output_names: Vec<String>,
    output_ids: Vec<DeviceId>,
}

#[derive(Default)]
struct LiveCores {
    cores: Mutex<Vec<Weak<DeviceCore>>>,
}

/// Fans hardware-level device-list changes out to every live core.
/// Default-device moves are the external manager's business, not ours.
struct RegistryObserver {
    live: Weak<LiveCores>,
}

impl PropertyObserver for RegistryObserver {
    fn property_changed(&self, _device: DeviceId, property: DeviceProperty) {
        if property != DeviceProperty::DeviceList {
            return;
        }
        let Some(live) = self.live.upgrade() else {
            return;
        };
        let mut cores = live.cores.lock().expect("live core list poisoned");
        cores.retain(|weak| match weak.upgrade() {
            Some(core) => {
                core.device_details_changed();
                true
            }
            None => false,
        });
    }
}

/// Maintains the input/output device tables and builds [`AudioDevice`]s.
///
/// [`scan_for_devices`](Self::scan_for_devices) must run before any other
/// accessor; the accessors assert that.
pub struct DeviceRegistry {
    hal: Arc<dyn AudioHal>,
    scan: Mutex<ScanState>,
    live: Arc<LiveCores>,
    observer_token: Mutex<Option<ObserverToken>>,
}

impl DeviceRegistry {
    pub fn new(hal: Arc<dyn AudioHal>) -> Self {
        let live = Arc::new(LiveCores::default());
        let observer = Arc::new(RegistryObserver {
            live: Arc::downgrade(&live),
        });
        let token = hal.add_hardware_observer(observer);
        Self {
            hal,
            scan: Mutex::new(ScanState::default()),
            live,
            observer_token: Mutex::new(Some(token)),
        }
    }

    fn lock_scan(&self) -> MutexGuard<'_, ScanState> {
        self.scan.lock().expect("scan state poisoned")
    }

    /// Every device the OS reports, with per-direction channel counts.
    pub fn list_devices(&self) -> Vec<DeviceInfo> {
        self.hal
            .device_ids()
            .into_iter()
            .filter_map(|id| {
                let name = self.hal.device_name(id)?;
                Some(DeviceInfo {
                    id,
                    name,
                    input_channels: self.hal.stream_layout(id, true).iter().sum(),
                    output_channels: self.hal.stream_layout(id, false).iter().sum(),
                })
            })
            .collect()
    }

    /// Rebuilds the input and output tables. A device with both directions
    /// appears in both; duplicate names get " (n)" suffixes.
    pub fn scan_for_devices(&self) {
        let devices = self.list_devices();
        let mut scan = self.lock_scan();
        scan.input_names.clear();
        scan.input_ids.clear();
        scan.output_names.clear();
        scan.output_ids.clear();
        for device in devices {
            tracing::debug!(
                device = device.id,
                name = %device.name,
                inputs = device.input_channels,
                outputs = device.output_channels,
                "found device"
            );
            if device.input_channels > 0 {
                scan.input_names.push(device.name.clone());
                scan.input_ids.push(device.id);
            }
            if device.output_channels > 0 {
                scan.output_names.push(device.name);
                scan.output_ids.push(device.id);
            }
        }
        append_numbers_to_duplicates(&mut scan.input_names);
        append_numbers_to_duplicates(&mut scan.output_names);
        scan.has_scanned = true;
    }

    pub fn device_names(&self, want_inputs: bool) -> Vec<String> {
        let scan = self.lock_scan();
        assert!(scan.has_scanned, "scan_for_devices() must be called first");
        if want_inputs {
            scan.input_names.clone()
        } else {
            scan.output_names.clone()
        }
    }

    /// Index of the OS default device in the corresponding table, or 0
    /// when the default is not present.
    pub fn default_device_index(&self, for_input: bool) -> usize {
        let scan = self.lock_scan();
        assert!(scan.has_scanned, "scan_for_devices() must be called first");
        if let Some(id) = self.hal.default_device(for_input) {
            let ids = if for_input {
                &scan.input_ids
            } else {
                &scan.output_ids
            };
            if let Some(index) = ids.iter().position(|&device| device == id) {
                return index;
            }
        }
        0
    }

    pub fn index_of_device(&self, device: &AudioDevice, as_input: bool) -> Option<usize> {
        let scan = self.lock_scan();
        assert!(scan.has_scanned, "scan_for_devices() must be called first");
        drop(scan);
        if as_input {
            device.input_index()
        } else {
            device.output_index()
        }
    }

    pub fn has_separate_inputs_and_outputs(&self) -> bool {
        true
    }

    /// Builds a logical device from a scanned output name and input name.
    ///
    /// An empty output name uses the input device for both directions. Two
    /// distinct resolved devices become a master (output) / slave (input)
    /// pair. A failed master is an error; a failed slave degrades to an
    /// output-only device.
    pub fn create_device(
        &self,
        output_name: &str,
        input_name: &str,
    ) -> Result<AudioDevice, String> {
        let (input_index, output_index, input_id, output_id) = {
            let scan = self.lock_scan();
            assert!(scan.has_scanned, "scan_for_devices() must be called first");
            let input_index = scan.input_names.iter().position(|name| name == input_name);
            let output_index = scan
                .output_names
                .iter()
                .position(|name| name == output_name);
            (
                input_index,
                output_index,
                input_index.map_or(0, |i| scan.input_ids[i]),
                output_index.map_or(0, |i| scan.output_ids[i]),
            )
        };

        if input_index.is_none() && output_index.is_none() {
            return Err(format!(
                "no such device: output '{output_name}', input '{input_name}'"
            ));
        }

        let name = if output_name.is_empty() {
            input_name
        } else {
            output_name
        };

        if output_id == 0 || output_id == input_id {
            let core = DeviceCore::new(Arc::clone(&self.hal), input_id, false);
            let error = core.last_error();
            if !error.is_empty() {
                return Err(error);
            }
            self.track(&core);
            return Ok(AudioDevice::new(
                name.to_string(),
                core,
                input_index,
                output_index,
            ));
        }

        let master = DeviceCore::new(Arc::clone(&self.hal), output_id, false);
        let error = master.last_error();
        if !error.is_empty() {
            return Err(error);
        }

        if input_id != 0 {
            let slave = DeviceCore::new(Arc::clone(&self.hal), input_id, true);
            let slave_error = slave.last_error();
            if slave_error.is_empty() {
                self.track(&slave);
                master.attach_slave(slave);
            } else {
                tracing::warn!(
                    device = input_id,
                    error = %slave_error,
                    "input device unavailable, continuing output-only"
                );
            }
        }

        self.track(&master);
        Ok(AudioDevice::new(
            name.to_string(),
            master,
            input_index,
            output_index,
        ))
    }

    fn track(&self, core: &Arc<DeviceCore>) {
        self.live
            .cores
            .lock()
            .expect("live core list poisoned")
            .push(Arc::downgrade(core));
    }
}

impl Drop for DeviceRegistry {
    fn drop(&mut self) {
        if let Ok(mut token) = self.observer_token.lock() {
            if let Some(token) = token.take() {
                self.hal.remove_hardware_observer(token);
            }
        }
    }
}

/// Disambiguates duplicate names by numbering every instance, first one
/// included: two "Duet"s become "Duet (1)" and "Duet (2)".
fn append_numbers_to_duplicates(names: &mut [String]) {
    let originals: Vec<String> = names.to_vec();
    for i in 0..names.len() {
        let total = originals.iter().filter(|name| **name == originals[i]).count();
        if total > 1 {
            let ordinal = originals[..=i]
                .iter()
                .filter(|name| **name == originals[i])
                .count();
            names[i] = format!("{} ({})", originals[i], ordinal);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::mock::{MockDevice, MockHal};

    #[test]
    fn duplicates_are_numbered_in_order() {
        let mut names = vec![
            "Duet".to_string(),
            "Solo".to_string(),
            "Duet".to_string(),
            "Duet".to_string(),
        ];
        append_numbers_to_duplicates(&mut names);
        assert_eq!(names, vec!["Duet (1)", "Solo", "Duet (2)", "Duet (3)"]);
    }

    #[test]
    fn scan_splits_directions_and_keeps_order() {
        let hal = MockHal::new();
        hal.add_device(
            1,
            MockDevice {
                name: "Mic".into(),
                input_streams: vec![1],
                output_streams: vec![],
                ..MockDevice::default()
            },
        );
        hal.add_device(
            2,
            MockDevice {
                name: "Speakers".into(),
                input_streams: vec![],
                output_streams: vec![2],
                ..MockDevice::default()
            },
        );
        hal.add_device(
            3,
            MockDevice {
                name: "Duplex".into(),
                ..MockDevice::default()
            },
        );
        let registry = DeviceRegistry::new(hal);
        registry.scan_for_devices();
        assert_eq!(registry.device_names(true), vec!["Mic", "Duplex"]);
        assert_eq!(registry.device_names(false), vec!["Speakers", "Duplex"]);
        assert!(registry.has_separate_inputs_and_outputs());
    }

    #[test]
    fn default_index_falls_back_to_zero() {
        let hal = MockHal::new();
        hal.add_device(
            5,
            MockDevice {
                name: "A".into(),
                ..MockDevice::default()
            },
        );
        hal.add_device(
            6,
            MockDevice {
                name: "B".into(),
                ..MockDevice::default()
            },
        );
        hal.set_defaults(Some(6), None);
        let registry = DeviceRegistry::new(hal);
        registry.scan_for_devices();
        assert_eq!(registry.default_device_index(true), 1);
        // no default output configured
        assert_eq!(registry.default_device_index(false), 0);
    }

    #[test]
    #[should_panic(expected = "scan_for_devices")]
    fn accessors_require_a_scan() {
        let registry = DeviceRegistry::new(MockHal::new());
        registry.device_names(true);
    }

    #[test]
    fn create_device_rejects_unknown_names() {
        let hal = MockHal::new();
        hal.add_device(
            1,
            MockDevice {
                name: "Duplex".into(),
                ..MockDevice::default()
            },
        );
        let registry = DeviceRegistry::new(hal);
        registry.scan_for_devices();
        let error = registry.create_device("Ghost", "Phantom").unwrap_err();
        assert!(error.contains("no such device"), "{error}");
    }

    #[test]
    fn failed_slave_degrades_to_output_only() {
        let hal = MockHal::new();
        hal.add_device(
            1,
            MockDevice {
                name: "Mic".into(),
                input_streams: vec![2],
                output_streams: vec![],
                ..MockDevice::default()
            },
        );
        hal.add_device(
            2,
            MockDevice {
                name: "Speakers".into(),
                input_streams: vec![],
                output_streams: vec![2],
                ..MockDevice::default()
            },
        );
        let registry = DeviceRegistry::new(hal.clone());
        registry.scan_for_devices();
        // the input device vanishes between scan and open
        hal.remove_device(1);
        let device = registry.create_device("Speakers", "Mic").unwrap();
        assert!(device.core().slave().is_none());
        assert_eq!(device.output_channel_names().len(), 2);
        assert!(device.input_channel_names().is_empty());
    }
}
