//! In-memory [`AudioHal`] for deterministic tests.
//!
//! Devices are scripted, property-change notifications and I/O cycles are
//! fired by hand, and sample-rate/buffer-size changes can be made to settle
//! only after a number of polls to exercise the reconfiguration paths.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use super::{
    AudioHal, DeviceId, DeviceProperty, IoHandler, IoProcToken, ObserverToken, PropertyObserver,
};

/// Scripted description of one fake device.
#[derive(Debug, Clone)]
pub struct MockDevice {
    pub name: String,
    /// Channels per input stream, in stream order.
    pub input_streams: Vec<u32>,
    /// Channels per output stream, in stream order.
    pub output_streams: Vec<u32>,
    pub sample_rate: f64,
    pub buffer_frames: u32,
    pub sample_rate_ranges: Vec<(f64, f64)>,
    pub buffer_frame_ranges: Vec<(f64, f64)>,
    pub input_latency: u32,
    pub output_latency: u32,
    pub data_sources: Vec<(u32, String)>,
    pub current_source: Option<u32>,
    pub related: Vec<DeviceId>,
}

impl Default for MockDevice {
    fn default() -> Self {
        Self {
            name: "Mock Device".to_string(),
            input_streams: vec![2],
            output_streams: vec![2],
            sample_rate: 44100.0,
            buffer_frames: 512,
            sample_rate_ranges: vec![(44100.0, 192000.0)],
            buffer_frame_ranges: vec![(16.0, 4096.0)],
            input_latency: 32,
            output_latency: 48,
            data_sources: Vec::new(),
            current_source: None,
            related: Vec::new(),
        }
    }
}

struct DeviceSlot {
    desc: MockDevice,
    pending_rate: Option<f64>,
    pending_frames: Option<u32>,
    /// Number of polls a pending change waits before it applies.
    /// `u32::MAX` never settles.
    settle_polls: u32,
    remaining_polls: Option<u32>,
    rate_reads: u64,
    running: bool,
}

impl DeviceSlot {
    fn new(desc: MockDevice) -> Self {
        Self {
            desc,
            pending_rate: None,
            pending_frames: None,
            settle_polls: 0,
            remaining_polls: None,
            rate_reads: 0,
            running: false,
        }
    }

    fn apply_pending(&mut self) {
        if let Some(rate) = self.pending_rate.take() {
            self.desc.sample_rate = rate;
        }
        if let Some(frames) = self.pending_frames.take() {
            self.desc.buffer_frames = frames;
        }
        self.remaining_polls = None;
    }

    fn tick_poll(&mut self) {
        if self.settle_polls == u32::MAX {
            return;
        }
        if let Some(remaining) = self.remaining_polls {
            let remaining = remaining.saturating_sub(1);
            if remaining == 0 {
                self.apply_pending();
            } else {
                self.remaining_polls = Some(remaining);
            }
        }
    }
}

struct ProcSlot {
    device: DeviceId,
    handler: Arc<dyn IoHandler>,
    started: bool,
}

#[derive(Default)]
struct MockState {
    devices: HashMap<DeviceId, DeviceSlot>,
    order: Vec<DeviceId>,
    default_input: Option<DeviceId>,
    default_output: Option<DeviceId>,
    procs: HashMap<u64, ProcSlot>,
    device_observers: HashMap<u64, (DeviceId, Arc<dyn PropertyObserver>)>,
    hardware_observers: HashMap<u64, Arc<dyn PropertyObserver>>,
    next_token: u64,
}

pub struct MockHal {
    state: Mutex<MockState>,
}

impl MockHal {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(MockState::default()),
        })
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().expect("mock hal poisoned")
    }

    pub fn add_device(&self, id: DeviceId, desc: MockDevice) {
        let mut state = self.lock();
        state.devices.insert(id, DeviceSlot::new(desc));
        if !state.order.contains(&id) {
            state.order.push(id);
        }
    }

    pub fn remove_device(&self, id: DeviceId) {
        let mut state = self.lock();
        state.devices.remove(&id);
        state.order.retain(|&d| d != id);
    }

    pub fn set_defaults(&self, input: Option<DeviceId>, output: Option<DeviceId>) {
        let mut state = self.lock();
        state.default_input = input;
        state.default_output = output;
    }

    /// Makes subsequent rate/size requests settle only after `polls` reads
    /// of the nominal sample rate. `u32::MAX` never settles.
    pub fn set_settle_polls(&self, id: DeviceId, polls: u32) {
        if let Some(slot) = self.lock().devices.get_mut(&id) {
            slot.settle_polls = polls;
        }
    }

    /// Number of nominal-sample-rate reads the device has served.
    pub fn property_reads(&self, id: DeviceId) -> u64 {
        self.lock().devices.get(&id).map_or(0, |slot| slot.rate_reads)
    }

    pub fn proc_installed(&self, id: DeviceId) -> bool {
        self.lock().procs.values().any(|proc| proc.device == id)
    }

    pub fn proc_started(&self, id: DeviceId) -> bool {
        self.lock()
            .procs
            .values()
            .any(|proc| proc.device == id && proc.started)
    }

    /// Delivers a device-scope property notification to its observers.
    pub fn notify_device(&self, id: DeviceId, property: DeviceProperty) {
        let observers: Vec<_> = self
            .lock()
            .device_observers
            .values()
            .filter(|(device, _)| *device == id)
            .map(|(_, observer)| Arc::clone(observer))
            .collect();
        for observer in observers {
            observer.property_changed(id, property);
        }
    }

    /// Delivers a hardware-scope property notification.
    pub fn notify_hardware(&self, property: DeviceProperty) {
        let observers: Vec<_> = self
            .lock()
            .hardware_observers
            .values()
            .map(Arc::clone)
            .collect();
        for observer in observers {
            observer.property_changed(0, property);
        }
    }

    /// Runs one I/O cycle through the device's started proc. Returns false
    /// when no started proc is installed for the device.
    pub fn fire_io(
        &self,
        id: DeviceId,
        input_streams: &[&[f32]],
        output_streams: &mut [&mut [f32]],
    ) -> bool {
        let handler = self
            .lock()
            .procs
            .values()
            .find(|proc| proc.device == id && proc.started)
            .map(|proc| Arc::clone(&proc.handler));
        match handler {
            Some(handler) => {
                handler.process(input_streams, output_streams);
                true
            }
            None => false,
        }
    }
}

impl AudioHal for MockHal {
    fn device_ids(&self) -> Vec<DeviceId> {
        self.lock().order.clone()
    }

    fn device_name(&self, device: DeviceId) -> Option<String> {
        self.lock().devices.get(&device).map(|slot| slot.desc.name.clone())
    }

    fn default_device(&self, input: bool) -> Option<DeviceId> {
        let state = self.lock();
        if input {
            state.default_input
        } else {
            state.default_output
        }
    }

    fn stream_layout(&self, device: DeviceId, input: bool) -> Vec<u32> {
        self.lock().devices.get(&device).map_or(Vec::new(), |slot| {
            if input {
                slot.desc.input_streams.clone()
            } else {
                slot.desc.output_streams.clone()
            }
        })
    }

    fn nominal_sample_rate(&self, device: DeviceId) -> Result<f64, String> {
        let mut state = self.lock();
        let slot = state
            .devices
            .get_mut(&device)
            .ok_or_else(|| format!("no such device: {device}"))?;
        slot.rate_reads += 1;
        slot.tick_poll();
        Ok(slot.desc.sample_rate)
    }

    fn set_nominal_sample_rate(
        &self,
        device: DeviceId,
        _input: bool,
        rate: f64,
    ) -> Result<(), String> {
        let mut state = self.lock();
        let slot = state
            .devices
            .get_mut(&device)
            .ok_or_else(|| format!("no such device: {device}"))?;
        if slot.settle_polls == 0 {
            slot.desc.sample_rate = rate;
        } else {
            slot.pending_rate = Some(rate);
            slot.remaining_polls = Some(slot.settle_polls);
        }
        Ok(())
    }

    fn sample_rate_ranges(&self, device: DeviceId) -> Vec<(f64, f64)> {
        self.lock()
            .devices
            .get(&device)
            .map_or(Vec::new(), |slot| slot.desc.sample_rate_ranges.clone())
    }

    fn buffer_frame_size(&self, device: DeviceId) -> Result<u32, String> {
        self.lock()
            .devices
            .get(&device)
            .map(|slot| slot.desc.buffer_frames)
            .ok_or_else(|| format!("no such device: {device}"))
    }

    fn set_buffer_frame_size(
        &self,
        device: DeviceId,
        _input: bool,
        frames: u32,
    ) -> Result<(), String> {
        let mut state = self.lock();
        let slot = state
            .devices
            .get_mut(&device)
            .ok_or_else(|| format!("no such device: {device}"))?;
        if slot.settle_polls == 0 {
            slot.desc.buffer_frames = frames;
        } else {
            slot.pending_frames = Some(frames);
            slot.remaining_polls = Some(slot.settle_polls);
        }
        Ok(())
    }

    fn buffer_frame_size_ranges(&self, device: DeviceId) -> Vec<(f64, f64)> {
        self.lock()
            .devices
            .get(&device)
            .map_or(Vec::new(), |slot| slot.desc.buffer_frame_ranges.clone())
    }

    fn device_latency(&self, device: DeviceId, input: bool) -> u32 {
        self.lock().devices.get(&device).map_or(0, |slot| {
            if input {
                slot.desc.input_latency
            } else {
                slot.desc.output_latency
            }
        })
    }

    fn data_sources(&self, device: DeviceId, _input: bool) -> Vec<u32> {
        self.lock().devices.get(&device).map_or(Vec::new(), |slot| {
            slot.desc.data_sources.iter().map(|(id, _)| *id).collect()
        })
    }

    fn data_source_name(&self, device: DeviceId, _input: bool, source: u32) -> Option<String> {
        self.lock().devices.get(&device).and_then(|slot| {
            slot.desc
                .data_sources
                .iter()
                .find(|(id, _)| *id == source)
                .map(|(_, name)| name.clone())
        })
    }

    fn current_data_source(&self, device: DeviceId, _input: bool) -> Option<u32> {
        self.lock()
            .devices
            .get(&device)
            .and_then(|slot| slot.desc.current_source)
    }

    fn set_current_data_source(
        &self,
        device: DeviceId,
        _input: bool,
        source: u32,
    ) -> Result<(), String> {
        let mut state = self.lock();
        let slot = state
            .devices
            .get_mut(&device)
            .ok_or_else(|| format!("no such device: {device}"))?;
        if !slot.desc.data_sources.iter().any(|(id, _)| *id == source) {
            return Err(format!("no such data source: {source}"));
        }
        slot.desc.current_source = Some(source);
        Ok(())
    }

    fn related_devices(&self, device: DeviceId) -> Vec<DeviceId> {
        self.lock()
            .devices
            .get(&device)
            .map_or(Vec::new(), |slot| slot.desc.related.clone())
    }

    fn is_running(&self, device: DeviceId) -> bool {
        self.lock().devices.get(&device).is_some_and(|slot| slot.running)
    }

    fn install_io_proc(
        &self,
        device: DeviceId,
        handler: Arc<dyn IoHandler>,
    ) -> Result<IoProcToken, String> {
        let mut state = self.lock();
        if !state.devices.contains_key(&device) {
            return Err(format!("no such device: {device}"));
        }
        state.next_token += 1;
        let token = state.next_token;
        state.procs.insert(
            token,
            ProcSlot {
                device,
                handler,
                started: false,
            },
        );
        Ok(IoProcToken(token))
    }

    fn start_io_proc(&self, device: DeviceId, token: IoProcToken) -> Result<(), String> {
        let mut state = self.lock();
        match state.procs.get_mut(&token.0) {
            Some(proc) if proc.device == device => {
                proc.started = true;
            }
            _ => return Err(format!("no such io proc on device {device}")),
        }
        if let Some(slot) = state.devices.get_mut(&device) {
            slot.running = true;
        }
        Ok(())
    }

    fn stop_io_proc(&self, device: DeviceId, token: IoProcToken) -> Result<(), String> {
        let mut state = self.lock();
        if let Some(proc) = state.procs.get_mut(&token.0) {
            proc.started = false;
        }
        if let Some(slot) = state.devices.get_mut(&device) {
            slot.running = false;
        }
        Ok(())
    }

    fn remove_io_proc(&self, _device: DeviceId, token: IoProcToken) {
        self.lock().procs.remove(&token.0);
    }

    fn add_device_observer(
        &self,
        device: DeviceId,
        observer: Arc<dyn PropertyObserver>,
    ) -> ObserverToken {
        let mut state = self.lock();
        state.next_token += 1;
        let token = state.next_token;
        state.device_observers.insert(token, (device, observer));
        ObserverToken(token)
    }

    fn remove_device_observer(&self, _device: DeviceId, token: ObserverToken) {
        self.lock().device_observers.remove(&token.0);
    }

    fn add_hardware_observer(&self, observer: Arc<dyn PropertyObserver>) -> ObserverToken {
        let mut state = self.lock();
        state.next_token += 1;
        let token = state.next_token;
        state.hardware_observers.insert(token, observer);
        ObserverToken(token)
    }

    fn remove_hardware_observer(&self, token: ObserverToken) {
        self.lock().hardware_observers.remove(&token.0);
    }
}
