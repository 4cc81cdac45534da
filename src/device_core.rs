//! Per-device state and the realtime data path.
//!
//! One [`DeviceCore`] wraps one physical device. When two devices are
//! combined into a logical duplex device, the output device is the master
//! (it runs the client's callback on its own clock) and the input device is
//! the slave (its I/O proc only keeps the capture buffers fresh for the
//! master to read).

use crate::callback::AudioIoCallback;
use crate::channels::{ChannelMask, MAX_CHANNELS};
use crate::hal::{
    AudioHal, DeviceId, DeviceProperty, IoHandler, IoProcToken, ObserverToken, PropertyObserver,
};
use crate::routing::{self, ChannelRoute};
use crate::timer::DebounceTimer;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::thread;
use std::time::Duration;

/// Rates offered to clients when the device supports them.
pub const CANDIDATE_SAMPLE_RATES: [f64; 6] =
    [44100.0, 48000.0, 88200.0, 96000.0, 176400.0, 192000.0];

/// A device range within this distance of a candidate rate still counts.
const RATE_TOLERANCE_HZ: f64 = 2.0;

const BUFFER_GRID_STEP: usize = 32;
const BUFFER_GRID_MAX: usize = 8192;

/// Head padding of the temp buffer, in f32 slots, keeping the first channel
/// off the allocation edge.
const BUFFER_PAD_SLOTS: usize = 32;

const REFRESH_DEBOUNCE: Duration = Duration::from_millis(100);
const CONVERGENCE_POLLS: u32 = 30;
const CONVERGENCE_INTERVAL: Duration = Duration::from_millis(100);
const QUIESCENCE_POLLS: u32 = 40;
const QUIESCENCE_INTERVAL: Duration = Duration::from_millis(50);

/// One contiguous scratch allocation partitioned into per-channel views:
/// pad, then `num_inputs` blocks of `frames`, then `num_outputs` blocks.
pub(crate) struct TempBuffer {
    data: Vec<f32>,
    num_inputs: usize,
    num_outputs: usize,
    frames: usize,
}

impl TempBuffer {
    fn new(num_inputs: usize, num_outputs: usize, frames: usize) -> Self {
        Self {
            data: vec![0.0; BUFFER_PAD_SLOTS + (num_inputs + num_outputs) * frames],
            num_inputs,
            num_outputs,
            frames,
        }
    }

    fn empty() -> Self {
        Self::new(0, 0, 0)
    }

    /// Immutable views of the input channels. Returns the channel count.
    fn input_views<'a>(&'a self, views: &mut [&'a [f32]; MAX_CHANNELS]) -> usize {
        if self.frames == 0 {
            return 0;
        }
        let region = &self.data[BUFFER_PAD_SLOTS..];
        for (i, chunk) in region
            .chunks_exact(self.frames)
            .take(self.num_inputs)
            .enumerate()
        {
            views[i] = chunk;
        }
        self.num_inputs
    }

    /// Mutable views of the input channels, for capture.
    fn input_views_mut<'a>(&'a mut self, views: &mut [&'a mut [f32]; MAX_CHANNELS]) -> usize {
        if self.frames == 0 {
            return 0;
        }
        let region = &mut self.data[BUFFER_PAD_SLOTS..];
        for (i, chunk) in region
            .chunks_exact_mut(self.frames)
            .take(self.num_inputs)
            .enumerate()
        {
            views[i] = chunk;
        }
        self.num_inputs
    }

    /// Mutable views of the output channels, for the client to fill.
    fn output_views_mut<'a>(&'a mut self, views: &mut [&'a mut [f32]; MAX_CHANNELS]) -> usize {
        if self.frames == 0 {
            return 0;
        }
        let region = &mut self.data[BUFFER_PAD_SLOTS + self.num_inputs * self.frames..];
        for (i, chunk) in region
            .chunks_exact_mut(self.frames)
            .take(self.num_outputs)
            .enumerate()
        {
            views[i] = chunk;
        }
        self.num_outputs
    }

    /// Immutable input views and mutable output views at once, for driving
    /// the client from this device's own capture buffers.
    fn split_views<'a>(
        &'a mut self,
        inputs: &mut [&'a [f32]; MAX_CHANNELS],
        outputs: &mut [&'a mut [f32]; MAX_CHANNELS],
    ) -> (usize, usize) {
        if self.frames == 0 {
            return (0, 0);
        }
        let region = &mut self.data[BUFFER_PAD_SLOTS..];
        let (in_region, out_region) = region.split_at_mut(self.num_inputs * self.frames);
        let in_region: &'a [f32] = in_region;
        for (i, chunk) in in_region
            .chunks_exact(self.frames)
            .take(self.num_inputs)
            .enumerate()
        {
            inputs[i] = chunk;
        }
        for (i, chunk) in out_region
            .chunks_exact_mut(self.frames)
            .take(self.num_outputs)
            .enumerate()
        {
            outputs[i] = chunk;
        }
        (self.num_inputs, self.num_outputs)
    }
}

/// State read on the I/O thread, guarded by the realtime lock.
struct IoState {
    client: Option<Arc<dyn AudioIoCallback>>,
    callbacks_allowed: bool,
    buffer_size: usize,
    input_routes: Vec<ChannelRoute>,
    output_routes: Vec<ChannelRoute>,
    buffer: TempBuffer,
    slave: Option<Arc<DeviceCore>>,
}

/// Control-plane details mirrored from the OS.
struct DeviceDetails {
    sample_rate: f64,
    buffer_size: usize,
    sample_rates: Vec<f64>,
    buffer_sizes: Vec<usize>,
    in_chan_names: Vec<String>,
    out_chan_names: Vec<String>,
    active_input_chans: ChannelMask,
    active_output_chans: ChannelMask,
    input_latency: usize,
    output_latency: usize,
    last_error: String,
}

impl DeviceDetails {
    fn new(last_error: String) -> Self {
        Self {
            sample_rate: 0.0,
            buffer_size: 512,
            sample_rates: Vec::new(),
            buffer_sizes: Vec::new(),
            in_chan_names: Vec::new(),
            out_chan_names: Vec::new(),
            active_input_chans: ChannelMask::empty(),
            active_output_chans: ChannelMask::empty(),
            input_latency: 0,
            output_latency: 0,
            last_error,
        }
    }
}

pub struct DeviceCore {
    hal: Arc<dyn AudioHal>,
    /// `0` when the OS rejected the id; the core is then inert.
    device_id: DeviceId,
    is_slave: bool,
    weak_self: Weak<DeviceCore>,
    details: Mutex<DeviceDetails>,
    io: Mutex<IoState>,
    started: AtomicBool,
    io_token: Mutex<Option<IoProcToken>>,
    observer_token: Mutex<Option<ObserverToken>>,
    timer: DebounceTimer,
}

impl DeviceCore {
    /// Wraps the given device. A rejected id yields an inert core with
    /// `last_error` set; otherwise the core reads its initial state and
    /// installs its property listener.
    pub fn new(hal: Arc<dyn AudioHal>, device_id: DeviceId, is_slave: bool) -> Arc<Self> {
        let valid = device_id != 0 && hal.device_name(device_id).is_some();
        let last_error = if valid {
            String::new()
        } else {
            "can't open device".to_string()
        };
        let core = Arc::new_cyclic(|weak: &Weak<DeviceCore>| {
            let fire_weak = weak.clone();
            DeviceCore {
                hal: Arc::clone(&hal),
                device_id: if valid { device_id } else { 0 },
                is_slave,
                weak_self: weak.clone(),
                details: Mutex::new(DeviceDetails::new(last_error)),
                io: Mutex::new(IoState {
                    client: None,
                    callbacks_allowed: true,
                    buffer_size: 512,
                    input_routes: Vec::new(),
                    output_routes: Vec::new(),
                    buffer: TempBuffer::empty(),
                    slave: None,
                }),
                started: AtomicBool::new(false),
                io_token: Mutex::new(None),
                observer_token: Mutex::new(None),
                timer: DebounceTimer::new(Box::new(move || {
                    if let Some(core) = fire_weak.upgrade() {
                        core.handle_refresh_timer();
                    }
                })),
            }
        });
        if core.device_id != 0 {
            core.refresh_from_os();
            let observer = Arc::new(CoreObserver {
                core: Arc::downgrade(&core),
            });
            let token = hal.add_device_observer(core.device_id, observer);
            *core.lock_observer_token() = Some(token);
        }
        core
    }

    fn lock_details(&self) -> MutexGuard<'_, DeviceDetails> {
        self.details.lock().expect("device details poisoned")
    }

    fn lock_io(&self) -> MutexGuard<'_, IoState> {
        self.io.lock().expect("io state poisoned")
    }

    fn lock_observer_token(&self) -> MutexGuard<'_, Option<ObserverToken>> {
        self.observer_token.lock().expect("observer token poisoned")
    }

    pub fn device_id(&self) -> DeviceId {
        self.device_id
    }

    pub fn is_slave(&self) -> bool {
        self.is_slave
    }

    pub fn last_error(&self) -> String {
        self.lock_details().last_error.clone()
    }

    pub fn sample_rate(&self) -> f64 {
        self.lock_details().sample_rate
    }

    pub fn buffer_size(&self) -> usize {
        self.lock_details().buffer_size
    }

    pub fn sample_rates(&self) -> Vec<f64> {
        self.lock_details().sample_rates.clone()
    }

    pub fn buffer_sizes(&self) -> Vec<usize> {
        self.lock_details().buffer_sizes.clone()
    }

    pub fn input_channel_names(&self) -> Vec<String> {
        self.lock_details().in_chan_names.clone()
    }

    pub fn output_channel_names(&self) -> Vec<String> {
        self.lock_details().out_chan_names.clone()
    }

    pub fn active_input_chans(&self) -> ChannelMask {
        self.lock_details().active_input_chans
    }

    pub fn active_output_chans(&self) -> ChannelMask {
        self.lock_details().active_output_chans
    }

    pub fn input_latency(&self) -> usize {
        self.lock_details().input_latency
    }

    pub fn output_latency(&self) -> usize {
        self.lock_details().output_latency
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    pub(crate) fn attach_slave(&self, slave: Arc<DeviceCore>) {
        self.lock_io().slave = Some(slave);
    }

    pub fn slave(&self) -> Option<Arc<DeviceCore>> {
        self.lock_io().slave.clone()
    }

    pub(crate) fn client(&self) -> Option<Arc<dyn AudioIoCallback>> {
        self.lock_io().client.clone()
    }

    fn set_callbacks_allowed(&self, allowed: bool) {
        self.lock_io().callbacks_allowed = allowed;
    }

    /// Re-reads every mirrored detail from the OS and rebuilds the channel
    /// routing. The realtime lock is held only while the rebuilt tables and
    /// buffer are swapped in.
    pub fn refresh_from_os(&self) {
        self.timer.cancel();
        if self.device_id == 0 {
            return;
        }

        let mut details = self.lock_details();

        if let Ok(rate) = self.hal.nominal_sample_rate(self.device_id) {
            details.sample_rate = rate;
        }
        if let Ok(frames) = self.hal.buffer_frame_size(self.device_id) {
            if frames > 0 {
                details.buffer_size = frames as usize;
            }
        }

        details.buffer_sizes = available_buffer_sizes(
            &self.hal.buffer_frame_size_ranges(self.device_id),
            details.buffer_size,
        );
        details.sample_rates = available_sample_rates(
            &self.hal.sample_rate_ranges(self.device_id),
            details.sample_rate,
        );
        tracing::debug!(
            device = self.device_id,
            rates = ?details.sample_rates,
            buffer = details.buffer_size,
            "refreshed device details"
        );

        details.input_latency = self.hal.device_latency(self.device_id, true) as usize;
        details.output_latency = self.hal.device_latency(self.device_id, false) as usize;

        let in_layout = self.hal.stream_layout(self.device_id, true);
        let out_layout = self.hal.stream_layout(self.device_id, false);
        let (in_names, in_routes) =
            build_channel_info(&in_layout, &details.active_input_chans, "input");
        let (out_names, out_routes) =
            build_channel_info(&out_layout, &details.active_output_chans, "output");
        details.in_chan_names = in_names;
        details.out_chan_names = out_names;

        let mut io = self.lock_io();
        io.buffer_size = details.buffer_size;
        io.buffer = TempBuffer::new(in_routes.len(), out_routes.len(), details.buffer_size);
        io.input_routes = in_routes;
        io.output_routes = out_routes;
    }

    /// Reconfigures the device: active channels, sample rate, buffer size.
    /// Blocks up to 3 s waiting for the OS to converge on the request.
    /// Returns the error string also retained as `last_error`.
    pub fn reopen(
        &self,
        input_mask: ChannelMask,
        output_mask: ChannelMask,
        sample_rate: f64,
        buffer_size: usize,
    ) -> Result<(), String> {
        if self.device_id == 0 {
            let error = self.last_error();
            return Err(if error.is_empty() {
                "can't open device".to_string()
            } else {
                error
            });
        }
        tracing::debug!(
            device = self.device_id,
            sample_rate,
            buffer_size,
            "reopen"
        );

        self.lock_details().last_error.clear();
        self.set_callbacks_allowed(false);
        self.timer.cancel();
        self.stop(false);

        {
            let mut details = self.lock_details();
            let mut in_mask = input_mask;
            in_mask.truncate(details.in_chan_names.len());
            let mut out_mask = output_mask;
            out_mask.truncate(details.out_chan_names.len());
            details.active_input_chans = in_mask;
            details.active_output_chans = out_mask;
        }

        // Rejected set requests are only logged; the convergence poll below
        // is the arbiter of what the device actually accepted.
        let _ = self
            .hal
            .set_nominal_sample_rate(self.device_id, false, sample_rate);
        let _ = self
            .hal
            .set_nominal_sample_rate(self.device_id, true, sample_rate);
        let _ = self
            .hal
            .set_buffer_frame_size(self.device_id, false, buffer_size as u32);
        let _ = self
            .hal
            .set_buffer_frame_size(self.device_id, true, buffer_size as u32);

        let mut converged = false;
        for _ in 0..CONVERGENCE_POLLS {
            self.refresh_from_os();
            {
                let details = self.lock_details();
                if details.sample_rate == sample_rate && details.buffer_size == buffer_size {
                    converged = true;
                    break;
                }
            }
            thread::sleep(CONVERGENCE_INTERVAL);
        }

        let mut error = String::new();
        if !converged {
            error = "Couldn't change sample rate/buffer size".to_string();
        }
        {
            let details = self.lock_details();
            if details.sample_rates.is_empty() {
                error = "Device has no available sample-rates".to_string();
            }
            if details.buffer_sizes.is_empty() {
                error = "Device has no available buffer-sizes".to_string();
            }
        }

        if error.is_empty() {
            if let Some(slave) = self.slave() {
                if let Err(slave_error) =
                    slave.reopen(input_mask, output_mask, sample_rate, buffer_size)
                {
                    error = slave_error;
                }
            }
        }

        self.lock_details().last_error = error.clone();
        self.set_callbacks_allowed(true);

        if error.is_empty() {
            Ok(())
        } else {
            tracing::warn!(device = self.device_id, %error, "reopen failed");
            Err(error)
        }
    }

    /// Installs and starts the I/O proc, then binds `client` under the
    /// realtime lock. Returns true when this device, and the slave if one
    /// exists, are both running.
    pub fn start(&self, client: Option<Arc<dyn AudioIoCallback>>) -> bool {
        if !self.started.load(Ordering::SeqCst) && self.device_id != 0 {
            self.lock_io().client = None;
            let handler = Arc::new(CoreIoHandler {
                core: self.weak_self.clone(),
            });
            match self.hal.install_io_proc(self.device_id, handler) {
                Ok(token) => match self.hal.start_io_proc(self.device_id, token) {
                    Ok(()) => {
                        *self.io_token.lock().expect("io token poisoned") = Some(token);
                        self.started.store(true, Ordering::SeqCst);
                    }
                    Err(error) => {
                        tracing::error!(device = self.device_id, %error, "device start rejected");
                        self.hal.remove_io_proc(self.device_id, token);
                    }
                },
                Err(error) => {
                    tracing::error!(device = self.device_id, %error, "io proc install failed");
                }
            }
        }

        if self.started.load(Ordering::SeqCst) {
            self.lock_io().client = client;
        }

        match self.slave() {
            // The slave runs its own proc purely to keep its capture
            // buffers fresh; it never gets a client of its own.
            Some(slave) => self.started.load(Ordering::SeqCst) && slave.start(None),
            None => self.started.load(Ordering::SeqCst),
        }
    }

    /// Unbinds the client; unless `leave_interrupt_running`, also tears the
    /// I/O proc down and waits (up to 2 s) for the device to go quiet.
    pub fn stop(&self, leave_interrupt_running: bool) {
        if let Ok(mut io) = self.io.lock() {
            io.client = None;
        }

        if self.started.load(Ordering::SeqCst) && self.device_id != 0 && !leave_interrupt_running
        {
            let token = self.io_token.lock().expect("io token poisoned").take();
            if let Some(token) = token {
                if let Err(error) = self.hal.stop_io_proc(self.device_id, token) {
                    tracing::warn!(device = self.device_id, %error, "device stop rejected");
                }
                self.hal.remove_io_proc(self.device_id, token);
            }
            self.started.store(false, Ordering::SeqCst);

            // wait until it has definitely stopped calling back
            for _ in 0..QUIESCENCE_POLLS {
                if !self.hal.is_running(self.device_id) {
                    break;
                }
                thread::sleep(QUIESCENCE_INTERVAL);
            }
        }

        if let Some(slave) = self.slave() {
            slave.stop(leave_interrupt_running);
        }
    }

    /// The realtime entry point, called on the OS I/O thread with one
    /// interleaved buffer per stream.
    pub fn audio_callback(&self, input_streams: &[&[f32]], output_streams: &mut [&mut [f32]]) {
        let Ok(mut io) = self.io.lock() else {
            return;
        };
        let st = &mut *io;
        let frames = st.buffer_size;

        if self.is_slave {
            // Capture runs whether or not the master currently has a
            // client; the master always reads fresh data.
            let mut capture: [&mut [f32]; MAX_CHANNELS] = core::array::from_fn(|_| Default::default());
            let count = st.buffer.input_views_mut(&mut capture);
            routing::capture_deinterleaved(
                &st.input_routes,
                input_streams,
                &mut capture[..count],
                frames,
            );
            routing::silence_outputs(&st.output_routes, output_streams, frames);
            return;
        }

        let Some(client) = st.client.clone() else {
            routing::silence_outputs(&st.output_routes, output_streams, frames);
            return;
        };

        match st.slave.clone() {
            None => {
                {
                    let mut capture: [&mut [f32]; MAX_CHANNELS] =
                        core::array::from_fn(|_| Default::default());
                    let count = st.buffer.input_views_mut(&mut capture);
                    routing::capture_deinterleaved(
                        &st.input_routes,
                        input_streams,
                        &mut capture[..count],
                        frames,
                    );
                }
                let mut inputs: [&[f32]; MAX_CHANNELS] = [&[]; MAX_CHANNELS];
                let mut outputs: [&mut [f32]; MAX_CHANNELS] =
                    core::array::from_fn(|_| Default::default());
                let (num_in, num_out) = st.buffer.split_views(&mut inputs, &mut outputs);
                client.io_callback(&inputs[..num_in], &mut outputs[..num_out], frames);
                routing::render_interleaved(
                    &st.output_routes,
                    &outputs[..num_out],
                    output_streams,
                    frames,
                );
            }
            Some(slave) => {
                let Ok(slave_io) = slave.io.lock() else {
                    return;
                };
                debug_assert_eq!(slave_io.buffer_size, frames);
                let mut inputs: [&[f32]; MAX_CHANNELS] = [&[]; MAX_CHANNELS];
                let num_in = slave_io.buffer.input_views(&mut inputs);
                let mut outputs: [&mut [f32]; MAX_CHANNELS] =
                    core::array::from_fn(|_| Default::default());
                let num_out = st.buffer.output_views_mut(&mut outputs);
                client.io_callback(&inputs[..num_in], &mut outputs[..num_out], frames);
                routing::render_interleaved(
                    &st.output_routes,
                    &outputs[..num_out],
                    output_streams,
                    frames,
                );
            }
        }
    }

    /// Called from the OS listener thread on any whitelisted property
    /// change. Re-arms the debounced refresh.
    pub fn device_details_changed(&self) {
        let allowed = self
            .io
            .lock()
            .map(|io| io.callbacks_allowed)
            .unwrap_or(false);
        if allowed {
            self.timer.arm(REFRESH_DEBOUNCE);
        }
    }

    fn handle_refresh_timer(&self) {
        tracing::debug!(device = self.device_id, "device change notification");
        let (old_rate, old_size) = {
            let details = self.lock_details();
            (details.sample_rate, details.buffer_size)
        };
        self.refresh_from_os();
        let changed = {
            let details = self.lock_details();
            details.sample_rate != old_rate || details.buffer_size != old_size
        };
        if changed {
            self.set_callbacks_allowed(false);
            self.stop(false);
            self.refresh_from_os();
            self.set_callbacks_allowed(true);
        }
    }

    /// Display names of the device's data sources for one direction.
    pub fn sources(&self, input: bool) -> Vec<String> {
        if self.device_id == 0 {
            return Vec::new();
        }
        self.hal
            .data_sources(self.device_id, input)
            .iter()
            .filter_map(|&source| self.hal.data_source_name(self.device_id, input, source))
            .collect()
    }

    /// Position of the active data source in the OS-returned list.
    pub fn current_source_index(&self, input: bool) -> Option<usize> {
        if self.device_id == 0 {
            return None;
        }
        let current = self.hal.current_data_source(self.device_id, input)?;
        self.hal
            .data_sources(self.device_id, input)
            .iter()
            .position(|&source| source == current)
    }

    pub fn set_current_source_index(&self, index: usize, input: bool) {
        if self.device_id == 0 {
            return;
        }
        let sources = self.hal.data_sources(self.device_id, input);
        if let Some(&source) = sources.get(index) {
            if let Err(error) = self
                .hal
                .set_current_data_source(self.device_id, input, source)
            {
                tracing::warn!(device = self.device_id, %error, "data source selection rejected");
            }
        }
    }

    /// First related device facing the opposite direction, for pairing an
    /// input-only device with its output-only sibling. Candidates are
    /// probed with a temporary core; a probe error discards the candidate.
    pub fn find_duplex_partner(&self) -> Option<DeviceId> {
        if self.device_id == 0 {
            return None;
        }
        let this_is_input = {
            let details = self.lock_details();
            !details.in_chan_names.is_empty() && details.out_chan_names.is_empty()
        };
        for candidate in self.hal.related_devices(self.device_id) {
            if candidate == self.device_id || candidate == 0 {
                continue;
            }
            let probe = DeviceCore::new(Arc::clone(&self.hal), candidate, false);
            if !probe.last_error().is_empty() {
                continue;
            }
            let other_is_input = {
                let details = probe.lock_details();
                !details.in_chan_names.is_empty() && details.out_chan_names.is_empty()
            };
            if this_is_input != other_is_input {
                return Some(candidate);
            }
        }
        None
    }
}

impl Drop for DeviceCore {
    fn drop(&mut self) {
        // Listener first, so no notification can arrive mid-teardown.
        if let Ok(mut token) = self.observer_token.lock() {
            if let Some(token) = token.take() {
                self.hal.remove_device_observer(self.device_id, token);
            }
        }
        self.stop(false);
        self.timer.shutdown();
    }
}

/// Forwards whitelisted property changes into the debounced refresh.
struct CoreObserver {
    core: Weak<DeviceCore>,
}

impl PropertyObserver for CoreObserver {
    fn property_changed(&self, _device: DeviceId, property: DeviceProperty) {
        let Some(core) = self.core.upgrade() else {
            return;
        };
        match property {
            DeviceProperty::NominalSampleRate
            | DeviceProperty::BufferFrameSize
            | DeviceProperty::StreamFormat
            | DeviceProperty::DeviceIsAlive => core.device_details_changed(),
            // Level, source and transport chatter never forces a refresh.
            DeviceProperty::Volume
            | DeviceProperty::Mute
            | DeviceProperty::PlayThrough
            | DeviceProperty::DataSource
            | DeviceProperty::DeviceIsRunning => {}
            _ => {}
        }
    }
}

/// The non-owning handle the OS I/O proc calls back through.
struct CoreIoHandler {
    core: Weak<DeviceCore>,
}

impl IoHandler for CoreIoHandler {
    fn process(&self, input_streams: &[&[f32]], output_streams: &mut [&mut [f32]]) {
        if let Some(core) = self.core.upgrade() {
            core.audio_callback(input_streams, output_streams);
        }
    }
}

/// Builds per-channel names and, for active channels, their routes from the
/// per-stream channel counts. Channel numbers are 1-indexed in names and
/// count across all streams of the direction.
fn build_channel_info(
    stream_layout: &[u32],
    active: &ChannelMask,
    label: &str,
) -> (Vec<String>, Vec<ChannelRoute>) {
    let mut names = Vec::new();
    let mut routes = Vec::with_capacity(MAX_CHANNELS);
    let mut chan_num = 0usize;
    for (stream, &channels) in stream_layout.iter().enumerate() {
        for offset in 0..channels as usize {
            names.push(format!("{label} {}", chan_num + 1));
            if active.get(chan_num) && routes.len() < MAX_CHANNELS {
                routes.push(ChannelRoute {
                    source_channel: chan_num,
                    stream,
                    offset,
                    stride: channels as usize,
                });
            }
            chan_num += 1;
        }
    }
    (names, routes)
}

/// Intersects the device's supported ranges with the coarse size grid,
/// keeping the range minimum and the current size. Sorted ascending.
fn available_buffer_sizes(ranges: &[(f64, f64)], current: usize) -> Vec<usize> {
    let mut sizes = Vec::new();
    if let Some(&(min, _)) = ranges.first() {
        sizes.push(min as usize);
    }
    for size in (BUFFER_GRID_STEP..=BUFFER_GRID_MAX).step_by(BUFFER_GRID_STEP) {
        let supported = ranges
            .iter()
            .any(|&(min, max)| size as f64 >= min && size as f64 <= max);
        if supported && !sizes.contains(&size) {
            sizes.push(size);
        }
    }
    if current > 0 && !sizes.contains(&current) {
        sizes.push(current);
    }
    sizes.sort_unstable();
    sizes.dedup();
    sizes
}

/// Filters the fixed candidate set against the device's supported ranges,
/// with a small tolerance for devices reporting fuzzy bounds.
fn available_sample_rates(ranges: &[(f64, f64)], current: f64) -> Vec<f64> {
    let mut rates: Vec<f64> = CANDIDATE_SAMPLE_RATES
        .iter()
        .copied()
        .filter(|rate| {
            ranges
                .iter()
                .any(|&(min, max)| *rate >= min - RATE_TOLERANCE_HZ && *rate <= max + RATE_TOLERANCE_HZ)
        })
        .collect();
    if rates.is_empty() && current > 0.0 {
        rates.push(current);
    }
    rates
}
