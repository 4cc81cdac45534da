//! The outward-facing device object the external device manager holds.

use crate::callback::AudioIoCallback;
use crate::channels::ChannelMask;
use crate::device_core::DeviceCore;

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// A logical full-duplex device: one core, or a master/slave pair presented
/// as one.
pub struct AudioDevice {
    name: String,
    core: Arc<DeviceCore>,
    input_index: Option<usize>,
    output_index: Option<usize>,
    is_open: AtomicBool,
    is_started: AtomicBool,
    last_error: Mutex<String>,
}

impl AudioDevice {
    pub(crate) fn new(
        name: String,
        core: Arc<DeviceCore>,
        input_index: Option<usize>,
        output_index: Option<usize>,
    ) -> Self {
        Self {
            name,
            core,
            input_index,
            output_index,
            is_open: AtomicBool::new(false),
            is_started: AtomicBool::new(false),
            last_error: Mutex::new(String::new()),
        }
    }
}

impl fmt::Debug for AudioDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AudioDevice")
            .field("name", &self.name)
            .field("device_id", &self.core.device_id())
            .field("input_index", &self.input_index)
            .field("output_index", &self.output_index)
            .field("is_open", &self.is_open.load(Ordering::Relaxed))
            .field("is_started", &self.is_started.load(Ordering::Relaxed))
            .finish()
    }
}

impl AudioDevice {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn input_index(&self) -> Option<usize> {
        self.input_index
    }

    pub(crate) fn output_index(&self) -> Option<usize> {
        self.output_index
    }

    /// Inputs come from the slave when one is attached.
    pub fn input_channel_names(&self) -> Vec<String> {
        match self.core.slave() {
            Some(slave) => slave.input_channel_names(),
            None => self.core.input_channel_names(),
        }
    }

    pub fn output_channel_names(&self) -> Vec<String> {
        self.core.output_channel_names()
    }

    pub fn sample_rates(&self) -> Vec<f64> {
        self.core.sample_rates()
    }

    pub fn buffer_sizes(&self) -> Vec<usize> {
        self.core.buffer_sizes()
    }

    /// Smallest available size of at least 512 frames, else 512.
    pub fn default_buffer_size(&self) -> usize {
        self.core
            .buffer_sizes()
            .into_iter()
            .find(|&size| size >= 512)
            .unwrap_or(512)
    }

    /// Reconfigures and opens the device. A zero `buffer_size` substitutes
    /// the default. The returned error is also retained in `last_error`.
    pub fn open(
        &self,
        input_mask: ChannelMask,
        output_mask: ChannelMask,
        sample_rate: f64,
        buffer_size: usize,
    ) -> Result<(), String> {
        let buffer_size = if buffer_size == 0 {
            self.default_buffer_size()
        } else {
            buffer_size
        };
        self.is_open.store(true, Ordering::SeqCst);
        let result = self
            .core
            .reopen(input_mask, output_mask, sample_rate, buffer_size);
        *self.last_error.lock().expect("last error poisoned") =
            result.as_ref().err().cloned().unwrap_or_default();
        result
    }

    /// Marks the device closed. Does not stop a running stream; call
    /// [`stop`](Self::stop) for that.
    pub fn close(&self) {
        self.is_open.store(false, Ordering::SeqCst);
    }

    pub fn is_open(&self) -> bool {
        self.is_open.load(Ordering::SeqCst)
    }

    pub fn current_sample_rate(&self) -> f64 {
        self.core.sample_rate()
    }

    pub fn current_buffer_size(&self) -> usize {
        self.core.buffer_size()
    }

    /// The HAL gives no way to ask; everything crosses the boundary as f32.
    pub fn current_bit_depth(&self) -> usize {
        32
    }

    /// Union of the master's and the slave's active input channels.
    pub fn active_input_channels(&self) -> ChannelMask {
        let mask = self.core.active_input_chans();
        match self.core.slave() {
            Some(slave) => mask.union(&slave.active_input_chans()),
            None => mask,
        }
    }

    pub fn active_output_channels(&self) -> ChannelMask {
        self.core.active_output_chans()
    }

    /// Reported latency plus two buffers of empirical round-trip
    /// correction, which lands within a few milliseconds of a measured
    /// loopback on the built-in hardware.
    pub fn output_latency_samples(&self) -> usize {
        self.core.output_latency() + self.core.buffer_size() * 2
    }

    pub fn input_latency_samples(&self) -> usize {
        self.core.input_latency() + self.core.buffer_size() * 2
    }

    /// Starts callbacks. `about_to_start` is delivered before the first
    /// `io_callback`. Returns true when the stream is running.
    pub fn start(&self, client: Arc<dyn AudioIoCallback>) -> bool {
        if self.is_started.load(Ordering::SeqCst) {
            return true;
        }
        client.about_to_start(self);
        self.is_started.store(true, Ordering::SeqCst);
        self.core.start(Some(client))
    }

    /// Stops callbacks and notifies the client. The interrupt may keep
    /// running briefly to drain; it is torn down on reopen or drop.
    pub fn stop(&self) {
        if !self.is_started.load(Ordering::SeqCst) {
            return;
        }
        let last_client = self.core.client();
        self.is_started.store(false, Ordering::SeqCst);
        self.core.stop(true);
        if let Some(client) = last_client {
            client.stopped();
        }
    }

    pub fn is_playing(&self) -> bool {
        if self.core.client().is_none() {
            self.is_started.store(false, Ordering::SeqCst);
        }
        self.is_started.load(Ordering::SeqCst)
    }

    pub fn last_error(&self) -> String {
        self.last_error.lock().expect("last error poisoned").clone()
    }

    /// The master core backing this device.
    pub fn core(&self) -> &Arc<DeviceCore> {
        &self.core
    }
}
