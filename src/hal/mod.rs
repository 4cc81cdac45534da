//! The hardware abstraction seam.
//!
//! Everything the adapter needs from the OS is behind [`AudioHal`], so the
//! core components run unchanged against the real CoreAudio HAL
//! ([`coreaudio::CoreAudioHal`], macOS only) or against the in-memory
//! [`mock::MockHal`] used by the integration tests.

use std::sync::Arc;

#[cfg(target_os = "macos")]
pub mod coreaudio;
pub mod mock;

/// Opaque device handle assigned by the OS. `0` is the null id.
pub type DeviceId = u32;

/// The hardware properties the adapter distinguishes in notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceProperty {
    NominalSampleRate,
    BufferFrameSize,
    StreamFormat,
    DeviceIsAlive,
    DeviceIsRunning,
    DataSource,
    Volume,
    Mute,
    PlayThrough,
    /// Hardware scope: the set of devices changed.
    DeviceList,
    DefaultInput,
    DefaultOutput,
}

/// Handle for an installed I/O proc.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IoProcToken(pub(crate) u64);

/// Handle for a registered property listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObserverToken(pub(crate) u64);

/// Receives one block of frames on the OS I/O thread.
///
/// Each entry of `input_streams`/`output_streams` is one interleaved stream
/// buffer of the device, in stream order.
pub trait IoHandler: Send + Sync {
    fn process(&self, input_streams: &[&[f32]], output_streams: &mut [&mut [f32]]);
}

/// Receives asynchronous property-change notifications. Called on an OS
/// listener thread; implementations must return quickly.
pub trait PropertyObserver: Send + Sync {
    fn property_changed(&self, device: DeviceId, property: DeviceProperty);
}

/// The OS surface the adapter consumes.
///
/// Getters that can routinely fail on flaky hardware return `Option` or an
/// empty list; operations whose failure the caller must report return
/// `Result<_, String>` with a formatted OS status.
pub trait AudioHal: Send + Sync {
    fn device_ids(&self) -> Vec<DeviceId>;
    fn device_name(&self, device: DeviceId) -> Option<String>;
    fn default_device(&self, input: bool) -> Option<DeviceId>;

    /// Channel count of each stream of the given direction, in stream order.
    fn stream_layout(&self, device: DeviceId, input: bool) -> Vec<u32>;

    fn nominal_sample_rate(&self, device: DeviceId) -> Result<f64, String>;
    fn set_nominal_sample_rate(
        &self,
        device: DeviceId,
        input: bool,
        rate: f64,
    ) -> Result<(), String>;
    /// Supported nominal-rate ranges as `(min, max)` pairs.
    fn sample_rate_ranges(&self, device: DeviceId) -> Vec<(f64, f64)>;

    fn buffer_frame_size(&self, device: DeviceId) -> Result<u32, String>;
    fn set_buffer_frame_size(
        &self,
        device: DeviceId,
        input: bool,
        frames: u32,
    ) -> Result<(), String>;
    /// Supported buffer-frame-size ranges as `(min, max)` pairs.
    fn buffer_frame_size_ranges(&self, device: DeviceId) -> Vec<(f64, f64)>;

    /// Total reported latency for one direction, in frames.
    fn device_latency(&self, device: DeviceId, input: bool) -> u32;

    fn data_sources(&self, device: DeviceId, input: bool) -> Vec<u32>;
    fn data_source_name(&self, device: DeviceId, input: bool, source: u32) -> Option<String>;
    fn current_data_source(&self, device: DeviceId, input: bool) -> Option<u32>;
    fn set_current_data_source(
        &self,
        device: DeviceId,
        input: bool,
        source: u32,
    ) -> Result<(), String>;

    fn related_devices(&self, device: DeviceId) -> Vec<DeviceId>;
    fn is_running(&self, device: DeviceId) -> bool;

    fn install_io_proc(
        &self,
        device: DeviceId,
        handler: Arc<dyn IoHandler>,
    ) -> Result<IoProcToken, String>;
    fn start_io_proc(&self, device: DeviceId, token: IoProcToken) -> Result<(), String>;
    fn stop_io_proc(&self, device: DeviceId, token: IoProcToken) -> Result<(), String>;
    fn remove_io_proc(&self, device: DeviceId, token: IoProcToken);

    fn add_device_observer(
        &self,
        device: DeviceId,
        observer: Arc<dyn PropertyObserver>,
    ) -> ObserverToken;
    fn remove_device_observer(&self, device: DeviceId, token: ObserverToken);
    fn add_hardware_observer(&self, observer: Arc<dyn PropertyObserver>) -> ObserverToken;
    fn remove_hardware_observer(&self, token: ObserverToken);
}
