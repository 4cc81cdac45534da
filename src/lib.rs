//! Full-duplex CoreAudio HAL adapter with a deinterleaved per-channel f32
//! callback contract. Two physical devices (distinct input and output) can
//! be combined into one logical device; the output device drives the clock.

pub mod callback;
pub mod channels;
pub mod device;
pub mod device_core;
pub mod error_fmt;
pub mod hal;
pub mod registry;
pub mod routing;
mod timer;

pub use callback::AudioIoCallback;
pub use channels::{ChannelMask, MAX_CHANNELS};
pub use device::AudioDevice;
pub use device_core::{DeviceCore, CANDIDATE_SAMPLE_RATES};
pub use hal::{AudioHal, DeviceId};
pub use registry::{DeviceInfo, DeviceRegistry};
pub use routing::ChannelRoute;
