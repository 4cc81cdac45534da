#![cfg(target_os = "macos")]

//! Smoke test against real CoreAudio hardware.
//!
//! Opens the default output device, runs a quiet sine through it for half a
//! second, and checks that the I/O proc actually fired. Marked `#[ignore]`
//! because it needs audio hardware and cannot run in headless CI.

use coreaudio_duplex::hal::coreaudio::CoreAudioHal;
use coreaudio_duplex::{AudioDevice, AudioIoCallback, ChannelMask, DeviceRegistry};

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

struct Sine {
    calls: AtomicUsize,
    sample_rate: f64,
    phase: Mutex<f64>,
}

impl Sine {
    fn new(sample_rate: f64) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            sample_rate,
            phase: Mutex::new(0.0),
        }
    }
}

impl AudioIoCallback for Sine {
    fn about_to_start(&self, _device: &AudioDevice) {}

    fn io_callback(&self, _inputs: &[&[f32]], outputs: &mut [&mut [f32]], frames: usize) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut phase = self.phase.lock().unwrap();
        let step = 440.0 * 2.0 * std::f64::consts::PI / self.sample_rate;
        for k in 0..frames {
            let sample = ((*phase + step * k as f64).sin() * 0.1) as f32;
            for output in outputs.iter_mut() {
                output[k] = sample;
            }
        }
        *phase = (*phase + step * frames as f64) % (2.0 * std::f64::consts::PI);
    }

    fn stopped(&self) {}
}

#[test]
#[ignore = "requires CoreAudio hardware"]
fn default_output_plays_briefly() {
    let hal = Arc::new(CoreAudioHal::new());
    let registry = DeviceRegistry::new(hal);
    registry.scan_for_devices();

    let outputs = registry.device_names(false);
    assert!(!outputs.is_empty(), "no CoreAudio output devices found");
    let index = registry.default_device_index(false);
    let device = registry
        .create_device(&outputs[index], "")
        .expect("failed to open the default output device");

    let rate = device.sample_rates().first().copied().unwrap_or(44100.0);
    let size = device.default_buffer_size();
    device
        .open(ChannelMask::empty(), ChannelMask::from_bits(0b11), rate, size)
        .expect("open failed");
    assert!(!device.output_channel_names().is_empty());

    let client = Arc::new(Sine::new(device.current_sample_rate()));
    assert!(device.start(client.clone()), "device did not start");
    thread::sleep(Duration::from_millis(500));
    device.stop();

    assert!(
        client.calls.load(Ordering::SeqCst) > 0,
        "io proc never fired"
    );
}
