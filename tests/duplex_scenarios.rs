//! End-to-end scenarios over the in-memory HAL: single duplex devices,
//! channel masking, master/slave aggregation, reconfiguration and the
//! debounced reaction to OS notifications.

use coreaudio_duplex::hal::mock::{MockDevice, MockHal};
use coreaudio_duplex::hal::DeviceProperty;
use coreaudio_duplex::{AudioDevice, AudioIoCallback, ChannelMask, DeviceCore, DeviceRegistry};

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

/// Copies every input channel to the matching output channel; surplus
/// outputs are zeroed.
#[derive(Default)]
struct PassThrough {
    started: AtomicUsize,
    stopped: AtomicUsize,
    calls: AtomicUsize,
}

impl AudioIoCallback for PassThrough {
    fn about_to_start(&self, _device: &AudioDevice) {
        self.started.fetch_add(1, Ordering::SeqCst);
    }

    fn io_callback(&self, inputs: &[&[f32]], outputs: &mut [&mut [f32]], frames: usize) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        for (channel, output) in outputs.iter_mut().enumerate() {
            match inputs.get(channel) {
                Some(input) => output[..frames].copy_from_slice(&input[..frames]),
                None => output[..frames].fill(0.0),
            }
        }
    }

    fn stopped(&self) {
        self.stopped.fetch_add(1, Ordering::SeqCst);
    }
}

/// Keeps a copy of the most recent input block.
#[derive(Default)]
struct Recorder {
    inputs: Mutex<Vec<Vec<f32>>>,
}

impl AudioIoCallback for Recorder {
    fn about_to_start(&self, _device: &AudioDevice) {}

    fn io_callback(&self, inputs: &[&[f32]], outputs: &mut [&mut [f32]], frames: usize) {
        *self.inputs.lock().unwrap() = inputs.iter().map(|channel| channel.to_vec()).collect();
        for output in outputs.iter_mut() {
            output[..frames].fill(0.0);
        }
    }

    fn stopped(&self) {}
}

fn duplex(name: &str) -> MockDevice {
    MockDevice {
        name: name.to_string(),
        sample_rate: 48000.0,
        buffer_frames: 64,
        ..MockDevice::default()
    }
}

/// Interleaved stereo ramp: channel `i`, frame `k` carries `i * 1000 + k`.
fn stereo_ramp(frames: usize) -> Vec<f32> {
    let mut stream = vec![0.0f32; frames * 2];
    for k in 0..frames {
        stream[2 * k] = k as f32;
        stream[2 * k + 1] = 1000.0 + k as f32;
    }
    stream
}

#[test]
fn duplex_passthrough_interleaves_both_directions() {
    let hal = MockHal::new();
    hal.add_device(10, duplex("Duet"));
    let registry = DeviceRegistry::new(hal.clone());
    registry.scan_for_devices();

    let device = registry.create_device("Duet", "Duet").unwrap();
    device
        .open(
            ChannelMask::from_bits(0b11),
            ChannelMask::from_bits(0b11),
            48000.0,
            64,
        )
        .unwrap();
    assert_eq!(device.current_sample_rate(), 48000.0);
    assert_eq!(device.current_buffer_size(), 64);

    let client = Arc::new(PassThrough::default());
    assert!(device.start(client.clone()));
    assert_eq!(client.started.load(Ordering::SeqCst), 1);

    let frames = 64;
    let input = stereo_ramp(frames);
    let mut output = vec![-1.0f32; frames * 2];
    assert!(hal.fire_io(10, &[input.as_slice()], &mut [output.as_mut_slice()]));
    assert_eq!(client.calls.load(Ordering::SeqCst), 1);

    for k in 0..frames {
        assert_eq!(output[2 * k], k as f32);
        assert_eq!(output[2 * k + 1], 1000.0 + k as f32);
    }

    device.stop();
    assert_eq!(client.stopped.load(Ordering::SeqCst), 1);
}

#[test]
fn input_mask_exposes_only_the_selected_channel() {
    let hal = MockHal::new();
    hal.add_device(7, duplex("Duet"));
    let registry = DeviceRegistry::new(hal.clone());
    registry.scan_for_devices();

    let device = registry.create_device("Duet", "Duet").unwrap();
    device
        .open(
            ChannelMask::from_bits(0b10),
            ChannelMask::from_bits(0b11),
            48000.0,
            64,
        )
        .unwrap();
    assert_eq!(device.active_input_channels().count(), 1);

    let client = Arc::new(Recorder::default());
    assert!(device.start(client.clone()));

    let frames = 64;
    let mut input = vec![0.0f32; frames * 2];
    for k in 0..frames {
        input[2 * k] = 10.0 + k as f32;
        input[2 * k + 1] = 20.0 + k as f32;
    }
    let mut output = vec![0.0f32; frames * 2];
    assert!(hal.fire_io(7, &[input.as_slice()], &mut [output.as_mut_slice()]));

    let captured = client.inputs.lock().unwrap().clone();
    assert_eq!(captured.len(), 1);
    for k in 0..frames {
        assert_eq!(captured[0][k], 20.0 + k as f32);
    }
}

#[test]
fn aggregated_pair_reads_the_slave_capture_buffers() {
    let hal = MockHal::new();
    hal.add_device(
        1,
        MockDevice {
            name: "Mic".into(),
            input_streams: vec![2],
            output_streams: vec![],
            sample_rate: 48000.0,
            buffer_frames: 64,
            ..MockDevice::default()
        },
    );
    hal.add_device(
        2,
        MockDevice {
            name: "Speakers".into(),
            input_streams: vec![],
            output_streams: vec![2],
            sample_rate: 48000.0,
            buffer_frames: 64,
            ..MockDevice::default()
        },
    );
    let registry = DeviceRegistry::new(hal.clone());
    registry.scan_for_devices();

    let device = registry.create_device("Speakers", "Mic").unwrap();
    assert_eq!(device.input_channel_names(), vec!["input 1", "input 2"]);
    assert_eq!(device.output_channel_names(), vec!["output 1", "output 2"]);

    device
        .open(
            ChannelMask::from_bits(0b11),
            ChannelMask::from_bits(0b11),
            48000.0,
            64,
        )
        .unwrap();
    let slave = device.core().slave().expect("missing slave");
    assert_eq!(slave.buffer_size(), device.current_buffer_size());

    let client = Arc::new(PassThrough::default());
    assert!(device.start(client.clone()));

    // the input device captures on its own proc...
    let frames = 64;
    let input = stereo_ramp(frames);
    let mut no_outputs: [&mut [f32]; 0] = [];
    assert!(hal.fire_io(1, &[input.as_slice()], &mut no_outputs));
    assert_eq!(client.calls.load(Ordering::SeqCst), 0);

    // ...and the output device's proc drives the client with that capture
    let mut output = vec![0.0f32; frames * 2];
    assert!(hal.fire_io(2, &[], &mut [output.as_mut_slice()]));
    assert_eq!(client.calls.load(Ordering::SeqCst), 1);
    for k in 0..frames {
        assert_eq!(output[2 * k], k as f32);
        assert_eq!(output[2 * k + 1], 1000.0 + k as f32);
    }

    device.stop();
    assert_eq!(client.stopped.load(Ordering::SeqCst), 1);
}

#[test]
fn open_with_empty_output_name_is_input_only() {
    let hal = MockHal::new();
    hal.add_device(
        4,
        MockDevice {
            name: "Mic".into(),
            input_streams: vec![1],
            output_streams: vec![],
            ..MockDevice::default()
        },
    );
    let registry = DeviceRegistry::new(hal);
    registry.scan_for_devices();

    let device = registry.create_device("", "Mic").unwrap();
    assert_eq!(device.name(), "Mic");
    assert_eq!(device.input_channel_names(), vec!["input 1"]);
    assert!(device.output_channel_names().is_empty());
    device
        .open(ChannelMask::from_bits(0b1), ChannelMask::empty(), 44100.0, 512)
        .unwrap();
    assert_eq!(device.active_output_channels().count(), 0);
}

#[test]
fn reconfigure_converges_after_delayed_polls() {
    let hal = MockHal::new();
    hal.add_device(5, MockDevice::default());
    let registry = DeviceRegistry::new(hal.clone());
    registry.scan_for_devices();

    let device = registry.create_device("Mock Device", "Mock Device").unwrap();
    device
        .open(
            ChannelMask::from_bits(0b11),
            ChannelMask::from_bits(0b11),
            44100.0,
            512,
        )
        .unwrap();

    // the device only settles after four polls of the refresh loop
    hal.set_settle_polls(5, 4);
    device
        .open(
            ChannelMask::from_bits(0b11),
            ChannelMask::from_bits(0b11),
            48000.0,
            256,
        )
        .unwrap();
    assert_eq!(device.current_sample_rate(), 48000.0);
    assert_eq!(device.current_buffer_size(), 256);
    assert!(device.last_error().is_empty());
}

#[test]
fn reconfigure_that_never_converges_reports_and_survives() {
    let hal = MockHal::new();
    hal.add_device(5, MockDevice::default());
    let registry = DeviceRegistry::new(hal.clone());
    registry.scan_for_devices();

    let device = registry.create_device("Mock Device", "Mock Device").unwrap();
    device
        .open(
            ChannelMask::from_bits(0b11),
            ChannelMask::from_bits(0b11),
            44100.0,
            512,
        )
        .unwrap();

    hal.set_settle_polls(5, u32::MAX);
    let error = device
        .open(
            ChannelMask::from_bits(0b11),
            ChannelMask::from_bits(0b11),
            48000.0,
            256,
        )
        .unwrap_err();
    assert_eq!(error, "Couldn't change sample rate/buffer size");
    assert_eq!(device.last_error(), error);

    // the facade stays usable
    assert!(!device.sample_rates().is_empty());
    assert!(!device.buffer_sizes().is_empty());
    assert_eq!(device.current_sample_rate(), 44100.0);
    assert_eq!(device.current_buffer_size(), 512);
}

#[test]
fn notification_burst_coalesces_into_one_refresh() {
    let hal = MockHal::new();
    hal.add_device(9, duplex("Duet"));
    let registry = DeviceRegistry::new(hal.clone());
    registry.scan_for_devices();

    let device = registry.create_device("Duet", "Duet").unwrap();
    device
        .open(
            ChannelMask::from_bits(0b11),
            ChannelMask::from_bits(0b11),
            48000.0,
            64,
        )
        .unwrap();
    let client = Arc::new(PassThrough::default());
    assert!(device.start(client.clone()));

    let baseline = hal.property_reads(9);
    for _ in 0..5 {
        hal.notify_device(9, DeviceProperty::DeviceIsAlive);
    }
    thread::sleep(Duration::from_millis(400));
    assert_eq!(hal.property_reads(9) - baseline, 1);

    // rate and size were unchanged, so the stream kept running
    assert!(device.is_playing());
    assert_eq!(device.active_input_channels().count(), 2);
    let frames = 64;
    let input = stereo_ramp(frames);
    let mut output = vec![0.0f32; frames * 2];
    assert!(hal.fire_io(9, &[input.as_slice()], &mut [output.as_mut_slice()]));
    assert!(client.calls.load(Ordering::SeqCst) > 0);
}

#[test]
fn ignored_properties_do_not_arm_the_refresh() {
    let hal = MockHal::new();
    hal.add_device(9, duplex("Duet"));
    let registry = DeviceRegistry::new(hal.clone());
    registry.scan_for_devices();
    let device = registry.create_device("Duet", "Duet").unwrap();
    device
        .open(
            ChannelMask::from_bits(0b11),
            ChannelMask::from_bits(0b11),
            48000.0,
            64,
        )
        .unwrap();

    let baseline = hal.property_reads(9);
    hal.notify_device(9, DeviceProperty::Volume);
    hal.notify_device(9, DeviceProperty::Mute);
    hal.notify_device(9, DeviceProperty::DeviceIsRunning);
    thread::sleep(Duration::from_millis(250));
    assert_eq!(hal.property_reads(9), baseline);
}

#[test]
fn stop_suppresses_callbacks_and_zero_fills() {
    let hal = MockHal::new();
    hal.add_device(11, duplex("Duet"));
    let registry = DeviceRegistry::new(hal.clone());
    registry.scan_for_devices();

    let device = registry.create_device("Duet", "Duet").unwrap();
    device
        .open(
            ChannelMask::from_bits(0b11),
            ChannelMask::from_bits(0b11),
            48000.0,
            64,
        )
        .unwrap();
    let client = Arc::new(PassThrough::default());
    assert!(device.start(client.clone()));

    let frames = 64;
    let input = stereo_ramp(frames);
    let mut output = vec![0.0f32; frames * 2];
    assert!(hal.fire_io(11, &[input.as_slice()], &mut [output.as_mut_slice()]));
    assert_eq!(client.calls.load(Ordering::SeqCst), 1);

    // facade stop leaves the interrupt draining but unbinds the client
    device.stop();
    assert_eq!(client.stopped.load(Ordering::SeqCst), 1);
    let mut stale = vec![5.0f32; frames * 2];
    assert!(hal.fire_io(11, &[input.as_slice()], &mut [stale.as_mut_slice()]));
    assert_eq!(client.calls.load(Ordering::SeqCst), 1);
    assert!(stale.iter().all(|&sample| sample == 0.0));

    // dropping the device tears the proc down entirely
    drop(device);
    let mut gone = vec![5.0f32; frames * 2];
    assert!(!hal.fire_io(11, &[input.as_slice()], &mut [gone.as_mut_slice()]));
}

#[test]
fn device_list_changes_fan_out_through_the_registry() {
    let hal = MockHal::new();
    hal.add_device(3, duplex("Duet"));
    let registry = DeviceRegistry::new(hal.clone());
    registry.scan_for_devices();
    let device = registry.create_device("Duet", "Duet").unwrap();
    device
        .open(
            ChannelMask::from_bits(0b11),
            ChannelMask::from_bits(0b11),
            48000.0,
            64,
        )
        .unwrap();

    let baseline = hal.property_reads(3);
    hal.notify_hardware(DeviceProperty::DeviceList);
    thread::sleep(Duration::from_millis(300));
    assert_eq!(hal.property_reads(3) - baseline, 1);

    // default-device moves are ignored by the adapter
    hal.notify_hardware(DeviceProperty::DefaultOutput);
    thread::sleep(Duration::from_millis(250));
    assert_eq!(hal.property_reads(3) - baseline, 1);
}

#[test]
fn latency_adds_two_buffers_of_correction() {
    let hal = MockHal::new();
    hal.add_device(6, duplex("Duet"));
    let registry = DeviceRegistry::new(hal);
    registry.scan_for_devices();
    let device = registry.create_device("Duet", "Duet").unwrap();
    device
        .open(
            ChannelMask::from_bits(0b11),
            ChannelMask::from_bits(0b11),
            48000.0,
            64,
        )
        .unwrap();

    assert_eq!(device.input_latency_samples(), 32 + 2 * 64);
    assert_eq!(device.output_latency_samples(), 48 + 2 * 64);
    assert_eq!(device.current_bit_depth(), 32);
    assert_eq!(device.default_buffer_size(), 512);
}

#[test]
fn data_source_selection_round_trips() {
    let hal = MockHal::new();
    hal.add_device(
        8,
        MockDevice {
            name: "Deck".into(),
            data_sources: vec![(10, "Internal Speakers".into()), (20, "Headphones".into())],
            current_source: Some(20),
            ..MockDevice::default()
        },
    );
    let registry = DeviceRegistry::new(hal);
    registry.scan_for_devices();
    let device = registry.create_device("Deck", "Deck").unwrap();
    let core = device.core();

    assert_eq!(
        core.sources(false),
        vec!["Internal Speakers".to_string(), "Headphones".to_string()]
    );
    assert_eq!(core.current_source_index(false), Some(1));
    core.set_current_source_index(0, false);
    assert_eq!(core.current_source_index(false), Some(0));
}

#[test]
fn related_devices_pair_by_complementary_direction() {
    let hal = MockHal::new();
    hal.add_device(
        1,
        MockDevice {
            name: "Mic".into(),
            input_streams: vec![2],
            output_streams: vec![],
            related: vec![0, 1, 3, 2],
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
            name: "Second Mic".into(),
            input_streams: vec![1],
            output_streams: vec![],
            ..MockDevice::default()
        },
    );

    let core = DeviceCore::new(hal.clone(), 1, false);
    // 0 and self are skipped, 3 faces the same direction, 2 qualifies
    assert_eq!(core.find_duplex_partner(), Some(2));

    let lonely = DeviceCore::new(hal, 3, false);
    assert_eq!(lonely.find_duplex_partner(), None);
}

#[test]
fn rejected_device_id_is_inert() {
    let hal = MockHal::new();
    let core = DeviceCore::new(hal, 123, false);
    assert_eq!(core.last_error(), "can't open device");
    assert_eq!(core.device_id(), 0);
    assert!(!core.start(None));
    let error = core
        .reopen(ChannelMask::empty(), ChannelMask::empty(), 44100.0, 512)
        .unwrap_err();
    assert_eq!(error, "can't open device");
    core.stop(false);
}
