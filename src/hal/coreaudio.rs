#![cfg(target_os = "macos")]

//! [`AudioHal`] over the real CoreAudio HAL via `coreaudio-sys`.

use super::{
    AudioHal, DeviceId, DeviceProperty, IoHandler, IoProcToken, ObserverToken, PropertyObserver,
};
use crate::channels::MAX_CHANNELS;
use crate::error_fmt::{ca_error, ok};

use coreaudio_sys::{
    AudioBufferList, AudioDeviceCreateIOProcID, AudioDeviceDestroyIOProcID, AudioDeviceID,
    AudioDeviceIOProcID, AudioDeviceStart, AudioDeviceStop, AudioObjectAddPropertyListener,
    AudioObjectGetPropertyData, AudioObjectGetPropertyDataSize, AudioObjectID,
    AudioObjectPropertyAddress, AudioObjectRemovePropertyListener, AudioObjectSetPropertyData,
    AudioTimeStamp, AudioValueRange, AudioValueTranslation, CFRelease, CFStringGetCString,
    CFStringRef, OSStatus, UInt32, kAudioDevicePropertyBufferFrameSize,
    kAudioDevicePropertyBufferFrameSizeRange, kAudioDevicePropertyDataSource,
    kAudioDevicePropertyDataSourceNameForIDCFString, kAudioDevicePropertyDataSources,
    kAudioDevicePropertyDeviceIsAlive, kAudioDevicePropertyDeviceIsRunning,
    kAudioDevicePropertyDeviceNameCFString, kAudioDevicePropertyLatency,
    kAudioDevicePropertyMute, kAudioDevicePropertyNominalSampleRate,
    kAudioDevicePropertyPlayThru, kAudioDevicePropertyRelatedDevices,
    kAudioDevicePropertySafetyOffset, kAudioDevicePropertyStreamConfiguration,
    kAudioDevicePropertyStreamFormat, kAudioDevicePropertyStreams,
    kAudioDevicePropertyVolumeScalar, kAudioDevicePropertyAvailableNominalSampleRates,
    kAudioHardwareNoError, kAudioHardwarePropertyDefaultInputDevice,
    kAudioHardwarePropertyDefaultOutputDevice, kAudioHardwarePropertyDevices,
    kAudioObjectPropertyElementMain, kAudioObjectPropertyElementWildcard,
    kAudioObjectPropertyScopeGlobal, kAudioObjectPropertyScopeInput,
    kAudioObjectPropertyScopeOutput, kAudioObjectPropertyScopeWildcard,
    kAudioObjectPropertySelectorWildcard, kAudioObjectSystemObject, kAudioStreamPropertyLatency,
};

use std::collections::HashMap;
use std::mem;
use std::os::raw::c_void;
use std::ptr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

const NO_ERR: OSStatus = kAudioHardwareNoError as OSStatus;
const UTF8_ENCODING: u32 = 0x0800_0100;

fn address(selector: u32, scope: u32) -> AudioObjectPropertyAddress {
    AudioObjectPropertyAddress {
        mSelector: selector,
        mScope: scope,
        mElement: kAudioObjectPropertyElementMain,
    }
}

fn scope_for(input: bool) -> u32 {
    if input {
        kAudioObjectPropertyScopeInput
    } else {
        kAudioObjectPropertyScopeOutput
    }
}

fn get_data<T>(object: AudioObjectID, addr: &AudioObjectPropertyAddress) -> Result<T, OSStatus> {
    let mut value = mem::MaybeUninit::<T>::zeroed();
    let mut size = mem::size_of::<T>() as UInt32;
    let status = unsafe {
        AudioObjectGetPropertyData(
            object,
            addr,
            0,
            ptr::null(),
            &mut size,
            value.as_mut_ptr() as *mut c_void,
        )
    };
    if status == NO_ERR {
        Ok(unsafe { value.assume_init() })
    } else {
        Err(status)
    }
}

fn get_list<T>(
    object: AudioObjectID,
    addr: &AudioObjectPropertyAddress,
) -> Result<Vec<T>, OSStatus> {
    let mut size: UInt32 = 0;
    let status =
        unsafe { AudioObjectGetPropertyDataSize(object, addr, 0, ptr::null(), &mut size) };
    if status != NO_ERR {
        return Err(status);
    }
    let count = size as usize / mem::size_of::<T>();
    if count == 0 {
        return Ok(Vec::new());
    }
    let mut items: Vec<T> = Vec::with_capacity(count);
    let status = unsafe {
        AudioObjectGetPropertyData(
            object,
            addr,
            0,
            ptr::null(),
            &mut size,
            items.as_mut_ptr() as *mut c_void,
        )
    };
    if status != NO_ERR {
        return Err(status);
    }
    unsafe { items.set_len(size as usize / mem::size_of::<T>()) };
    Ok(items)
}

fn set_data<T>(object: AudioObjectID, addr: &AudioObjectPropertyAddress, value: &T) -> OSStatus {
    unsafe {
        AudioObjectSetPropertyData(
            object,
            addr,
            0,
            ptr::null(),
            mem::size_of::<T>() as UInt32,
            value as *const T as *const c_void,
        )
    }
}

/// Converts and releases a CFString obtained from a property read.
fn cfstring_to_string(cf_string: CFStringRef) -> Option<String> {
    if cf_string.is_null() {
        return None;
    }
    let mut buf = [0i8; 256];
    let converted =
        unsafe { CFStringGetCString(cf_string, buf.as_mut_ptr(), buf.len() as _, UTF8_ENCODING) };
    unsafe { CFRelease(cf_string as *const c_void) };
    if converted == 0 {
        return None;
    }
    let c_str = unsafe { std::ffi::CStr::from_ptr(buf.as_ptr()) };
    c_str.to_str().ok().map(str::to_owned)
}

fn map_selector(selector: u32) -> Option<DeviceProperty> {
    match selector {
        kAudioDevicePropertyNominalSampleRate => Some(DeviceProperty::NominalSampleRate),
        kAudioDevicePropertyBufferFrameSize => Some(DeviceProperty::BufferFrameSize),
        kAudioDevicePropertyStreamFormat => Some(DeviceProperty::StreamFormat),
        kAudioDevicePropertyDeviceIsAlive => Some(DeviceProperty::DeviceIsAlive),
        kAudioDevicePropertyDeviceIsRunning => Some(DeviceProperty::DeviceIsRunning),
        kAudioDevicePropertyDataSource => Some(DeviceProperty::DataSource),
        kAudioDevicePropertyVolumeScalar => Some(DeviceProperty::Volume),
        kAudioDevicePropertyMute => Some(DeviceProperty::Mute),
        kAudioDevicePropertyPlayThru => Some(DeviceProperty::PlayThrough),
        kAudioHardwarePropertyDevices => Some(DeviceProperty::DeviceList),
        kAudioHardwarePropertyDefaultInputDevice => Some(DeviceProperty::DefaultInput),
        kAudioHardwarePropertyDefaultOutputDevice => Some(DeviceProperty::DefaultOutput),
        _ => None,
    }
}

const WILDCARD_ADDRESS: AudioObjectPropertyAddress = AudioObjectPropertyAddress {
    mSelector: kAudioObjectPropertySelectorWildcard,
    mScope: kAudioObjectPropertyScopeWildcard,
    mElement: kAudioObjectPropertyElementWildcard,
};

struct IoProcCtx {
    handler: Arc<dyn IoHandler>,
}

unsafe extern "C" fn io_proc(
    _device: AudioDeviceID,
    _now: *const AudioTimeStamp,
    input_data: *const AudioBufferList,
    _input_time: *const AudioTimeStamp,
    output_data: *mut AudioBufferList,
    _output_time: *const AudioTimeStamp,
    client_data: *mut c_void,
) -> OSStatus {
    let ctx = &*(client_data as *const IoProcCtx);

    // Fixed-capacity stream views; nothing here allocates.
    let mut inputs: [&[f32]; MAX_CHANNELS] = [&[]; MAX_CHANNELS];
    let mut num_inputs = 0usize;
    if !input_data.is_null() {
        let abl = &*input_data;
        let buffers =
            std::slice::from_raw_parts(abl.mBuffers.as_ptr(), abl.mNumberBuffers as usize);
        for buf in buffers.iter().take(MAX_CHANNELS) {
            let samples = buf.mDataByteSize as usize / mem::size_of::<f32>();
            inputs[num_inputs] = if buf.mData.is_null() || samples == 0 {
                &[]
            } else {
                std::slice::from_raw_parts(buf.mData as *const f32, samples)
            };
            num_inputs += 1;
        }
    }

    let mut outputs: [&mut [f32]; MAX_CHANNELS] = core::array::from_fn(|_| Default::default());
    let mut num_outputs = 0usize;
    if !output_data.is_null() {
        let abl = &mut *output_data;
        let buffers =
            std::slice::from_raw_parts_mut(abl.mBuffers.as_mut_ptr(), abl.mNumberBuffers as usize);
        for buf in buffers.iter_mut().take(MAX_CHANNELS) {
            let samples = buf.mDataByteSize as usize / mem::size_of::<f32>();
            outputs[num_outputs] = if buf.mData.is_null() || samples == 0 {
                Default::default()
            } else {
                std::slice::from_raw_parts_mut(buf.mData as *mut f32, samples)
            };
            num_outputs += 1;
        }
    }

    ctx.handler
        .process(&inputs[..num_inputs], &mut outputs[..num_outputs]);
    NO_ERR
}

struct ObserverCtx {
    observer: Arc<dyn PropertyObserver>,
}

unsafe extern "C" fn property_listener(
    object: AudioObjectID,
    count: UInt32,
    addresses: *const AudioObjectPropertyAddress,
    client_data: *mut c_void,
) -> OSStatus {
    let ctx = &*(client_data as *const ObserverCtx);
    let addresses = std::slice::from_raw_parts(addresses, count as usize);
    for addr in addresses {
        if let Some(property) = map_selector(addr.mSelector) {
            ctx.observer.property_changed(object, property);
        }
    }
    NO_ERR
}

struct ProcEntry {
    proc_id: AudioDeviceIOProcID,
    ctx: *mut IoProcCtx,
}

struct ObserverEntry {
    object: AudioObjectID,
    ctx: *mut ObserverCtx,
}

/// The real HAL. Installed procs and listeners are tracked so removal can
/// hand the OS back the exact context pointer it was registered with, and
/// free it strictly after deregistration.
pub struct CoreAudioHal {
    procs: Mutex<HashMap<u64, ProcEntry>>,
    observers: Mutex<HashMap<u64, ObserverEntry>>,
    next_token: AtomicU64,
}

// Raw context pointers are owned boxes touched only under the maps' locks.
unsafe impl Send for CoreAudioHal {}
unsafe impl Sync for CoreAudioHal {}

impl CoreAudioHal {
    pub fn new() -> Self {
        Self {
            procs: Mutex::new(HashMap::new()),
            observers: Mutex::new(HashMap::new()),
            next_token: AtomicU64::new(1),
        }
    }

    fn token(&self) -> u64 {
        self.next_token.fetch_add(1, Ordering::Relaxed)
    }

    fn add_observer(
        &self,
        object: AudioObjectID,
        observer: Arc<dyn PropertyObserver>,
    ) -> ObserverToken {
        let ctx = Box::into_raw(Box::new(ObserverCtx { observer }));
        let status = unsafe {
            AudioObjectAddPropertyListener(
                object,
                &WILDCARD_ADDRESS,
                Some(property_listener),
                ctx as *mut c_void,
            )
        };
        if !ok("add property listener", status) {
            drop(unsafe { Box::from_raw(ctx) });
            return ObserverToken(0);
        }
        let token = self.token();
        self.observers
            .lock()
            .expect("observer map poisoned")
            .insert(token, ObserverEntry { object, ctx });
        ObserverToken(token)
    }

    fn remove_observer(&self, token: ObserverToken) {
        let entry = self
            .observers
            .lock()
            .expect("observer map poisoned")
            .remove(&token.0);
        if let Some(entry) = entry {
            let status = unsafe {
                AudioObjectRemovePropertyListener(
                    entry.object,
                    &WILDCARD_ADDRESS,
                    Some(property_listener),
                    entry.ctx as *mut c_void,
                )
            };
            ok("remove property listener", status);
            drop(unsafe { Box::from_raw(entry.ctx) });
        }
    }
}

impl Default for CoreAudioHal {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioHal for CoreAudioHal {
    fn device_ids(&self) -> Vec<DeviceId> {
        let addr = address(kAudioHardwarePropertyDevices, kAudioObjectPropertyScopeGlobal);
        match get_list::<AudioDeviceID>(kAudioObjectSystemObject, &addr) {
            Ok(ids) => ids,
            Err(status) => {
                ok("read device list", status);
                Vec::new()
            }
        }
    }

    fn device_name(&self, device: DeviceId) -> Option<String> {
        if device == 0 {
            return None;
        }
        let addr = address(
            kAudioDevicePropertyDeviceNameCFString,
            kAudioObjectPropertyScopeGlobal,
        );
        get_data::<CFStringRef>(device, &addr)
            .ok()
            .and_then(cfstring_to_string)
    }

    fn default_device(&self, input: bool) -> Option<DeviceId> {
        let selector = if input {
            kAudioHardwarePropertyDefaultInputDevice
        } else {
            kAudioHardwarePropertyDefaultOutputDevice
        };
        let addr = address(selector, kAudioObjectPropertyScopeGlobal);
        match get_data::<AudioDeviceID>(kAudioObjectSystemObject, &addr) {
            Ok(0) | Err(_) => None,
            Ok(id) => Some(id),
        }
    }

    fn stream_layout(&self, device: DeviceId, input: bool) -> Vec<u32> {
        let addr = address(kAudioDevicePropertyStreamConfiguration, scope_for(input));
        let mut size: UInt32 = 0;
        let status =
            unsafe { AudioObjectGetPropertyDataSize(device, &addr, 0, ptr::null(), &mut size) };
        if status != NO_ERR || size == 0 {
            return Vec::new();
        }
        let mut buf = vec![0u8; size as usize];
        let status = unsafe {
            AudioObjectGetPropertyData(
                device,
                &addr,
                0,
                ptr::null(),
                &mut size,
                buf.as_mut_ptr() as *mut c_void,
            )
        };
        if !ok("read stream configuration", status) {
            return Vec::new();
        }
        let list = buf.as_ptr() as *const AudioBufferList;
        let count = unsafe { (*list).mNumberBuffers } as usize;
        let buffers = unsafe { std::slice::from_raw_parts((*list).mBuffers.as_ptr(), count) };
        buffers.iter().map(|b| b.mNumberChannels).collect()
    }

    fn nominal_sample_rate(&self, device: DeviceId) -> Result<f64, String> {
        let addr = address(
            kAudioDevicePropertyNominalSampleRate,
            kAudioObjectPropertyScopeGlobal,
        );
        get_data::<f64>(device, &addr).map_err(|status| ca_error("get sample rate", status))
    }

    fn set_nominal_sample_rate(
        &self,
        device: DeviceId,
        input: bool,
        rate: f64,
    ) -> Result<(), String> {
        let addr = address(kAudioDevicePropertyNominalSampleRate, scope_for(input));
        let status = set_data(device, &addr, &rate);
        if status == NO_ERR {
            Ok(())
        } else {
            Err(ca_error("set sample rate", status))
        }
    }

    fn sample_rate_ranges(&self, device: DeviceId) -> Vec<(f64, f64)> {
        let addr = address(
            kAudioDevicePropertyAvailableNominalSampleRates,
            kAudioObjectPropertyScopeGlobal,
        );
        match get_list::<AudioValueRange>(device, &addr) {
            Ok(ranges) => ranges.iter().map(|r| (r.mMinimum, r.mMaximum)).collect(),
            Err(status) => {
                ok("read sample rate ranges", status);
                Vec::new()
            }
        }
    }

    fn buffer_frame_size(&self, device: DeviceId) -> Result<u32, String> {
        let addr = address(
            kAudioDevicePropertyBufferFrameSize,
            kAudioObjectPropertyScopeGlobal,
        );
        get_data::<UInt32>(device, &addr).map_err(|status| ca_error("get buffer size", status))
    }

    fn set_buffer_frame_size(
        &self,
        device: DeviceId,
        input: bool,
        frames: u32,
    ) -> Result<(), String> {
        let addr = address(kAudioDevicePropertyBufferFrameSize, scope_for(input));
        let status = set_data(device, &addr, &frames);
        if status == NO_ERR {
            Ok(())
        } else {
            Err(ca_error("set buffer size", status))
        }
    }

    fn buffer_frame_size_ranges(&self, device: DeviceId) -> Vec<(f64, f64)> {
        let addr = address(
            kAudioDevicePropertyBufferFrameSizeRange,
            kAudioObjectPropertyScopeGlobal,
        );
        match get_list::<AudioValueRange>(device, &addr) {
            Ok(ranges) => ranges.iter().map(|r| (r.mMinimum, r.mMaximum)).collect(),
            Err(status) => {
                ok("read buffer size ranges", status);
                Vec::new()
            }
        }
    }

    fn device_latency(&self, device: DeviceId, input: bool) -> u32 {
        let scope = scope_for(input);
        let device_latency =
            get_data::<UInt32>(device, &address(kAudioDevicePropertyLatency, scope)).unwrap_or(0);
        let safety_offset =
            get_data::<UInt32>(device, &address(kAudioDevicePropertySafetyOffset, scope))
                .unwrap_or(0);
        let stream_latency = get_list::<u32>(device, &address(kAudioDevicePropertyStreams, scope))
            .ok()
            .and_then(|streams| streams.first().copied())
            .and_then(|stream| {
                get_data::<UInt32>(stream, &address(kAudioStreamPropertyLatency, scope)).ok()
            })
            .unwrap_or(0);
        device_latency + safety_offset + stream_latency
    }

    fn data_sources(&self, device: DeviceId, input: bool) -> Vec<u32> {
        let addr = address(kAudioDevicePropertyDataSources, scope_for(input));
        get_list::<u32>(device, &addr).unwrap_or_default()
    }

    fn data_source_name(&self, device: DeviceId, input: bool, source: u32) -> Option<String> {
        let addr = address(
            kAudioDevicePropertyDataSourceNameForIDCFString,
            scope_for(input),
        );
        let mut source_id: u32 = source;
        let mut name: CFStringRef = ptr::null();
        let mut translation = AudioValueTranslation {
            mInputData: &mut source_id as *mut u32 as *mut c_void,
            mInputDataSize: mem::size_of::<u32>() as UInt32,
            mOutputData: &mut name as *mut CFStringRef as *mut c_void,
            mOutputDataSize: mem::size_of::<CFStringRef>() as UInt32,
        };
        let mut size = mem::size_of::<AudioValueTranslation>() as UInt32;
        let status = unsafe {
            AudioObjectGetPropertyData(
                device,
                &addr,
                0,
                ptr::null(),
                &mut size,
                &mut translation as *mut AudioValueTranslation as *mut c_void,
            )
        };
        if status != NO_ERR {
            return None;
        }
        cfstring_to_string(name)
    }

    fn current_data_source(&self, device: DeviceId, input: bool) -> Option<u32> {
        let addr = address(kAudioDevicePropertyDataSource, scope_for(input));
        get_data::<u32>(device, &addr).ok()
    }

    fn set_current_data_source(
        &self,
        device: DeviceId,
        input: bool,
        source: u32,
    ) -> Result<(), String> {
        let addr = address(kAudioDevicePropertyDataSource, scope_for(input));
        let status = set_data(device, &addr, &source);
        if status == NO_ERR {
            Ok(())
        } else {
            Err(ca_error("set data source", status))
        }
    }

    fn related_devices(&self, device: DeviceId) -> Vec<DeviceId> {
        let addr = address(
            kAudioDevicePropertyRelatedDevices,
            kAudioObjectPropertyScopeGlobal,
        );
        get_list::<AudioDeviceID>(device, &addr).unwrap_or_default()
    }

    fn is_running(&self, device: DeviceId) -> bool {
        let addr = address(
            kAudioDevicePropertyDeviceIsRunning,
            kAudioObjectPropertyScopeGlobal,
        );
        get_data::<UInt32>(device, &addr).map_or(false, |running| running != 0)
    }

    fn install_io_proc(
        &self,
        device: DeviceId,
        handler: Arc<dyn IoHandler>,
    ) -> Result<IoProcToken, String> {
        let ctx = Box::into_raw(Box::new(IoProcCtx { handler }));
        let mut proc_id: AudioDeviceIOProcID = None;
        let status = unsafe {
            AudioDeviceCreateIOProcID(device, Some(io_proc), ctx as *mut c_void, &mut proc_id)
        };
        if status != NO_ERR {
            drop(unsafe { Box::from_raw(ctx) });
            return Err(ca_error("install io proc", status));
        }
        let token = self.token();
        self.procs
            .lock()
            .expect("proc map poisoned")
            .insert(token, ProcEntry { proc_id, ctx });
        Ok(IoProcToken(token))
    }

    fn start_io_proc(&self, device: DeviceId, token: IoProcToken) -> Result<(), String> {
        let proc_id = self
            .procs
            .lock()
            .expect("proc map poisoned")
            .get(&token.0)
            .map(|entry| entry.proc_id)
            .ok_or_else(|| "unknown io proc".to_string())?;
        let status = unsafe { AudioDeviceStart(device, proc_id) };
        if status == NO_ERR {
            Ok(())
        } else {
            Err(ca_error("start device", status))
        }
    }

    fn stop_io_proc(&self, device: DeviceId, token: IoProcToken) -> Result<(), String> {
        let proc_id = self
            .procs
            .lock()
            .expect("proc map poisoned")
            .get(&token.0)
            .map(|entry| entry.proc_id)
            .ok_or_else(|| "unknown io proc".to_string())?;
        let status = unsafe { AudioDeviceStop(device, proc_id) };
        if status == NO_ERR {
            Ok(())
        } else {
            Err(ca_error("stop device", status))
        }
    }

    fn remove_io_proc(&self, device: DeviceId, token: IoProcToken) {
        let entry = self
            .procs
            .lock()
            .expect("proc map poisoned")
            .remove(&token.0);
        if let Some(entry) = entry {
            let status = unsafe { AudioDeviceDestroyIOProcID(device, entry.proc_id) };
            ok("destroy io proc", status);
            drop(unsafe { Box::from_raw(entry.ctx) });
        }
    }

    fn add_device_observer(
        &self,
        device: DeviceId,
        observer: Arc<dyn PropertyObserver>,
    ) -> ObserverToken {
        self.add_observer(device, observer)
    }

    fn remove_device_observer(&self, _device: DeviceId, token: ObserverToken) {
        self.remove_observer(token);
    }

    fn add_hardware_observer(&self, observer: Arc<dyn PropertyObserver>) -> ObserverToken {
        self.add_observer(kAudioObjectSystemObject, observer)
    }

    fn remove_hardware_observer(&self, token: ObserverToken) {
        self.remove_observer(token);
    }
}
