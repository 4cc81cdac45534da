use crate::device::AudioDevice;

/// Contract between the adapter and the audio client.
///
/// The adapter guarantees that [`about_to_start`](Self::about_to_start) is
/// delivered before the first [`io_callback`](Self::io_callback) of a run,
/// that no `io_callback` is delivered after the device's `stop` has
/// returned, and that [`stopped`](Self::stopped) is delivered exactly once
/// for the last active client.
pub trait AudioIoCallback: Send + Sync {
    /// Called on the control thread, once, before callbacks begin.
    fn about_to_start(&self, device: &AudioDevice);

    /// Called on the OS I/O thread with one block of frames.
    ///
    /// `inputs` holds one deinterleaved f32 buffer per active input channel.
    /// The contents of `outputs` are undefined on entry; the client must
    /// write every frame of every channel, or zero what it does not use.
    /// Must not block or allocate.
    fn io_callback(&self, inputs: &[&[f32]], outputs: &mut [&mut [f32]], frames: usize);

    /// Called on the control thread after the device has stopped.
    fn stopped(&self);
}
