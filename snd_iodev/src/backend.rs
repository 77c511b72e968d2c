//! `IoDevBackend`: the per-variant operation set an [`crate::iodev::IoDev`]
//! dispatches through. ALSA sink/source, the empty/silent device, and (in
//! `snd_bt`) the paced socket devices each implement a subset — operations
//! that don't apply to a variant (e.g. `set_volume` on a loopback device)
//! are no-ops rather than errors, matching a polymorphic C vtable where
//! unused slots point at stub functions.

use snd_core::format::AudioFormat;

use crate::error::Result;

/// A timestamped hardware frame count, as returned by `frames_queued`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HwLevel {
    pub frames: u32,
    pub timestamp_micros: u64,
}

pub trait IoDevBackend: Send {
    /// Negotiate `requested` against the device's supported formats and
    /// open it; `buffer_size`/`min_buffer_level` come from the result.
    fn configure(&mut self, requested: &AudioFormat) -> Result<NegotiatedFormat>;

    fn close(&mut self) -> Result<()>;

    /// Refresh the set of formats this device can negotiate (ALSA devices
    /// query hardware params; fixed-format devices are a no-op).
    fn update_supported_formats(&mut self) -> Result<()>;

    /// Returns up to `max_frames` writable frames and how many are
    /// actually available.
    fn get_buffer(&mut self, max_frames: usize) -> Result<(*mut u8, usize)>;

    /// Commits `n` frames written via the region from `get_buffer`.
    fn put_buffer(&mut self, n: usize) -> Result<()>;

    fn flush_buffer(&mut self) -> Result<()>;

    fn frames_queued(&mut self) -> Result<HwLevel>;

    /// Extra latency beyond the ring: socket depth, BT stack delay.
    fn delay_frames(&self) -> u32;

    /// `enable = true` on entering `NoStreamRun`: fill zeros up to
    /// `2 * min_buffer_level`. `enable = false` on leaving it.
    fn no_stream(&mut self, enable: bool) -> Result<()>;

    /// Called when a fetch+mix still left the device short of its next
    /// deadline. Default behavior (documented at each implementor) fills
    /// zeros up to `2 * min_buffer_level`.
    fn output_underrun(&mut self) -> Result<()>;

    fn start(&mut self) -> Result<()>;

    /// Frames until the device's next deadline, used to compute the audio
    /// thread's poll timeout. Paced devices (`snd_bt`) return a duration
    /// derived from wall-clock scheduling rather than hardware level.
    fn frames_to_play_in_sleep(&self) -> u32;

    /// `true` for devices that generate their own clock (paced sockets)
    /// rather than being driven by hardware interrupts.
    fn is_free_running(&self) -> bool;

    fn update_active_node(&mut self) -> Result<()>;

    fn set_volume(&mut self, scaler: f32);
}

#[derive(Debug, Clone, Copy)]
pub struct NegotiatedFormat {
    pub format: AudioFormat,
    pub buffer_size: u32,
    pub min_buffer_level: u32,
}
