//! The empty/silent device: a fallback sink that accepts and discards
//! writes, used by the main thread's removed-device callback to migrate
//! streams off a device that just went `DeviceFatal` without leaving the
//! client stalled. Also the basis for a loopback source, which instead of
//! discarding, makes the post-mix buffer its consumer reads from available.

use snd_core::format::AudioFormat;

use crate::backend::{HwLevel, IoDevBackend, NegotiatedFormat};
use crate::error::{IoDevError, Result};

pub struct SilentIoDev {
    format: Option<AudioFormat>,
    scratch: Vec<u8>,
    buffer_size: u32,
}

impl SilentIoDev {
    pub fn new() -> Self {
        Self { format: None, scratch: Vec::new(), buffer_size: 1024 }
    }
}

impl Default for SilentIoDev {
    fn default() -> Self {
        Self::new()
    }
}

impl IoDevBackend for SilentIoDev {
    fn configure(&mut self, requested: &AudioFormat) -> Result<NegotiatedFormat> {
        self.format = Some(*requested);
        self.scratch = vec![0u8; self.buffer_size as usize * requested.frame_bytes()];
        Ok(NegotiatedFormat { format: *requested, buffer_size: self.buffer_size, min_buffer_level: self.buffer_size / 4 })
    }

    fn close(&mut self) -> Result<()> {
        self.format = None;
        Ok(())
    }

    fn update_supported_formats(&mut self) -> Result<()> {
        Ok(())
    }

    fn get_buffer(&mut self, max_frames: usize) -> Result<(*mut u8, usize)> {
        let frame_bytes = self.format.ok_or(IoDevError::WrongState)?.frame_bytes();
        let cap_frames = self.scratch.len() / frame_bytes.max(1);
        Ok((self.scratch.as_mut_ptr(), max_frames.min(cap_frames)))
    }

    fn put_buffer(&mut self, _n: usize) -> Result<()> {
        Ok(())
    }

    fn flush_buffer(&mut self) -> Result<()> {
        Ok(())
    }

    fn frames_queued(&mut self) -> Result<HwLevel> {
        Ok(HwLevel { frames: 0, timestamp_micros: 0 })
    }

    fn delay_frames(&self) -> u32 {
        0
    }

    fn no_stream(&mut self, _enable: bool) -> Result<()> {
        Ok(())
    }

    fn output_underrun(&mut self) -> Result<()> {
        Ok(())
    }

    fn start(&mut self) -> Result<()> {
        Ok(())
    }

    fn frames_to_play_in_sleep(&self) -> u32 {
        self.buffer_size / 4
    }

    fn is_free_running(&self) -> bool {
        true
    }

    fn update_active_node(&mut self) -> Result<()> {
        Ok(())
    }

    fn set_volume(&mut self, _scaler: f32) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use snd_core::format::{ChannelLayout, SampleFormat};

    #[test]
    fn configure_then_get_buffer_never_errors() {
        let mut dev = SilentIoDev::new();
        let fmt = AudioFormat::new(SampleFormat::S16Le, 48_000, ChannelLayout::stereo(), 2).unwrap();
        dev.configure(&fmt).unwrap();
        let (_, n) = dev.get_buffer(256).unwrap();
        assert!(n > 0);
    }
}
