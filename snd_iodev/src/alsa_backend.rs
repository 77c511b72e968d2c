//! ALSA sink/source backend, grounded on the `alsa` crate's high-level
//! `PCM`/`HwParams` API.

use alsa::pcm::{Access, Format as AlsaFormat, HwParams, PCM};
use alsa::{Direction, ValueOr};
use snd_core::format::{AudioFormat, SampleFormat};

use crate::backend::{HwLevel, IoDevBackend, NegotiatedFormat};
use crate::error::{IoDevError, Result};

pub struct AlsaIoDev {
    device_name: String,
    direction: Direction,
    pcm: Option<PCM>,
    buffer_size: u32,
    min_buffer_level: u32,
    format: Option<AudioFormat>,
    /// Holds one period's worth of interleaved bytes: the region `get_buffer`
    /// hands to the caller to fill (playback) or that a capture `readi` has
    /// just filled, in the wire byte layout `snd_shm`/`snd_thread` use
    /// everywhere else.
    scratch: Vec<u8>,
}

impl AlsaIoDev {
    pub fn new_sink(device_name: impl Into<String>) -> Self {
        Self {
            device_name: device_name.into(),
            direction: Direction::Playback,
            pcm: None,
            buffer_size: 0,
            min_buffer_level: 0,
            format: None,
            scratch: Vec::new(),
        }
    }

    pub fn new_source(device_name: impl Into<String>) -> Self {
        Self {
            device_name: device_name.into(),
            direction: Direction::Capture,
            pcm: None,
            buffer_size: 0,
            min_buffer_level: 0,
            format: None,
            scratch: Vec::new(),
        }
    }

    fn pcm(&self) -> Result<&PCM> {
        self.pcm.as_ref().ok_or(IoDevError::WrongState)
    }
}

fn alsa_format(sf: SampleFormat) -> AlsaFormat {
    match sf {
        SampleFormat::U8 => AlsaFormat::U8,
        SampleFormat::S16Le => AlsaFormat::s16(),
        SampleFormat::S24Le => AlsaFormat::s24(),
        SampleFormat::S32Le => AlsaFormat::s32(),
    }
}

/// Writes `bytes` (an exact multiple of `format`'s frame size) to `pcm` via
/// the typed `writei` entry point matching `format`, returning the number
/// of frames actually written.
fn write_frames(pcm: &PCM, format: SampleFormat, bytes: &[u8]) -> Result<usize> {
    match format {
        SampleFormat::U8 => pcm.io_u8().and_then(|io| io.writei(bytes)).map_err(|_| IoDevError::Transient),
        SampleFormat::S16Le => {
            let samples: Vec<i16> = bytes.chunks_exact(2).map(|c| i16::from_le_bytes([c[0], c[1]])).collect();
            pcm.io_i16().and_then(|io| io.writei(&samples)).map_err(|_| IoDevError::Transient)
        }
        SampleFormat::S24Le => {
            // Packed 3-byte samples, sign-extended into the 32-bit
            // container `io_i32` expects (same bit trick as
            // `snd_thread::sampleconv::bytes_to_f32`).
            let samples: Vec<i32> = bytes.chunks_exact(3).map(|c| i32::from_le_bytes([c[0], c[1], c[2], 0]) << 8 >> 8).collect();
            pcm.io_i32().and_then(|io| io.writei(&samples)).map_err(|_| IoDevError::Transient)
        }
        SampleFormat::S32Le => {
            let samples: Vec<i32> = bytes.chunks_exact(4).map(|c| i32::from_le_bytes([c[0], c[1], c[2], c[3]])).collect();
            pcm.io_i32().and_then(|io| io.writei(&samples)).map_err(|_| IoDevError::Transient)
        }
    }
}

/// Reads into `bytes` (an exact multiple of `format`'s frame size) from
/// `pcm` via the typed `readi` entry point matching `format`, returning the
/// number of frames actually read.
fn read_frames(pcm: &PCM, format: SampleFormat, bytes: &mut [u8]) -> Result<usize> {
    match format {
        SampleFormat::U8 => pcm.io_u8().and_then(|io| io.readi(bytes)).map_err(|_| IoDevError::Transient),
        SampleFormat::S16Le => {
            let mut samples = vec![0i16; bytes.len() / 2];
            let n = pcm.io_i16().and_then(|io| io.readi(&mut samples)).map_err(|_| IoDevError::Transient)?;
            for (chunk, s) in bytes.chunks_exact_mut(2).zip(&samples) {
                chunk.copy_from_slice(&s.to_le_bytes());
            }
            Ok(n)
        }
        SampleFormat::S24Le => {
            let mut samples = vec![0i32; bytes.len() / 3];
            let n = pcm.io_i32().and_then(|io| io.readi(&mut samples)).map_err(|_| IoDevError::Transient)?;
            for (chunk, s) in bytes.chunks_exact_mut(3).zip(&samples) {
                chunk.copy_from_slice(&s.to_le_bytes()[..3]);
            }
            Ok(n)
        }
        SampleFormat::S32Le => {
            let mut samples = vec![0i32; bytes.len() / 4];
            let n = pcm.io_i32().and_then(|io| io.readi(&mut samples)).map_err(|_| IoDevError::Transient)?;
            for (chunk, s) in bytes.chunks_exact_mut(4).zip(&samples) {
                chunk.copy_from_slice(&s.to_le_bytes());
            }
            Ok(n)
        }
    }
}

impl IoDevBackend for AlsaIoDev {
    fn configure(&mut self, requested: &AudioFormat) -> Result<NegotiatedFormat> {
        let pcm = PCM::new(&self.device_name, self.direction, false).map_err(|_| IoDevError::Fatal)?;
        {
            let hwp = HwParams::any(&pcm).map_err(|_| IoDevError::Fatal)?;
            hwp.set_channels(requested.num_channels as u32).map_err(|_| IoDevError::UnsupportedFormat)?;
            hwp.set_rate(requested.frame_rate, ValueOr::Nearest).map_err(|_| IoDevError::UnsupportedFormat)?;
            hwp.set_format(alsa_format(requested.sample_format)).map_err(|_| IoDevError::UnsupportedFormat)?;
            hwp.set_access(Access::RWInterleaved).map_err(|_| IoDevError::UnsupportedFormat)?;
            pcm.hw_params(&hwp).map_err(|_| IoDevError::Fatal)?;
        }
        let hwp = pcm.hw_params_current().map_err(|_| IoDevError::Fatal)?;
        let buffer_size = hwp.get_buffer_size().map_err(|_| IoDevError::Fatal)? as u32;
        let min_buffer_level = buffer_size / 4;
        self.buffer_size = buffer_size;
        self.min_buffer_level = min_buffer_level;
        self.format = Some(*requested);
        self.scratch = vec![0u8; buffer_size as usize * requested.frame_bytes()];
        self.pcm = Some(pcm);
        Ok(NegotiatedFormat { format: *requested, buffer_size, min_buffer_level })
    }

    fn close(&mut self) -> Result<()> {
        self.pcm = None;
        self.format = None;
        self.scratch.clear();
        Ok(())
    }

    fn update_supported_formats(&mut self) -> Result<()> {
        Ok(())
    }

    /// Playback: hands back a scratch region for the caller to fill, sized
    /// to at most one period; the actual `writei` happens in `put_buffer`.
    /// Capture: performs the `readi` now and hands back the region it just
    /// filled, since `IoDevBackend` only has one get/put pair to serve both
    /// directions.
    fn get_buffer(&mut self, max_frames: usize) -> Result<(*mut u8, usize)> {
        let format = self.format.ok_or(IoDevError::WrongState)?;
        let frame_bytes = format.frame_bytes();
        let cap_frames = max_frames.min(self.buffer_size as usize).min(self.scratch.len() / frame_bytes.max(1));
        if cap_frames == 0 {
            return Ok((self.scratch.as_mut_ptr(), 0));
        }
        if self.direction == Direction::Capture {
            let pcm = self.pcm.as_ref().ok_or(IoDevError::WrongState)?;
            let end = cap_frames * frame_bytes;
            let n = read_frames(pcm, format.sample_format, &mut self.scratch[..end])?;
            return Ok((self.scratch.as_mut_ptr(), n));
        }
        Ok((self.scratch.as_mut_ptr(), cap_frames))
    }

    /// Playback: writes the `n` frames the caller just filled via
    /// `writei`. Capture: a no-op, since `readi` already dequeued those
    /// frames from the device in `get_buffer`.
    fn put_buffer(&mut self, n: usize) -> Result<()> {
        if n == 0 || self.direction == Direction::Capture {
            return Ok(());
        }
        let format = self.format.ok_or(IoDevError::WrongState)?;
        let frame_bytes = format.frame_bytes();
        let end = n * frame_bytes;
        let pcm = self.pcm.as_ref().ok_or(IoDevError::WrongState)?;
        write_frames(pcm, format.sample_format, &self.scratch[..end]).map(|_| ())
    }

    fn flush_buffer(&mut self) -> Result<()> {
        self.pcm()?.drop().map_err(|_| IoDevError::Transient)
    }

    fn frames_queued(&mut self) -> Result<HwLevel> {
        let pcm = self.pcm()?;
        let avail = pcm.avail_update().map_err(|_| IoDevError::Transient)?;
        let queued = self.buffer_size.saturating_sub(avail.max(0) as u32);
        Ok(HwLevel { frames: queued, timestamp_micros: 0 })
    }

    fn delay_frames(&self) -> u32 {
        0
    }

    fn no_stream(&mut self, _enable: bool) -> Result<()> {
        Ok(())
    }

    fn output_underrun(&mut self) -> Result<()> {
        if let Some(pcm) = &self.pcm {
            let _ = pcm.prepare();
        }
        Ok(())
    }

    fn start(&mut self) -> Result<()> {
        self.pcm()?.start().map_err(|_| IoDevError::Transient)
    }

    fn frames_to_play_in_sleep(&self) -> u32 {
        self.min_buffer_level
    }

    fn is_free_running(&self) -> bool {
        false
    }

    fn update_active_node(&mut self) -> Result<()> {
        Ok(())
    }

    fn set_volume(&mut self, _scaler: f32) {}
}
