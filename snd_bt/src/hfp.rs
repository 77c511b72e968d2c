//! HFP's duplex socket device: one fd, read and write interleaved on the
//! same readiness callback. Unlike A2DP there is no separate input/output
//! transport — SCO gives a single full-duplex byte stream — so the two
//! directions are kept balanced here rather than scheduled independently.

use std::os::fd::{AsRawFd, OwnedFd};

use nix::errno::Errno;
use nix::sys::socket::{recv, send, MsgFlags};
use tracing::debug;

use snd_core::format::AudioFormat;
use snd_iodev::backend::{HwLevel, IoDevBackend, NegotiatedFormat};
use snd_iodev::error::{IoDevError, Result};

/// HFP's write quantum: 10ms, half of A2DP's, matching SCO's tighter
/// round-trip budget.
pub const HFP_WRITE_BLOCK_MS: u64 = 10;

pub struct HfpIoDev {
    socket: OwnedFd,
    format: Option<AudioFormat>,
    write_block_frames: usize,
    input_ring: Vec<u8>,
    output_ring: Vec<u8>,
    bytes_read: u64,
    bytes_written: u64,
    started: bool,
}

impl HfpIoDev {
    pub fn new(socket: OwnedFd) -> Self {
        Self {
            socket,
            format: None,
            write_block_frames: 0,
            input_ring: Vec::new(),
            output_ring: Vec::new(),
            bytes_read: 0,
            bytes_written: 0,
            started: false,
        }
    }

    fn frame_bytes(&self) -> usize {
        self.format.map(|f| f.frame_bytes()).unwrap_or(1)
    }

    pub fn started(&self) -> bool {
        self.started
    }

    /// One readiness-callback iteration: read what's available into the
    /// input ring, then write from the output ring, sized so the two
    /// counters stay roughly balanced. `POLLHUP` (an empty read with no
    /// error) clears `started` — the caller is expected to then drop the
    /// device's registered callback.
    pub fn service(&mut self) -> Result<()> {
        if !self.started {
            return Err(IoDevError::WrongState);
        }
        let block = self.write_block_frames * self.frame_bytes();

        match recv(self.socket.as_raw_fd(), &mut self.input_ring[..block.min(self.input_ring.len())], MsgFlags::MSG_DONTWAIT) {
            Ok(0) => {
                self.started = false;
                return Ok(());
            }
            Ok(n) => self.bytes_read += n as u64,
            Err(Errno::EAGAIN) => {}
            Err(_) => {
                self.started = false;
                return Err(IoDevError::Fatal);
            }
        }

        let catch_up = self.bytes_read.saturating_sub(self.bytes_written).min(block as u64) as usize;
        if catch_up > 0 {
            let chunk = &self.output_ring[..catch_up.min(self.output_ring.len())];
            match send(self.socket.as_raw_fd(), chunk, MsgFlags::MSG_DONTWAIT) {
                Ok(n) => self.bytes_written += n as u64,
                Err(Errno::EAGAIN) => {}
                Err(_) => {
                    self.started = false;
                    return Err(IoDevError::Fatal);
                }
            }
        }

        if self.bytes_read == self.bytes_written {
            debug!("hfp duplex counters reconverged, resetting offsets");
            self.bytes_read = 0;
            self.bytes_written = 0;
        }

        Ok(())
    }
}

impl IoDevBackend for HfpIoDev {
    fn configure(&mut self, requested: &AudioFormat) -> Result<NegotiatedFormat> {
        self.format = Some(*requested);
        self.write_block_frames = ((requested.frame_rate as u64 * HFP_WRITE_BLOCK_MS) / 1000) as usize;
        let block_bytes = self.write_block_frames * requested.frame_bytes();
        self.input_ring = vec![0u8; block_bytes * 4];
        self.output_ring = vec![0u8; block_bytes * 4];
        self.bytes_read = 0;
        self.bytes_written = 0;
        Ok(NegotiatedFormat {
            format: *requested,
            buffer_size: (self.write_block_frames * 2) as u32,
            min_buffer_level: self.write_block_frames as u32,
        })
    }

    fn close(&mut self) -> Result<()> {
        self.format = None;
        self.started = false;
        Ok(())
    }

    fn update_supported_formats(&mut self) -> Result<()> {
        Ok(())
    }

    fn get_buffer(&mut self, max_frames: usize) -> Result<(*mut u8, usize)> {
        if self.format.is_none() {
            return Err(IoDevError::WrongState);
        }
        let frame_bytes = self.frame_bytes();
        let cap = self.output_ring.len() / frame_bytes.max(1);
        Ok((self.output_ring.as_mut_ptr(), max_frames.min(cap)))
    }

    fn put_buffer(&mut self, _n: usize) -> Result<()> {
        Ok(())
    }

    fn flush_buffer(&mut self) -> Result<()> {
        self.bytes_read = 0;
        self.bytes_written = 0;
        Ok(())
    }

    fn frames_queued(&mut self) -> Result<HwLevel> {
        let pending = self.bytes_read.saturating_sub(self.bytes_written) / self.frame_bytes().max(1) as u64;
        Ok(HwLevel { frames: pending as u32, timestamp_micros: 0 })
    }

    fn delay_frames(&self) -> u32 {
        (self.bytes_read.saturating_sub(self.bytes_written) / self.frame_bytes().max(1) as u64) as u32
    }

    fn no_stream(&mut self, _enable: bool) -> Result<()> {
        Ok(())
    }

    fn output_underrun(&mut self) -> Result<()> {
        Ok(())
    }

    fn start(&mut self) -> Result<()> {
        self.started = true;
        Ok(())
    }

    fn frames_to_play_in_sleep(&self) -> u32 {
        self.write_block_frames as u32
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
    use std::io::Write;
    use std::os::unix::net::UnixStream;

    fn fmt() -> AudioFormat {
        AudioFormat::new(SampleFormat::S16Le, 8_000, ChannelLayout::mono(), 1).unwrap()
    }

    #[test]
    fn service_before_start_is_wrong_state() {
        let (a, _b) = UnixStream::pair().unwrap();
        a.set_nonblocking(true).unwrap();
        let mut dev = HfpIoDev::new(a.into());
        dev.configure(&fmt()).unwrap();
        assert_eq!(dev.service(), Err(IoDevError::WrongState));
    }

    #[test]
    fn peer_hangup_clears_started() {
        let (a, b) = UnixStream::pair().unwrap();
        a.set_nonblocking(true).unwrap();
        let mut dev = HfpIoDev::new(a.into());
        dev.configure(&fmt()).unwrap();
        dev.start().unwrap();
        drop(b);
        // A dropped peer on a unix socket pair reads as EOF (Ok(0)).
        dev.service().unwrap();
        assert!(!dev.started());
    }

    #[test]
    fn reading_data_advances_read_counter() {
        let (a, mut b) = UnixStream::pair().unwrap();
        a.set_nonblocking(true).unwrap();
        let mut dev = HfpIoDev::new(a.into());
        dev.configure(&fmt()).unwrap();
        dev.start().unwrap();
        b.write_all(&[0u8; 32]).unwrap();
        dev.service().unwrap();
        assert!(dev.bytes_read > 0);
    }
}
