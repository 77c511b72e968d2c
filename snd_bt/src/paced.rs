//! A2DP-style unidirectional paced socket device.
//!
//! Unlike ALSA, a Bluetooth transport socket has no hardware interrupt to
//! drive it: `configure` picks a `write_block` (one scheduling quantum,
//! in frames) and from then on writes are paced by wall-clock deadlines
//! rather than by device readiness. `write_block` is 20ms of audio for
//! A2DP — the original's `PCM_BLOCK_MS` constant for the A2DP sink — vs.
//! 10ms for the duplex HFP link in [`crate::hfp`].

use std::os::fd::{AsRawFd, OwnedFd};
use std::time::{Duration, Instant};

use nix::errno::Errno;
use nix::sys::socket::{send, MsgFlags};
use tracing::{debug, warn};

use snd_core::format::AudioFormat;
use snd_iodev::backend::{HwLevel, IoDevBackend, NegotiatedFormat};
use snd_iodev::error::{IoDevError, Result};

use crate::suspend::{SuspendReason, SuspendSupervisor};

/// A2DP's write quantum. The original sink paces writes at this grain.
pub const A2DP_WRITE_BLOCK_MS: u64 = 20;

/// How long a persistent `EAGAIN` streak is tolerated before a suspend is
/// requested — mirrors the "throttle for longer than 5s" rule.
const EAGAIN_SUSPEND_AFTER: Duration = Duration::from_secs(5);

/// Logging thresholds for a missed deadline.
const THROTTLE_WARN_AFTER: Duration = Duration::from_millis(10);
const THROTTLE_SEVERE_AFTER: Duration = Duration::from_secs(2);

/// One `tick()` call's outcome, surfaced so a caller can drive a poll
/// timeout or wake callback without re-deriving internal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Not yet at the next deadline; nothing sent.
    NotDue,
    /// Wrote `n` bytes to the socket.
    Wrote(usize),
    /// `EAGAIN`: caller should arm a writable-readiness callback.
    WouldBlock,
    /// A suspend request is now pending; caller should tear the link down.
    SuspendRequested,
}

pub struct PacedSocketIoDev {
    socket: OwnedFd,
    format: Option<AudioFormat>,
    write_block_ms: u64,
    write_block_frames: usize,
    ring: Vec<u8>,
    read_pos: usize,
    write_pos: usize,
    next_flush_time: Option<Instant>,
    eagain_since: Option<Instant>,
    total_written_bytes: u64,
    last_write_ts: Option<Instant>,
    suspend: SuspendSupervisor,
}

impl PacedSocketIoDev {
    pub fn new(socket: OwnedFd) -> Self {
        Self::with_write_block_ms(socket, A2DP_WRITE_BLOCK_MS)
    }

    pub fn with_write_block_ms(socket: OwnedFd, write_block_ms: u64) -> Self {
        Self {
            socket,
            format: None,
            write_block_ms,
            write_block_frames: 0,
            ring: Vec::new(),
            read_pos: 0,
            write_pos: 0,
            next_flush_time: None,
            eagain_since: None,
            total_written_bytes: 0,
            last_write_ts: None,
            suspend: SuspendSupervisor::new(),
        }
    }

    pub fn suspend_mut(&mut self) -> &mut SuspendSupervisor {
        &mut self.suspend
    }

    fn frame_bytes(&self) -> usize {
        self.format.map(|f| f.frame_bytes()).unwrap_or(1)
    }

    fn flush_period(&self) -> Duration {
        Duration::from_millis(self.write_block_ms)
    }

    fn available(&self) -> usize {
        self.write_pos - self.read_pos
    }

    /// Bluetooth stack round-trip delay estimate, per §4.5: remote buffer
    /// depth plus what we haven't flushed yet, projected against the last
    /// observed `data_position_ts`. Falls back to a fixed 200ms guess when
    /// the peer hasn't reported a timestamp yet.
    pub fn bt_stack_delay_frames(&self, remote_frames: u32, data_position_ts: Option<Instant>, rate: u32) -> u32 {
        let local_frames_in_flight = (self.available() / self.frame_bytes().max(1)) as u32;
        let Some(ts) = data_position_ts else {
            return (0.2 * rate as f64) as u32;
        };
        let Some(last_write) = self.last_write_ts else {
            return remote_frames + local_frames_in_flight;
        };
        let elapsed = last_write.saturating_duration_since(ts);
        let elapsed_frames = (elapsed.as_secs_f64() * rate as f64) as u32;
        remote_frames + local_frames_in_flight + elapsed_frames
    }

    /// One scheduling iteration: called once per audio-thread wake. Drives
    /// the write-pacing state machine described in §4.5.
    pub fn tick(&mut self, now: Instant) -> TickOutcome {
        let Some(deadline) = self.next_flush_time else {
            return TickOutcome::NotDue;
        };
        let fuzz = Duration::from_millis(1);
        if now + fuzz < deadline {
            return TickOutcome::NotDue;
        }

        let miss = now.saturating_duration_since(deadline);
        if miss > THROTTLE_SEVERE_AFTER {
            warn!(?miss, "a2dp write severely throttled");
        } else if miss > THROTTLE_WARN_AFTER {
            debug!(?miss, "a2dp write throttled");
        }

        let want = self.write_block_frames * self.frame_bytes();
        let have = self.available();
        let n = want.min(have);
        if n == 0 {
            self.next_flush_time = Some(now + self.flush_period());
            return TickOutcome::NotDue;
        }

        // Doesn't wrap the chunk across the ring boundary in one send; a
        // send that would wrap is truncated to the boundary and the rest
        // goes out on the next tick.
        let start = self.read_pos % self.ring.len().max(1);
        let end = (start + n).min(self.ring.len());
        let chunk = &self.ring[start..end];

        match send(self.socket.as_raw_fd(), chunk, MsgFlags::MSG_DONTWAIT) {
            Ok(written) => {
                self.eagain_since = None;
                self.suspend.cancel();
                self.read_pos += written;
                self.total_written_bytes += written as u64;
                self.last_write_ts = Some(now);
                // Advance by what was actually flushed, not by a fixed
                // block period — a short write under `MSG_DONTWAIT` must
                // not let the deadline get ahead of the real socket state.
                let frame_bytes = self.frame_bytes().max(1);
                let rate = self.format.map(|f| f.frame_rate).unwrap_or(1).max(1);
                let sent_frames = written as f64 / frame_bytes as f64;
                self.next_flush_time = Some(deadline + Duration::from_secs_f64(sent_frames / rate as f64));
                TickOutcome::Wrote(written)
            }
            Err(Errno::EAGAIN) => {
                let since = *self.eagain_since.get_or_insert(now);
                if now.saturating_duration_since(since) > EAGAIN_SUSPEND_AFTER {
                    self.suspend.request(SuspendReason::WriteTimeout);
                    return TickOutcome::SuspendRequested;
                }
                TickOutcome::WouldBlock
            }
            Err(Errno::ECONNRESET) => {
                self.suspend.request(SuspendReason::ConnectionReset);
                TickOutcome::SuspendRequested
            }
            Err(_) => {
                self.suspend.request(SuspendReason::SendError);
                TickOutcome::SuspendRequested
            }
        }
    }
}

impl IoDevBackend for PacedSocketIoDev {
    fn configure(&mut self, requested: &AudioFormat) -> Result<NegotiatedFormat> {
        self.format = Some(*requested);
        let rate = requested.frame_rate as u64;
        self.write_block_frames = ((rate * self.write_block_ms) / 1000) as usize;
        let frame_bytes = requested.frame_bytes();
        // Jitter buffer: pre-fill with a couple of write blocks of silence
        // so the first few ticks have something to send immediately.
        self.ring = vec![0u8; self.write_block_frames * frame_bytes * 4];
        self.read_pos = 0;
        self.write_pos = self.write_block_frames * frame_bytes * 2;
        self.next_flush_time = Some(Instant::now());
        Ok(NegotiatedFormat {
            format: *requested,
            buffer_size: (self.write_block_frames * 2) as u32,
            min_buffer_level: self.write_block_frames as u32,
        })
    }

    fn close(&mut self) -> Result<()> {
        self.format = None;
        self.next_flush_time = None;
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
        let cap = self.ring.len() / frame_bytes.max(1);
        let write_start = self.write_pos % self.ring.len().max(1);
        let frames = max_frames.min(cap.saturating_sub(write_start / frame_bytes.max(1)));
        Ok((unsafe { self.ring.as_mut_ptr().add(write_start) }, frames))
    }

    fn put_buffer(&mut self, n: usize) -> Result<()> {
        self.write_pos += n * self.frame_bytes();
        Ok(())
    }

    fn flush_buffer(&mut self) -> Result<()> {
        self.read_pos = self.write_pos;
        Ok(())
    }

    fn frames_queued(&mut self) -> Result<HwLevel> {
        let now_micros = self.last_write_ts.map(|t| t.elapsed().as_micros() as u64).unwrap_or(0);
        Ok(HwLevel { frames: (self.available() / self.frame_bytes().max(1)) as u32, timestamp_micros: now_micros })
    }

    fn delay_frames(&self) -> u32 {
        (self.available() / self.frame_bytes().max(1)) as u32
    }

    fn no_stream(&mut self, _enable: bool) -> Result<()> {
        Ok(())
    }

    fn output_underrun(&mut self) -> Result<()> {
        // Nothing ready to mix this tick; the ring keeps draining on its
        // own schedule, so there's nothing to top up here unlike ALSA.
        Ok(())
    }

    fn start(&mut self) -> Result<()> {
        self.next_flush_time = Some(Instant::now());
        Ok(())
    }

    fn frames_to_play_in_sleep(&self) -> u32 {
        // A negative (overdue) deadline means "wake now" — callers treat a
        // non-positive result the same as `write_block_frames`.
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
    use std::os::unix::net::UnixStream;

    fn fmt() -> AudioFormat {
        AudioFormat::new(SampleFormat::S16Le, 48_000, ChannelLayout::stereo(), 2).unwrap()
    }

    fn paced_pair() -> (PacedSocketIoDev, UnixStream) {
        let (a, b) = UnixStream::pair().unwrap();
        a.set_nonblocking(true).unwrap();
        let dev = PacedSocketIoDev::new(a.into());
        (dev, b)
    }

    #[test]
    fn configure_derives_write_block_from_rate_and_ms() {
        let (mut dev, _peer) = paced_pair();
        dev.configure(&fmt()).unwrap();
        assert_eq!(dev.write_block_frames, 48_000 * 20 / 1000);
    }

    #[test]
    fn tick_before_deadline_is_a_noop() {
        let (mut dev, _peer) = paced_pair();
        dev.configure(&fmt()).unwrap();
        dev.next_flush_time = Some(Instant::now() + Duration::from_secs(10));
        assert_eq!(dev.tick(Instant::now()), TickOutcome::NotDue);
    }

    #[test]
    fn tick_at_deadline_writes_and_reschedules() {
        let (mut dev, mut peer) = paced_pair();
        dev.configure(&fmt()).unwrap();
        let before = dev.next_flush_time.unwrap();
        let outcome = dev.tick(Instant::now());
        match outcome {
            TickOutcome::Wrote(n) => assert!(n > 0),
            other => panic!("expected a write, got {other:?}"),
        }
        assert!(dev.next_flush_time.unwrap() > before);
        let mut buf = [0u8; 16];
        use std::io::Read;
        assert!(peer.read(&mut buf).unwrap() > 0);
    }

    #[test]
    fn partial_flush_advances_deadline_proportionally_not_by_full_period() {
        let (mut dev, _peer) = paced_pair();
        dev.configure(&fmt()).unwrap();
        // Only half a write block available, so the send covers less than
        // a full block.
        let frame_bytes = dev.frame_bytes();
        let half_block_bytes = (dev.write_block_frames / 2) * frame_bytes;
        dev.write_pos = dev.read_pos + half_block_bytes;

        let before = dev.next_flush_time.unwrap();
        let outcome = dev.tick(Instant::now());
        let written = match outcome {
            TickOutcome::Wrote(n) => n,
            other => panic!("expected a write, got {other:?}"),
        };
        assert!(written <= half_block_bytes);

        let advance = dev.next_flush_time.unwrap().saturating_duration_since(before);
        let rate = fmt().frame_rate as f64;
        let expected = Duration::from_secs_f64((written as f64 / frame_bytes as f64) / rate);
        assert!(advance < dev.flush_period(), "advance {advance:?} should be less than a full block period");
        assert!((advance.as_secs_f64() - expected.as_secs_f64()).abs() < 0.001);
    }

    #[test]
    fn send_failure_after_peer_hangup_requests_suspend() {
        let (mut dev, peer) = paced_pair();
        dev.configure(&fmt()).unwrap();
        dev.next_flush_time = Some(Instant::now() - Duration::from_millis(5));
        // Closing the peer turns the next send into EPIPE/ECONNRESET
        // instead of a normal write.
        drop(peer);
        let outcome = dev.tick(Instant::now());
        assert_eq!(outcome, TickOutcome::SuspendRequested);
        assert!(dev.suspend.is_pending());
    }
}
