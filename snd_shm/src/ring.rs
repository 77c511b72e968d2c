//! `AudioShm`: the lock-free, double-buffered PCM ring shared between a
//! client process and the audio thread.
//!
//! Every offset lives in the mapped [`ShmControlRaw`] header so both sides
//! see the same state without a mutex: a commit publishes its offset with
//! `Release`, every acquire reads with `Acquire`. Unlike an in-process SPSC
//! ring, this one crosses process boundaries through shared memory rather
//! than an `Arc`, and carries frame (not item) granularity plus the extra
//! control fields (`volume_scaler`, `muted`, `ts`) a stream needs.

use std::sync::atomic::Ordering;

use crate::{
    error::{Result, ShmError},
    header::{ShmControlRaw, ShmHeader},
    posix::ShmSegment,
};

/// Two equally sized sample buffers plus the control header describing
/// them. One process writes, the other reads; which is which depends on
/// [`snd_core::StreamDirection`].
pub struct AudioShm {
    header: ShmHeader,
    samples: ShmSegment,
    used_size: usize,
    frame_bytes: usize,
}

impl AudioShm {
    /// Allocate a fresh ring sized for `used_size` frames per buffer of
    /// `frame_bytes` each (`2 * used_size * frame_bytes` total sample
    /// bytes). Called by the server on `ConnectStream`.
    pub fn create(used_size: usize, frame_bytes: usize) -> Result<Self> {
        let header = ShmHeader::create(used_size as u32, frame_bytes as u32)?;
        let samples = ShmSegment::create("snd_audio_shm_samples", 2 * used_size * frame_bytes)?;
        Ok(Self { header, samples, used_size, frame_bytes })
    }

    /// Map the header and samples segments received over the control
    /// socket. Called by the client.
    pub fn from_segments(header: ShmSegment, samples: ShmSegment) -> Self {
        let header = ShmHeader::from_segment(header);
        let used_size = header.raw().used_size.load(Ordering::Relaxed) as usize;
        let frame_bytes = header.raw().frame_bytes.load(Ordering::Relaxed) as usize;
        Self { header, samples, used_size, frame_bytes }
    }

    pub fn header_segment(&self) -> &ShmSegment {
        self.header.segment()
    }

    pub fn samples_segment(&self) -> &ShmSegment {
        &self.samples
    }

    pub fn used_size(&self) -> usize {
        self.used_size
    }

    fn raw(&self) -> &ShmControlRaw {
        self.header.raw()
    }

    fn buf_ptr(&self, buf_idx: usize, frame_offset: usize) -> *mut u8 {
        let byte_off = (buf_idx * self.used_size + frame_offset) * self.frame_bytes;
        // SAFETY: `byte_off` is always within `2 * used_size * frame_bytes`
        // because both `buf_idx` (0 or 1) and `frame_offset` (≤ used_size)
        // are bounds-checked by every caller below.
        unsafe { self.samples.as_ptr().add(byte_off) }
    }

    /// Returns a writable region of at most `max_frames` frames within the
    /// current write buffer, flipping or forcing an overrun first if the
    /// current buffer is already full. `Err(NotMapped)` only if the
    /// segments were never mapped (defensive; in practice unreachable once
    /// constructed).
    pub fn acquire_write(&self, max_frames: usize) -> Result<(*mut u8, usize)> {
        if self.samples.is_empty() {
            return Err(ShmError::NotMapped);
        }
        let raw = self.raw();
        loop {
            let wbuf = raw.write_buf_idx.load(Ordering::Acquire) as usize;
            let wcur = raw.write_offset[wbuf].load(Ordering::Acquire) as usize;
            if wcur < self.used_size {
                let avail = self.used_size - wcur;
                let count = max_frames.min(avail);
                raw.write_in_progress.store(1, Ordering::Release);
                return Ok((self.buf_ptr(wbuf, wcur), count));
            }

            // Current buffer is full; must move to the other one. The
            // reader always follows the writer across this flip — the same
            // buffer-advance `commit_read` performs when it notices a
            // buffer was fully drained — so the read side never gets
            // stranded on a buffer the writer has already abandoned. If the
            // reader hadn't already drained `wbuf`, that's an overrun and
            // its unread remainder is discarded.
            let other = 1 - wbuf;
            let reader_caught_up = raw.read_offset[wbuf].load(Ordering::Acquire) as usize == wcur;
            if !reader_caught_up {
                raw.read_offset[wbuf].store(wcur as u32, Ordering::Release);
                raw.num_overruns.fetch_add(1, Ordering::AcqRel);
            }
            raw.write_offset[other].store(0, Ordering::Release);
            raw.read_offset[other].store(0, Ordering::Release);
            raw.write_buf_idx.store(other as u32, Ordering::Release);
            raw.read_buf_idx.store(other as u32, Ordering::Release);
            // loop again; `other` now has room
        }
    }

    /// Commits `n` frames written via the region returned by
    /// [`Self::acquire_write`].
    pub fn commit_write(&self, n: usize) {
        let raw = self.raw();
        let wbuf = raw.write_buf_idx.load(Ordering::Relaxed) as usize;
        let wcur = raw.write_offset[wbuf].load(Ordering::Relaxed) as usize;
        raw.write_offset[wbuf].store((wcur + n) as u32, Ordering::Release);
        raw.write_in_progress.store(0, Ordering::Release);
    }

    /// Returns a readable region of at most `max_frames` frames within the
    /// current read buffer. Never flips on its own — flipping happens in
    /// [`Self::commit_read`] once a buffer is fully drained.
    pub fn acquire_read(&self, max_frames: usize) -> Result<(*const u8, usize)> {
        if self.samples.is_empty() {
            return Err(ShmError::NotMapped);
        }
        let raw = self.raw();
        let rbuf = raw.read_buf_idx.load(Ordering::Acquire) as usize;
        let rcur = raw.read_offset[rbuf].load(Ordering::Acquire) as usize;
        let wcur = raw.write_offset[rbuf].load(Ordering::Acquire) as usize;
        let avail = wcur.saturating_sub(rcur);
        let count = max_frames.min(avail);
        Ok((self.buf_ptr(rbuf, rcur) as *const u8, count))
    }

    /// Commits `n` frames consumed via the region returned by
    /// [`Self::acquire_read`]; flips `read_buf_idx` once the current
    /// buffer is fully drained and the writer has moved past it.
    pub fn commit_read(&self, n: usize) {
        let raw = self.raw();
        let rbuf = raw.read_buf_idx.load(Ordering::Relaxed) as usize;
        let rcur = raw.read_offset[rbuf].load(Ordering::Relaxed) as usize;
        let new_r = rcur + n;
        raw.read_offset[rbuf].store(new_r as u32, Ordering::Release);

        let wcur = raw.write_offset[rbuf].load(Ordering::Acquire) as usize;
        let wbuf = raw.write_buf_idx.load(Ordering::Acquire) as usize;
        if new_r == wcur && new_r == self.used_size && wbuf != rbuf {
            raw.read_buf_idx.store((1 - rbuf) as u32, Ordering::Release);
        }
    }

    pub fn set_volume_scaler(&self, v: f32) {
        self.raw().volume_scaler_bits.store(v.clamp(0.0, 1.0).to_bits(), Ordering::Release);
    }

    pub fn volume_scaler(&self) -> f32 {
        f32::from_bits(self.raw().volume_scaler_bits.load(Ordering::Acquire))
    }

    pub fn set_muted(&self, muted: bool) {
        self.raw().muted.store(muted as u32, Ordering::Release);
    }

    pub fn muted(&self) -> bool {
        self.raw().muted.load(Ordering::Acquire) != 0
    }

    pub fn num_overruns(&self) -> u32 {
        self.raw().num_overruns.load(Ordering::Acquire)
    }

    pub fn set_ts(&self, micros: u64) {
        self.raw().ts_micros.store(micros, Ordering::Release);
    }

    pub fn ts(&self) -> u64 {
        self.raw().ts_micros.load(Ordering::Acquire)
    }

    /// Convenience used by tests and by the sample-type converter: copy
    /// `data` (an exact multiple of `frame_bytes`) into the ring, frame by
    /// frame, honoring whatever `acquire_write` hands back at each step.
    /// Returns the number of *frames* actually written.
    pub fn write_frames(&self, data: &[u8]) -> usize {
        let total_frames = data.len() / self.frame_bytes;
        let mut written = 0;
        while written < total_frames {
            let (ptr, count) = match self.acquire_write(total_frames - written) {
                Ok(v) => v,
                Err(_) => break,
            };
            if count == 0 {
                break;
            }
            let byte_off = written * self.frame_bytes;
            let len = count * self.frame_bytes;
            // SAFETY: `ptr` is valid for `count * frame_bytes` bytes per
            // `acquire_write`'s contract; `data[byte_off..byte_off+len]` is
            // in bounds because `count ≤ total_frames - written`.
            unsafe {
                std::ptr::copy_nonoverlapping(data[byte_off..byte_off + len].as_ptr(), ptr, len);
            }
            self.commit_write(count);
            written += count;
        }
        written
    }

    /// Convenience used by tests: drain up to `max_frames` into a freshly
    /// allocated `Vec<u8>`.
    pub fn read_frames(&self, max_frames: usize) -> Vec<u8> {
        let mut out = Vec::with_capacity(max_frames * self.frame_bytes);
        let mut remaining = max_frames;
        while remaining > 0 {
            let (ptr, count) = match self.acquire_read(remaining) {
                Ok(v) => v,
                Err(_) => break,
            };
            if count == 0 {
                break;
            }
            let len = count * self.frame_bytes;
            // SAFETY: `ptr` is valid for `len` bytes per `acquire_read`'s
            // contract.
            unsafe {
                out.extend_from_slice(std::slice::from_raw_parts(ptr, len));
            }
            self.commit_read(count);
            remaining -= count;
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shm(used_size: usize) -> AudioShm {
        AudioShm::create(used_size, 4).unwrap() // stereo s16le frame = 4 bytes
    }

    #[test]
    fn fresh_ring_satisfies_offset_invariant() {
        let ring = shm(256);
        assert!(ring.raw().read_offset[0].load(Ordering::Relaxed) <= ring.raw().write_offset[0].load(Ordering::Relaxed));
        assert_eq!(ring.num_overruns(), 0);
    }

    #[test]
    fn write_then_read_round_trips_bytes() {
        let ring = shm(256);
        let data: Vec<u8> = (0..64u8).collect(); // 16 frames
        let written = ring.write_frames(&data);
        assert_eq!(written, 16);
        let out = ring.read_frames(16);
        assert_eq!(out, data);
    }

    #[test]
    fn boundary_two_half_writes_fill_exactly_one_buffer() {
        let ring = shm(64);
        let half = vec![0xAAu8; 32 * 4]; // 32 frames
        assert_eq!(ring.write_frames(&half), 32);
        assert_eq!(ring.write_frames(&half), 32);
        assert_eq!(ring.num_overruns(), 0);
    }

    #[test]
    fn single_write_is_capped_by_current_buffer() {
        let ring = shm(64);
        let data = vec![0u8; 128 * 4]; // more than two buffers' worth
        let (_, count) = ring.acquire_write(128).unwrap();
        assert_eq!(count, 64);
        let _ = data;
    }

    #[test]
    fn three_full_writes_with_no_reads_yield_two_overruns() {
        let ring = shm(64);
        let full = vec![0x11u8; 64 * 4];
        ring.write_frames(&full);
        ring.write_frames(&full);
        ring.write_frames(&full);
        assert_eq!(ring.num_overruns(), 2);
    }

    #[test]
    fn read_side_survives_an_overrun() {
        let ring = shm(64);
        let full = vec![0x11u8; 64 * 4];
        ring.write_frames(&full);
        ring.write_frames(&full);
        ring.write_frames(&full);
        assert_eq!(ring.num_overruns(), 2);

        // The read side must still make progress after the forced flip,
        // not stay stranded on a buffer the writer has abandoned.
        let fresh = vec![0x33u8; 16 * 4];
        assert_eq!(ring.write_frames(&fresh), 16);
        let out = ring.read_frames(16);
        assert_eq!(out, fresh);
    }

    #[test]
    fn num_overruns_is_monotonic_across_many_writes() {
        let ring = shm(32);
        let full = vec![0x22u8; 32 * 4];
        let mut last = 0;
        for _ in 0..10 {
            ring.write_frames(&full);
            let cur = ring.num_overruns();
            assert!(cur >= last);
            last = cur;
        }
    }

    #[test]
    fn volume_and_mute_round_trip() {
        let ring = shm(16);
        ring.set_volume_scaler(0.5);
        assert!((ring.volume_scaler() - 0.5).abs() < f32::EPSILON);
        ring.set_muted(true);
        assert!(ring.muted());
    }

    #[test]
    fn ts_round_trips() {
        let ring = shm(16);
        ring.set_ts(123_456);
        assert_eq!(ring.ts(), 123_456);
    }
}

#[cfg(all(test, not(loom)))]
mod threaded_tests {
    use std::{sync::Arc, thread};

    use super::*;

    /// Real producer/consumer threads exercising the invariant
    /// `read_offset ≤ write_offset ≤ used_size` under genuine concurrency.
    /// The consumer may legitimately miss frames to overrun when it lags
    /// the producer, so this asserts the invariant and overrun
    /// monotonicity rather than an exact frame count.
    #[test]
    fn concurrent_producer_consumer_preserves_invariant() {
        let ring = Arc::new(AudioShm::create(256, 4).unwrap());
        let producer = Arc::clone(&ring);
        let consumer = Arc::clone(&ring);

        let writer = thread::spawn(move || {
            let chunk = vec![0x42u8; 16 * 4];
            for _ in 0..200 {
                producer.write_frames(&chunk);
            }
        });

        let reader = thread::spawn(move || {
            let mut last_overruns = 0;
            for _ in 0..400 {
                let _ = consumer.read_frames(16);
                let cur = consumer.num_overruns();
                assert!(cur >= last_overruns);
                last_overruns = cur;
                thread::yield_now();
            }
        });

        writer.join().unwrap();
        reader.join().unwrap();

        for i in 0..2 {
            assert!(
                ring.raw().read_offset[i].load(Ordering::Acquire) <= ring.raw().write_offset[i].load(Ordering::Acquire)
            );
        }
    }
}
