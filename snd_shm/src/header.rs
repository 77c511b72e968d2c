//! The control header laid out at the start of the header shared-memory
//! segment.
//!
//! All fields are atomics so client and server can both read/write without a
//! mutex: ordering is the only synchronization mechanism, per the ring's
//! contract (see `ring.rs`).

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use crate::{error::Result, posix::ShmSegment};

/// Raw, C-compatible layout of the control header. Constructed in place
/// inside a shared-memory segment — never on the stack or heap directly —
/// so its field offsets are part of the wire contract between processes.
#[repr(C)]
pub struct ShmControlRaw {
    pub read_buf_idx: AtomicU32,
    pub write_buf_idx: AtomicU32,
    pub read_offset: [AtomicU32; 2],
    pub write_offset: [AtomicU32; 2],
    pub write_in_progress: AtomicU32,
    pub num_overruns: AtomicU32,
    pub volume_scaler_bits: AtomicU32,
    pub muted: AtomicU32,
    pub ts_micros: AtomicU64,
    pub used_size: AtomicU32,
    pub frame_bytes: AtomicU32,
}

impl ShmControlRaw {
    pub const SIZE: usize = std::mem::size_of::<ShmControlRaw>();
}

/// Owns the header segment and exposes it as a [`ShmControlRaw`].
pub struct ShmHeader {
    segment: ShmSegment,
}

impl ShmHeader {
    /// Create a fresh header segment and initialize every field to its
    /// zero/empty state.
    pub fn create(used_size: u32, frame_bytes: u32) -> Result<Self> {
        let segment = ShmSegment::create("snd_audio_shm_header", ShmControlRaw::SIZE)?;
        let header = Self { segment };
        let raw = header.raw();
        raw.read_buf_idx.store(0, Ordering::Relaxed);
        raw.write_buf_idx.store(0, Ordering::Relaxed);
        raw.read_offset[0].store(0, Ordering::Relaxed);
        raw.read_offset[1].store(0, Ordering::Relaxed);
        raw.write_offset[0].store(0, Ordering::Relaxed);
        raw.write_offset[1].store(0, Ordering::Relaxed);
        raw.write_in_progress.store(0, Ordering::Relaxed);
        raw.num_overruns.store(0, Ordering::Relaxed);
        raw.volume_scaler_bits.store(1.0f32.to_bits(), Ordering::Relaxed);
        raw.muted.store(0, Ordering::Relaxed);
        raw.ts_micros.store(0, Ordering::Relaxed);
        raw.used_size.store(used_size, Ordering::Relaxed);
        raw.frame_bytes.store(frame_bytes, Ordering::Relaxed);
        Ok(header)
    }

    /// Map an already-initialized header segment received from the server.
    pub fn from_segment(segment: ShmSegment) -> Self {
        Self { segment }
    }

    pub fn segment(&self) -> &ShmSegment {
        &self.segment
    }

    #[inline]
    pub fn raw(&self) -> &ShmControlRaw {
        debug_assert!(self.segment.len() >= ShmControlRaw::SIZE);
        // SAFETY: the segment is exactly `ShmControlRaw::SIZE` bytes,
        // page-aligned by `mmap`, and `ShmControlRaw` has no padding
        // requirements beyond natural atomic alignment which `mmap`
        // satisfies unconditionally.
        unsafe { &*(self.segment.as_ptr() as *const ShmControlRaw) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_initializes_used_size_and_frame_bytes() {
        let header = ShmHeader::create(4096, 4).unwrap();
        assert_eq!(header.raw().used_size.load(Ordering::Relaxed), 4096);
        assert_eq!(header.raw().frame_bytes.load(Ordering::Relaxed), 4);
        assert_eq!(header.raw().num_overruns.load(Ordering::Relaxed), 0);
    }
}
