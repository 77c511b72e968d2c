//! Control-plane stream metadata shared between the protocol layer
//! (`snd_proto`) and the audio thread (`snd_thread`).
//!
//! The fields here are everything about a stream that does not require
//! holding the shared-memory mapping or a format converter open — those are
//! layered on by `snd_thread::stream::Stream`, which embeds a
//! [`StreamMeta`] alongside its `snd_shm::AudioShm` and optional resampler.
//! Splitting it this way keeps `snd_core` free of a dependency on
//! `snd_shm`/`snd_iodev`.

use crate::{
    error::{CoreError, Result},
    format::{AudioFormat, StreamDirection},
    stream_id::StreamId,
};

/// A tiny local substitute for the `bitflags!` macro: this workspace does
/// not depend on the `bitflags` crate, and a handful of flag bits does not
/// warrant adding one.
macro_rules! bitflags_like {
    (
        $(#[$meta:meta])*
        pub struct $name:ident: $repr:ty {
            $(const $flag:ident = $value:expr;)*
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
        pub struct $name($repr);

        impl $name {
            $(pub const $flag: Self = Self($value);)*

            pub const fn contains(self, other: Self) -> bool {
                (self.0 & other.0) == other.0
            }

            pub const fn union(self, other: Self) -> Self {
                Self(self.0 | other.0)
            }
        }

        impl core::ops::BitOr for $name {
            type Output = Self;
            fn bitor(self, rhs: Self) -> Self {
                self.union(rhs)
            }
        }
    };
}

bitflags_like! {
    /// Per-stream behavior flags negotiated at connect time.
    pub struct StreamFlags: u32 {
        const NONE = 0;
        /// Bulk audio: server may batch wakeups rather than honor
        /// `cb_threshold` strictly (used by low-priority background streams).
        const BULK_AUDIO_OK = 1 << 0;
        /// Stream should keep running through suspend/underrun rather than
        /// be torn down.
        const SPEAK_ON_MUTE = 1 << 1;
    }
}

/// Control-plane description of a client-originated stream.
#[derive(Debug, Clone, Copy)]
pub struct StreamMeta {
    pub id: StreamId,
    pub direction: StreamDirection,
    pub format: AudioFormat,
    pub buffer_frames: u32,
    pub cb_threshold: u32,
    pub min_cb_level: u32,
    pub flags: StreamFlags,
    pub volume_scaler: f32,
    pub owner_client: u16,
    pub attached_device: Option<u32>,
}

impl StreamMeta {
    /// Validate the invariant `min_cb_level ≤ cb_threshold ≤ buffer_frames`.
    pub fn validate(&self) -> Result<()> {
        if self.min_cb_level <= self.cb_threshold && self.cb_threshold <= self.buffer_frames {
            Ok(())
        } else {
            Err(CoreError::InvalidParam)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{ChannelLayout, SampleFormat};

    fn meta(min: u32, cb: u32, buf: u32) -> StreamMeta {
        StreamMeta {
            id: StreamId::new(1, 0),
            direction: StreamDirection::Output,
            format: AudioFormat::new(SampleFormat::S16Le, 48_000, ChannelLayout::stereo(), 2).unwrap(),
            buffer_frames: buf,
            cb_threshold: cb,
            min_cb_level: min,
            flags: StreamFlags::NONE,
            volume_scaler: 1.0,
            owner_client: 1,
            attached_device: None,
        }
    }

    #[test]
    fn accepts_ordered_thresholds() {
        assert!(meta(128, 512, 1024).validate().is_ok());
    }

    #[test]
    fn rejects_cb_threshold_above_buffer_frames() {
        assert!(meta(128, 2048, 1024).validate().is_err());
    }

    #[test]
    fn flags_union_and_contains() {
        let f = StreamFlags::BULK_AUDIO_OK | StreamFlags::SPEAK_ON_MUTE;
        assert!(f.contains(StreamFlags::BULK_AUDIO_OK));
        assert!(f.contains(StreamFlags::SPEAK_ON_MUTE));
        assert!(!StreamFlags::NONE.contains(StreamFlags::BULK_AUDIO_OK));
    }
}
