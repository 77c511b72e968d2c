//! Audio format and channel layout description.

use crate::error::{CoreError, Result};

/// Logical channel positions the layout table can bind. Front-center (`Fc`)
/// carries an invariant of its own: it may never be silently dropped when
/// converting between layouts (see `snd_iodev`'s channel conversion matrix
/// builder).
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Fl = 0,
    Fr = 1,
    Rl = 2,
    Rr = 3,
    Fc = 4,
    Lfe = 5,
    Sl = 6,
    Sr = 7,
}

/// Total number of logical channel positions tracked in a [`ChannelLayout`].
pub const NUM_CHANNELS: usize = 8;

/// Maps each logical [`Channel`] to its index within an interleaved frame, or
/// `-1` if the format does not carry that channel.
///
/// Invariant: every entry is in `{-1} ∪ [0, num_channels)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelLayout {
    positions: [i8; NUM_CHANNELS],
}

impl ChannelLayout {
    /// A layout with every channel unset.
    pub const UNSET: Self = Self { positions: [-1; NUM_CHANNELS] };

    /// Build a layout from explicit `(channel, frame_index)` pairs.
    pub fn from_positions(pairs: &[(Channel, i8)]) -> Self {
        let mut positions = [-1i8; NUM_CHANNELS];
        for &(ch, idx) in pairs {
            positions[ch as usize] = idx;
        }
        Self { positions }
    }

    /// Standard stereo layout: `FL=0, FR=1`.
    pub fn stereo() -> Self {
        Self::from_positions(&[(Channel::Fl, 0), (Channel::Fr, 1)])
    }

    /// Standard mono layout: `FC=0`.
    pub fn mono() -> Self {
        Self::from_positions(&[(Channel::Fc, 0)])
    }

    /// Standard 5.1 layout: `FL=0, FR=1, RL=2, RR=3, FC=4, LFE=5`.
    pub fn surround_5_1() -> Self {
        Self::from_positions(&[
            (Channel::Fl, 0),
            (Channel::Fr, 1),
            (Channel::Rl, 2),
            (Channel::Rr, 3),
            (Channel::Fc, 4),
            (Channel::Lfe, 5),
        ])
    }

    /// Frame index carrying `ch`, if present.
    pub fn index_of(&self, ch: Channel) -> Option<usize> {
        let p = self.positions[ch as usize];
        if p < 0 { None } else { Some(p as usize) }
    }

    /// Whether `ch` is present in this layout.
    pub fn has(&self, ch: Channel) -> bool {
        self.positions[ch as usize] >= 0
    }

    /// Validate the invariant that every entry lies in `{-1} ∪ [0, num_channels)`.
    pub fn validate(&self, num_channels: u8) -> Result<()> {
        for &p in &self.positions {
            if p >= num_channels as i8 {
                return Err(CoreError::InvalidParam);
            }
        }
        Ok(())
    }
}

/// PCM sample encoding carried over the wire and in shared memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleFormat {
    U8,
    S16Le,
    S24Le,
    S32Le,
}

impl SampleFormat {
    /// Bytes occupied by one sample in this format.
    pub const fn bytes_per_sample(self) -> usize {
        match self {
            SampleFormat::U8 => 1,
            SampleFormat::S16Le => 2,
            SampleFormat::S24Le => 3,
            SampleFormat::S32Le => 4,
        }
    }
}

/// A negotiated stream or device format.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AudioFormat {
    pub sample_format: SampleFormat,
    pub frame_rate: u32,
    pub num_channels: u8,
    pub channel_layout: ChannelLayout,
}

impl AudioFormat {
    pub fn new(sample_format: SampleFormat, frame_rate: u32, channel_layout: ChannelLayout, num_channels: u8) -> Result<Self> {
        channel_layout.validate(num_channels)?;
        Ok(Self { sample_format, frame_rate, num_channels, channel_layout })
    }

    /// Bytes per interleaved frame (all channels).
    pub fn frame_bytes(&self) -> usize {
        self.sample_format.bytes_per_sample() * self.num_channels as usize
    }
}

/// Direction a stream flows relative to the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamDirection {
    /// Client produces into AudioShm; server consumes (playback).
    Output,
    /// Client consumes from AudioShm; server produces (capture).
    Input,
    /// Capture of the post-mix, pre-DSP signal.
    PostMixPreDsp,
    /// Loopback capture of an output device's mixed signal.
    Loopback,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stereo_layout_round_trips() {
        let l = ChannelLayout::stereo();
        assert_eq!(l.index_of(Channel::Fl), Some(0));
        assert_eq!(l.index_of(Channel::Fr), Some(1));
        assert_eq!(l.index_of(Channel::Fc), None);
    }

    #[test]
    fn layout_rejects_out_of_range_index() {
        let l = ChannelLayout::from_positions(&[(Channel::Fl, 5)]);
        assert!(l.validate(2).is_err());
    }

    #[test]
    fn frame_bytes_accounts_for_channel_count() {
        let fmt = AudioFormat::new(SampleFormat::S16Le, 48_000, ChannelLayout::stereo(), 2).unwrap();
        assert_eq!(fmt.frame_bytes(), 4);
    }
}
