//! Channel conversion and sample-rate/format resampling between a stream's
//! negotiated format and a device's native format.

use rubato::{Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction};
use snd_core::format::{Channel, ChannelLayout, NUM_CHANNELS};

use crate::error::{IoDevError, Result};

const ALL_CHANNELS: [Channel; NUM_CHANNELS] =
    [Channel::Fl, Channel::Fr, Channel::Rl, Channel::Rr, Channel::Fc, Channel::Lfe, Channel::Sl, Channel::Sr];

/// Permutation/substitution matrix from a stream's channel layout to a
/// device's channel layout. `gains[out][in]` is applied per output channel
/// as a sum over input channels; most entries are either `0.0` or `1.0`
/// since this performs routing, not mixing.
pub struct ChannelConvMatrix {
    in_channels: usize,
    out_channels: usize,
    gains: Vec<f32>,
}

impl ChannelConvMatrix {
    pub fn identity(num_channels: usize) -> Self {
        let mut gains = vec![0.0f32; num_channels * num_channels];
        for i in 0..num_channels {
            gains[i * num_channels + i] = 1.0;
        }
        Self { in_channels: num_channels, out_channels: num_channels, gains }
    }

    /// Builds the routing matrix for `in_layout` (`in_channels` channels)
    /// into `out_layout` (`out_channels` channels). Front center is never
    /// silently dropped: if the output layout calls for `FC` and neither an
    /// exact match nor a substitute is available, this returns
    /// [`IoDevError::UnsupportedFormat`]. Every other unmatched output
    /// channel is left silent (gain zero) rather than erroring — that
    /// matches devices that simply lack a position (e.g. no `LFE`).
    pub fn build(in_layout: &ChannelLayout, in_channels: usize, out_layout: &ChannelLayout, out_channels: usize) -> Result<Self> {
        let mut gains = vec![0.0f32; out_channels * in_channels];
        let is_mono_in = in_channels == 1;

        for out_ch in ALL_CHANNELS {
            let Some(out_idx) = out_layout.index_of(out_ch) else { continue };

            if let Some(in_idx) = in_layout.index_of(out_ch) {
                gains[out_idx * in_channels + in_idx] = 1.0;
                continue;
            }

            if let Some(sub_ch) = substitute_source(out_ch) {
                if let Some(in_idx) = in_layout.index_of(sub_ch) {
                    gains[out_idx * in_channels + in_idx] = 1.0;
                    continue;
                }
            }

            if is_mono_in && matches!(out_ch, Channel::Fl | Channel::Fr) {
                if let Some(in_idx) = in_layout.index_of(Channel::Fl) {
                    gains[out_idx * in_channels + in_idx] = 1.0;
                    continue;
                }
            }

            if out_ch == Channel::Fc {
                return Err(IoDevError::UnsupportedFormat);
            }
        }

        Ok(Self { in_channels, out_channels, gains })
    }

    /// Routes one frame: `in_frame` has `in_channels` samples, `out_frame`
    /// must have room for `out_channels`.
    pub fn apply(&self, in_frame: &[f32], out_frame: &mut [f32]) {
        debug_assert_eq!(in_frame.len(), self.in_channels);
        debug_assert_eq!(out_frame.len(), self.out_channels);
        for o in 0..self.out_channels {
            let mut acc = 0.0f32;
            let row = &self.gains[o * self.in_channels..(o + 1) * self.in_channels];
            for (i, g) in row.iter().enumerate() {
                acc += g * in_frame[i];
            }
            out_frame[o] = acc;
        }
    }

    pub fn out_channels(&self) -> usize {
        self.out_channels
    }

    pub fn in_channels(&self) -> usize {
        self.in_channels
    }
}

fn substitute_source(ch: Channel) -> Option<Channel> {
    match ch {
        Channel::Sl => Some(Channel::Rl),
        Channel::Sr => Some(Channel::Rr),
        Channel::Rl => Some(Channel::Sl),
        Channel::Rr => Some(Channel::Sr),
        _ => None,
    }
}

/// Wraps a `rubato` sinc resampler with the frame-count planning the audio
/// thread needs: given a target output frame count, how many input frames
/// must be requested, and vice versa.
pub struct RateConverter {
    inner: SincFixedIn<f32>,
    ratio: f64,
}

impl RateConverter {
    pub fn new(in_rate: u32, out_rate: u32, channels: usize, chunk_size: usize) -> Result<Self> {
        let ratio = out_rate as f64 / in_rate as f64;
        let params = SincInterpolationParameters {
            sinc_len: 256,
            f_cutoff: 0.95,
            interpolation: SincInterpolationType::Linear,
            oversampling_factor: 256,
            window: WindowFunction::BlackmanHarris2,
        };
        let inner = SincFixedIn::<f32>::new(ratio, 2.0, params, chunk_size, channels).map_err(|_| IoDevError::UnsupportedFormat)?;
        Ok(Self { inner, ratio })
    }

    /// How many input frames to request in order to produce roughly
    /// `out_frames` output frames.
    pub fn in_frames_to_out(&self, in_frames: usize) -> usize {
        ((in_frames as f64) * self.ratio).round() as usize
    }

    pub fn out_frames_to_in(&self, out_frames: usize) -> usize {
        ((out_frames as f64) / self.ratio).round() as usize
    }

    pub fn process(&mut self, input: &[Vec<f32>]) -> Result<Vec<Vec<f32>>> {
        self.inner.process(input, None).map_err(|_| IoDevError::Fatal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_matrix_passes_samples_through() {
        let m = ChannelConvMatrix::identity(2);
        let input = [1.0f32, 2.0];
        let mut out = [0.0f32; 2];
        m.apply(&input, &mut out);
        assert_eq!(out, input);
    }

    #[test]
    fn front_center_missing_from_output_fails_when_requested() {
        // Input has no FC and no substitute exists for FC; output requires it.
        let in_no_fc = ChannelLayout::stereo();
        let out_wants_fc =
            ChannelLayout::from_positions(&[(Channel::Fl, 0), (Channel::Fr, 1), (Channel::Fc, 2)]);
        let result = ChannelConvMatrix::build(&in_no_fc, 2, &out_wants_fc, 3);
        assert!(result.is_err());
    }

    #[test]
    fn surround_left_substitutes_to_rear_left() {
        let in_layout = ChannelLayout::from_positions(&[(Channel::Fl, 0), (Channel::Fr, 1), (Channel::Rl, 2)]);
        let out_layout = ChannelLayout::from_positions(&[(Channel::Fl, 0), (Channel::Fr, 1), (Channel::Sl, 2)]);

        let m = ChannelConvMatrix::build(&in_layout, 3, &out_layout, 3).unwrap();
        let input = [0.0f32, 0.0, 9.0];
        let mut out = [0.0f32; 3];
        m.apply(&input, &mut out);
        assert_eq!(out[2], 9.0);
    }

    #[test]
    fn mono_input_is_copied_to_both_stereo_outputs() {
        let mono = ChannelLayout::mono();
        let stereo = ChannelLayout::stereo();
        let m = ChannelConvMatrix::build(&mono, 1, &stereo, 2).unwrap();
        let input = [5.0f32];
        let mut out = [0.0f32; 2];
        m.apply(&input, &mut out);
        assert_eq!(out, [5.0, 5.0]);
    }
}
