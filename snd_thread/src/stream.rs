//! The audio thread's view of a stream: [`StreamMeta`] plus the shared
//! memory ring backing it and, when the stream's format doesn't match its
//! attached device, a channel conversion matrix and rate converter.

use snd_core::format::AudioFormat;
use snd_core::stream::StreamMeta;
use snd_shm::AudioShm;

use snd_iodev::{ChannelConvMatrix, RateConverter};

pub struct Stream {
    pub meta: StreamMeta,
    pub shm: AudioShm,
    pub conv: Option<ChannelConvMatrix>,
    pub resampler: Option<RateConverter>,
    /// Set once a `DATA_REQUEST`/`DATA_READY` has been sent and not yet
    /// answered, so the service loop doesn't re-request every tick.
    pub pending: bool,
}

impl Stream {
    pub fn new(meta: StreamMeta, shm: AudioShm) -> Self {
        Self { meta, shm, conv: None, resampler: None, pending: false }
    }

    /// Attaches format conversion when the device's negotiated format
    /// differs from this stream's own.
    pub fn attach_converter(&mut self, device_format: &AudioFormat) -> snd_iodev::Result<()> {
        if device_format.channel_layout != self.meta.format.channel_layout
            || device_format.num_channels != self.meta.format.num_channels
        {
            self.conv = Some(ChannelConvMatrix::build(
                &self.meta.format.channel_layout,
                self.meta.format.num_channels as usize,
                &device_format.channel_layout,
                device_format.num_channels as usize,
            )?);
        }
        if device_format.frame_rate != self.meta.format.frame_rate {
            self.resampler = Some(RateConverter::new(
                self.meta.format.frame_rate,
                device_format.frame_rate,
                device_format.num_channels as usize,
                1024,
            )?);
        }
        Ok(())
    }

    pub fn needs_conversion(&self) -> bool {
        self.conv.is_some() || self.resampler.is_some()
    }

    /// Frames currently available to read from this stream's AudioShm
    /// (playback direction: how much the client has produced).
    pub fn frames_available(&self, frame_bytes: usize) -> usize {
        let (_, n) = match self.shm.acquire_read(self.meta.buffer_frames as usize) {
            Ok(v) => v,
            Err(_) => return 0,
        };
        let _ = frame_bytes;
        n
    }

    pub fn below_cb_threshold(&self, frame_bytes: usize) -> bool {
        self.frames_available(frame_bytes) < self.meta.cb_threshold as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use snd_core::format::{ChannelLayout, SampleFormat};
    use snd_core::stream_id::StreamId;
    use snd_core::stream::StreamFlags;

    fn meta() -> StreamMeta {
        StreamMeta {
            id: StreamId::new(1, 0),
            direction: snd_core::format::StreamDirection::Output,
            format: AudioFormat::new(SampleFormat::S16Le, 48_000, ChannelLayout::stereo(), 2).unwrap(),
            buffer_frames: 1024,
            cb_threshold: 512,
            min_cb_level: 256,
            flags: StreamFlags::NONE,
            volume_scaler: 1.0,
            owner_client: 1,
            attached_device: None,
        }
    }

    #[test]
    fn fresh_stream_is_below_threshold() {
        let shm = AudioShm::create(1024, 4).unwrap();
        let stream = Stream::new(meta(), shm);
        assert!(stream.below_cb_threshold(4));
    }

    #[test]
    fn matching_device_format_attaches_no_converter() {
        let shm = AudioShm::create(1024, 4).unwrap();
        let mut stream = Stream::new(meta(), shm);
        let device_format = meta().format;
        stream.attach_converter(&device_format).unwrap();
        assert!(!stream.needs_conversion());
    }

    #[test]
    fn differing_rate_attaches_resampler() {
        let shm = AudioShm::create(1024, 4).unwrap();
        let mut stream = Stream::new(meta(), shm);
        let device_format = AudioFormat::new(SampleFormat::S16Le, 44_100, ChannelLayout::stereo(), 2).unwrap();
        stream.attach_converter(&device_format).unwrap();
        assert!(stream.needs_conversion());
    }
}
