//! `IoDev`: wraps a concrete [`IoDevBackend`] with the state machine,
//! negotiated format, and per-stream channel conversion.

use snd_core::format::AudioFormat;

use crate::backend::{IoDevBackend, NegotiatedFormat};
use crate::convert::ChannelConvMatrix;
use crate::error::{IoDevError, Result};
use crate::state::DevState;

pub struct IoDev {
    pub name: String,
    backend: Box<dyn IoDevBackend>,
    state: DevState,
    negotiated: Option<NegotiatedFormat>,
    attached_streams: u32,
}

impl IoDev {
    pub fn new(name: impl Into<String>, backend: Box<dyn IoDevBackend>) -> Self {
        Self { name: name.into(), backend, state: DevState::Closed, negotiated: None, attached_streams: 0 }
    }

    pub fn state(&self) -> DevState {
        self.state
    }

    pub fn negotiated(&self) -> Option<NegotiatedFormat> {
        self.negotiated
    }

    pub fn configure(&mut self, requested: &AudioFormat) -> Result<NegotiatedFormat> {
        let negotiated = self.backend.configure(requested)?;
        self.negotiated = Some(negotiated);
        self.state = self.state.on_configure();
        Ok(negotiated)
    }

    pub fn close(&mut self) -> Result<()> {
        self.backend.close()?;
        self.negotiated = None;
        self.attached_streams = 0;
        self.state = self.state.on_close();
        Ok(())
    }

    /// Builds the conversion matrix a newly attached stream needs to route
    /// into this device's negotiated channel layout.
    pub fn conv_matrix_for(&self, stream_format: &AudioFormat) -> Result<ChannelConvMatrix> {
        let negotiated = self.negotiated.ok_or(IoDevError::WrongState)?;
        ChannelConvMatrix::build(
            &stream_format.channel_layout,
            stream_format.num_channels as usize,
            &negotiated.format.channel_layout,
            negotiated.format.num_channels as usize,
        )
    }

    pub fn attach_stream(&mut self) {
        self.attached_streams += 1;
        self.state = self.state.on_stream_attached();
    }

    pub fn detach_stream(&mut self) -> Result<()> {
        self.attached_streams = self.attached_streams.saturating_sub(1);
        if self.attached_streams == 0 {
            let was_running = self.state == DevState::NormalRun;
            self.state = self.state.on_last_stream_detached();
            if was_running && self.state == crate::state::DevState::NoStreamRun {
                self.backend.no_stream(true)?;
            }
        }
        Ok(())
    }

    pub fn output_underrun(&mut self) -> Result<()> {
        self.backend.output_underrun()
    }

    pub fn frames_to_play_in_sleep(&self) -> u32 {
        self.backend.frames_to_play_in_sleep()
    }

    pub fn set_volume(&mut self, scaler: f32) {
        self.backend.set_volume(scaler);
    }

    pub fn backend_mut(&mut self) -> &mut dyn IoDevBackend {
        self.backend.as_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::silent::SilentIoDev;
    use snd_core::format::{ChannelLayout, SampleFormat};

    fn fmt() -> AudioFormat {
        AudioFormat::new(SampleFormat::S16Le, 48_000, ChannelLayout::stereo(), 2).unwrap()
    }

    #[test]
    fn configure_moves_closed_to_open() {
        let mut dev = IoDev::new("silent", Box::new(SilentIoDev::new()));
        assert_eq!(dev.state(), DevState::Closed);
        dev.configure(&fmt()).unwrap();
        assert_eq!(dev.state(), DevState::Open);
    }

    #[test]
    fn last_detach_enters_no_stream_run_and_calls_no_stream() {
        let mut dev = IoDev::new("silent", Box::new(SilentIoDev::new()));
        dev.configure(&fmt()).unwrap();
        dev.attach_stream();
        assert_eq!(dev.state(), DevState::NormalRun);
        dev.detach_stream().unwrap();
        assert_eq!(dev.state(), DevState::NoStreamRun);
    }

    #[test]
    fn conv_matrix_requires_configured_device() {
        let dev = IoDev::new("silent", Box::new(SilentIoDev::new()));
        assert!(dev.conv_matrix_for(&fmt()).is_err());
    }
}
