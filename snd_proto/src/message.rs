//! The wire message catalog: server-bound requests, client-bound replies,
//! and their binary encoding.
//!
//! Every message is `{length: u32, id: u32, payload...}` with `length`
//! counting the *entire* frame including the eight-byte prefix — the
//! framing invariant enforced by [`crate::framing`]. Encoding is manual
//! little-endian via `byteorder`, mirroring this workspace's preference for
//! explicit `#[repr(C)]`-style wire structs over a derive-based codec.

use std::io::{Cursor, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use snd_core::{AudioFormat, Channel, ChannelLayout, SampleFormat, StreamDirection, StreamFlags, StreamId};

use crate::error::{ProtoError, Result};

pub const HEADER_LEN: usize = 8;

/// Message type tags. Unknown ids on the wire are not an error — a message
/// with an id this enum doesn't recognize is simply ignored by the
/// dispatcher (forward compatibility), per [`crate::rclient::RClient::handle_message`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum MessageId {
    ConnectStream = 1,
    DisconnectStream = 2,
    SetAecRef = 3,
    SetSystemVolume = 4,
    SetSystemMute = 5,
    SwitchStreamTypeIodev = 6,

    ClientConnected = 100,
    StreamConnected = 101,
    StreamReattach = 102,
}

impl MessageId {
    pub fn from_u32(v: u32) -> Option<Self> {
        Some(match v {
            1 => Self::ConnectStream,
            2 => Self::DisconnectStream,
            3 => Self::SetAecRef,
            4 => Self::SetSystemVolume,
            5 => Self::SetSystemMute,
            6 => Self::SwitchStreamTypeIodev,
            100 => Self::ClientConnected,
            101 => Self::StreamConnected,
            102 => Self::StreamReattach,
            _ => return None,
        })
    }

    /// Expected accompanying ancillary fd count for server-bound messages
    /// of this type. A mismatch at dispatch time is a fatal
    /// [`ProtoError::FdCountMismatch`].
    pub fn expected_fd_count(self, client_shm_requested: bool) -> usize {
        match self {
            MessageId::ConnectStream => {
                if client_shm_requested {
                    2
                } else {
                    1
                }
            }
            _ => 0,
        }
    }
}

fn write_format(w: &mut impl Write, fmt: &AudioFormat) -> std::io::Result<()> {
    let sf: u8 = match fmt.sample_format {
        SampleFormat::U8 => 0,
        SampleFormat::S16Le => 1,
        SampleFormat::S24Le => 2,
        SampleFormat::S32Le => 3,
    };
    w.write_u8(sf)?;
    w.write_u32::<LittleEndian>(fmt.frame_rate)?;
    w.write_u8(fmt.num_channels)?;
    for ch in [
        Channel::Fl,
        Channel::Fr,
        Channel::Rl,
        Channel::Rr,
        Channel::Fc,
        Channel::Lfe,
        Channel::Sl,
        Channel::Sr,
    ] {
        let idx = fmt.channel_layout.index_of(ch).map(|i| i as i8).unwrap_or(-1);
        w.write_i8(idx)?;
    }
    Ok(())
}

fn read_format(r: &mut impl Read) -> Result<AudioFormat> {
    let sf_tag = r.read_u8().map_err(|_| ProtoError::Truncated)?;
    let sample_format = match sf_tag {
        0 => SampleFormat::U8,
        1 => SampleFormat::S16Le,
        2 => SampleFormat::S24Le,
        3 => SampleFormat::S32Le,
        _ => return Err(ProtoError::InvalidParam),
    };
    let frame_rate = r.read_u32::<LittleEndian>().map_err(|_| ProtoError::Truncated)?;
    let num_channels = r.read_u8().map_err(|_| ProtoError::Truncated)?;
    let channels = [Channel::Fl, Channel::Fr, Channel::Rl, Channel::Rr, Channel::Fc, Channel::Lfe, Channel::Sl, Channel::Sr];
    let mut pairs = Vec::with_capacity(8);
    for ch in channels {
        let idx = r.read_i8().map_err(|_| ProtoError::Truncated)?;
        pairs.push((ch, idx));
    }
    let layout = ChannelLayout::from_positions(&pairs);
    AudioFormat::new(sample_format, frame_rate, layout, num_channels).map_err(|_| ProtoError::InvalidParam)
}

/// `ConnectStream` request payload (fixed part; fds travel out-of-band).
#[derive(Debug, Clone, Copy)]
pub struct ConnectStreamRequest {
    pub stream_id: StreamId,
    pub direction: StreamDirection,
    pub client_type_override: Option<u8>,
    pub buffer_frames: u32,
    pub cb_threshold: u32,
    pub min_cb_level: u32,
    pub flags: StreamFlags,
    pub format: AudioFormat,
    pub client_shm_size: u32,
    /// APM effects bitmask requested for this stream (echo cancellation,
    /// noise suppression, ...); opaque to the transport, just carried
    /// through to the `StreamConnected` reply.
    pub effects: u32,
}

impl ConnectStreamRequest {
    /// Minimum encoded size of the fixed part, used to detect truncated
    /// frames before attempting to parse one.
    pub const MIN_LEN: usize = 4 + 1 + 1 + 4 * 3 + (1 + 4 + 1 + 8) + 4 + 4;

    pub fn encode(&self) -> Vec<u8> {
        let mut w = Vec::new();
        w.write_u32::<LittleEndian>(self.stream_id.0).unwrap();
        let dir: u8 = match self.direction {
            StreamDirection::Output => 0,
            StreamDirection::Input => 1,
            StreamDirection::PostMixPreDsp => 2,
            StreamDirection::Loopback => 3,
        };
        w.write_u8(dir).unwrap();
        w.write_u8(self.client_type_override.unwrap_or(0xFF)).unwrap();
        w.write_u32::<LittleEndian>(self.buffer_frames).unwrap();
        w.write_u32::<LittleEndian>(self.cb_threshold).unwrap();
        w.write_u32::<LittleEndian>(self.min_cb_level).unwrap();
        write_format(&mut w, &self.format).unwrap();
        w.write_u32::<LittleEndian>(self.client_shm_size).unwrap();
        w.write_u32::<LittleEndian>(self.effects).unwrap();
        w
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < Self::MIN_LEN {
            return Err(ProtoError::Truncated);
        }
        let mut c = Cursor::new(buf);
        let stream_id = StreamId(c.read_u32::<LittleEndian>().map_err(|_| ProtoError::Truncated)?);
        let dir_tag = c.read_u8().map_err(|_| ProtoError::Truncated)?;
        let direction = match dir_tag {
            0 => StreamDirection::Output,
            1 => StreamDirection::Input,
            2 => StreamDirection::PostMixPreDsp,
            3 => StreamDirection::Loopback,
            _ => return Err(ProtoError::InvalidParam),
        };
        let ct = c.read_u8().map_err(|_| ProtoError::Truncated)?;
        let client_type_override = if ct == 0xFF { None } else { Some(ct) };
        let buffer_frames = c.read_u32::<LittleEndian>().map_err(|_| ProtoError::Truncated)?;
        let cb_threshold = c.read_u32::<LittleEndian>().map_err(|_| ProtoError::Truncated)?;
        let min_cb_level = c.read_u32::<LittleEndian>().map_err(|_| ProtoError::Truncated)?;
        let format = read_format(&mut c)?;
        let client_shm_size = c.read_u32::<LittleEndian>().map_err(|_| ProtoError::Truncated)?;
        let effects = c.read_u32::<LittleEndian>().map_err(|_| ProtoError::Truncated)?;
        Ok(Self {
            stream_id,
            direction,
            client_type_override,
            buffer_frames,
            cb_threshold,
            min_cb_level,
            flags: StreamFlags::NONE,
            format,
            client_shm_size,
            effects,
        })
    }
}

/// `StreamConnected` reply payload.
#[derive(Debug, Clone, Copy)]
pub struct StreamConnectedReply {
    pub err: u32,
    pub stream_id: StreamId,
    pub format: AudioFormat,
    pub samples_shm_size: u32,
    pub effects: u32,
}

impl StreamConnectedReply {
    pub fn ok(stream_id: StreamId, format: AudioFormat, samples_shm_size: u32, effects: u32) -> Self {
        Self { err: 0, stream_id, format, samples_shm_size, effects }
    }

    pub fn failure(err: u32) -> Self {
        Self {
            err,
            stream_id: StreamId(0),
            format: AudioFormat::new(SampleFormat::S16Le, 48_000, ChannelLayout::stereo(), 2)
                .expect("stereo 48kHz S16LE is always a valid format"),
            samples_shm_size: 0,
            effects: 0,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut w = Vec::new();
        w.write_u32::<LittleEndian>(self.err).unwrap();
        w.write_u32::<LittleEndian>(self.stream_id.0).unwrap();
        write_format(&mut w, &self.format).unwrap();
        w.write_u32::<LittleEndian>(self.samples_shm_size).unwrap();
        w.write_u32::<LittleEndian>(self.effects).unwrap();
        w
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        let mut c = Cursor::new(buf);
        let err = c.read_u32::<LittleEndian>().map_err(|_| ProtoError::Truncated)?;
        let stream_id = StreamId(c.read_u32::<LittleEndian>().map_err(|_| ProtoError::Truncated)?);
        let format = read_format(&mut c)?;
        let samples_shm_size = c.read_u32::<LittleEndian>().map_err(|_| ProtoError::Truncated)?;
        let effects = c.read_u32::<LittleEndian>().map_err(|_| ProtoError::Truncated)?;
        Ok(Self { err, stream_id, format, samples_shm_size, effects })
    }
}

/// `DisconnectStream` request payload.
#[derive(Debug, Clone, Copy)]
pub struct DisconnectStreamRequest {
    pub stream_id: StreamId,
}

impl DisconnectStreamRequest {
    pub const MIN_LEN: usize = 4;

    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < Self::MIN_LEN {
            return Err(ProtoError::Truncated);
        }
        let mut c = Cursor::new(buf);
        let stream_id = StreamId(c.read_u32::<LittleEndian>().map_err(|_| ProtoError::Truncated)?);
        Ok(Self { stream_id })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut w = Vec::new();
        w.write_u32::<LittleEndian>(self.stream_id.0).unwrap();
        w
    }
}

/// `SetSystemVolume` request payload: volume in `[0, 100]`.
#[derive(Debug, Clone, Copy)]
pub struct SetSystemVolumeRequest {
    pub volume: u8,
}

impl SetSystemVolumeRequest {
    pub const MIN_LEN: usize = 1;

    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < Self::MIN_LEN {
            return Err(ProtoError::Truncated);
        }
        Ok(Self { volume: buf[0].min(100) })
    }
}

/// `ClientConnected` reply payload (fd carries the server state shm).
#[derive(Debug, Clone, Copy)]
pub struct ClientConnectedReply {
    pub client_id: u16,
}

impl ClientConnectedReply {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Vec::new();
        w.write_u16::<LittleEndian>(self.client_id).unwrap();
        w
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use snd_core::SampleFormat;

    #[test]
    fn connect_stream_request_round_trips() {
        let req = ConnectStreamRequest {
            stream_id: StreamId::new(3, 1),
            direction: StreamDirection::Output,
            client_type_override: None,
            buffer_frames: 1024,
            cb_threshold: 512,
            min_cb_level: 256,
            flags: StreamFlags::NONE,
            format: AudioFormat::new(SampleFormat::S16Le, 48_000, ChannelLayout::stereo(), 2).unwrap(),
            client_shm_size: 0,
            effects: 0,
        };
        let encoded = req.encode();
        let decoded = ConnectStreamRequest::decode(&encoded).unwrap();
        assert_eq!(decoded.stream_id, req.stream_id);
        assert_eq!(decoded.buffer_frames, 1024);
        assert_eq!(decoded.format.frame_rate, 48_000);
    }

    #[test]
    fn truncated_connect_stream_is_rejected() {
        let req = ConnectStreamRequest {
            stream_id: StreamId::new(1, 0),
            direction: StreamDirection::Output,
            client_type_override: None,
            buffer_frames: 1024,
            cb_threshold: 512,
            min_cb_level: 256,
            flags: StreamFlags::NONE,
            format: AudioFormat::new(SampleFormat::S16Le, 48_000, ChannelLayout::stereo(), 2).unwrap(),
            client_shm_size: 0,
            effects: 0,
        };
        let mut encoded = req.encode();
        encoded.truncate(encoded.len() - 4);
        assert!(ConnectStreamRequest::decode(&encoded).is_err());
    }

    #[test]
    fn stream_connected_reply_round_trips_format_and_effects() {
        let reply = StreamConnectedReply::ok(
            StreamId::new(3, 1),
            AudioFormat::new(SampleFormat::S16Le, 44_100, ChannelLayout::stereo(), 2).unwrap(),
            8192,
            0b101,
        );
        let decoded = StreamConnectedReply::decode(&reply.encode()).unwrap();
        assert_eq!(decoded.err, 0);
        assert_eq!(decoded.stream_id, reply.stream_id);
        assert_eq!(decoded.format.frame_rate, 44_100);
        assert_eq!(decoded.samples_shm_size, 8192);
        assert_eq!(decoded.effects, 0b101);
    }

    #[test]
    fn message_id_round_trips_known_ids() {
        assert_eq!(MessageId::from_u32(1), Some(MessageId::ConnectStream));
        assert_eq!(MessageId::from_u32(9999), None);
    }

    #[test]
    fn connect_stream_fd_count_depends_on_client_shm() {
        assert_eq!(MessageId::ConnectStream.expected_fd_count(false), 1);
        assert_eq!(MessageId::ConnectStream.expected_fd_count(true), 2);
    }
}
