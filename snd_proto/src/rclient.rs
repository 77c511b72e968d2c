//! `RClient`: the per-connection protocol endpoint. Owns the socket, the
//! client's stream table, and the policy governing which stream directions
//! this client is allowed to open.

use std::os::fd::OwnedFd;

use snd_core::{arena::Arena, format::StreamDirection, stream::StreamMeta, stream_id::StreamId};
use snd_shm::AudioShm;

use crate::error::{ProtoError, Result};
use crate::message::{ConnectStreamRequest, DisconnectStreamRequest, MessageId, SetSystemVolumeRequest, StreamConnectedReply};

/// What a connection is allowed to do, fixed at accept time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientType {
    /// Full control: may open streams in any direction and issue system
    /// control messages (volume, mute, AEC ref, iodev migration).
    Full,
    PlaybackOnly,
    CaptureOnly,
    UnifiedPlaybackAndCapture,
    /// Pinned client type; `ConnectStream.client_type` fields are silently
    /// rewritten to match regardless of what the client sends.
    Plugin,
}

impl ClientType {
    fn allows(self, dir: StreamDirection) -> bool {
        match self {
            ClientType::Full | ClientType::UnifiedPlaybackAndCapture | ClientType::Plugin => true,
            ClientType::PlaybackOnly => matches!(dir, StreamDirection::Output),
            ClientType::CaptureOnly => matches!(dir, StreamDirection::Input | StreamDirection::Loopback),
        }
    }
}

/// A live stream owned by this client: its control-plane metadata plus the
/// shared-memory ring backing it.
pub struct OwnedStream {
    pub meta: StreamMeta,
    pub shm: AudioShm,
}

/// Result of dispatching one message: the reply frame to send (if any) and
/// any fds that must accompany it.
pub struct Dispatch {
    pub reply: Option<(MessageId, Vec<u8>)>,
    pub reply_fds: Vec<OwnedFd>,
}

impl Dispatch {
    fn none() -> Self {
        Self { reply: None, reply_fds: Vec::new() }
    }

    fn with(id: MessageId, payload: Vec<u8>, fds: Vec<OwnedFd>) -> Self {
        Self { reply: Some((id, payload)), reply_fds: fds }
    }
}

pub struct RClient {
    pub client_id: u16,
    pub client_type: ClientType,
    streams: Arena<OwnedStream>,
    by_stream_id: std::collections::HashMap<u32, snd_core::arena::Key>,
}

impl RClient {
    pub fn new(client_id: u16, client_type: ClientType) -> Self {
        Self { client_id, client_type, streams: Arena::new(), by_stream_id: std::collections::HashMap::new() }
    }

    pub fn stream_count(&self) -> usize {
        self.streams.len()
    }

    pub fn stream(&self, id: StreamId) -> Option<&OwnedStream> {
        self.by_stream_id.get(&id.0).and_then(|k| self.streams.get(*k))
    }

    /// Dispatches one incoming message. `fds` are the ancillary descriptors
    /// that arrived alongside the fixed payload; their count must match
    /// [`MessageId::expected_fd_count`] for the message's declared type or
    /// this is a fatal [`ProtoError::FdCountMismatch`] and every fd in
    /// `fds` is dropped (closed) by the caller discarding the `Vec`.
    pub fn handle_message(&mut self, raw_id: u32, payload: &[u8], fds: Vec<OwnedFd>) -> Result<Dispatch> {
        let Some(id) = MessageId::from_u32(raw_id) else {
            // Unknown ids are forward-compatible no-ops; any fds that came
            // with them are simply dropped when `fds` goes out of scope.
            return Ok(Dispatch::none());
        };

        if payload.len() < min_payload_len(id) {
            return Err(ProtoError::Truncated);
        }

        match id {
            MessageId::ConnectStream => self.handle_connect_stream(payload, fds),
            MessageId::DisconnectStream => {
                if !fds.is_empty() {
                    return Err(ProtoError::FdCountMismatch);
                }
                self.handle_disconnect_stream(payload)
            }
            MessageId::SetSystemVolume => {
                if !fds.is_empty() {
                    return Err(ProtoError::FdCountMismatch);
                }
                let _req = SetSystemVolumeRequest::decode(payload)?;
                Ok(Dispatch::none())
            }
            MessageId::SetSystemMute | MessageId::SetAecRef | MessageId::SwitchStreamTypeIodev => {
                if !fds.is_empty() {
                    return Err(ProtoError::FdCountMismatch);
                }
                Ok(Dispatch::none())
            }
            MessageId::ClientConnected | MessageId::StreamConnected | MessageId::StreamReattach => {
                // Client-bound only; a peer sending one of these back at us
                // is nonsensical but not fatal — ignore it.
                Ok(Dispatch::none())
            }
        }
    }

    fn handle_connect_stream(&mut self, payload: &[u8], fds: Vec<OwnedFd>) -> Result<Dispatch> {
        let expected_fds = if payload.len() >= ConnectStreamRequest::MIN_LEN && read_client_shm_requested(payload) {
            2
        } else {
            1
        };
        if fds.len() != expected_fds {
            return Err(ProtoError::FdCountMismatch);
        }

        let mut req = match ConnectStreamRequest::decode(payload) {
            Ok(r) => r,
            Err(e) => return Ok(self.fail_connect(e)),
        };

        if self.client_type == ClientType::Plugin {
            req.client_type_override = Some(ClientTypeTag::Plugin as u8);
        }

        if req.stream_id.client_id() != self.client_id {
            return Ok(self.fail_connect(ProtoError::NotOwner));
        }
        if !self.client_type.allows(req.direction) {
            return Ok(self.fail_connect(ProtoError::DirectionNotAllowed));
        }

        let meta = StreamMeta {
            id: req.stream_id,
            direction: req.direction,
            format: req.format,
            buffer_frames: req.buffer_frames,
            cb_threshold: req.cb_threshold,
            min_cb_level: req.min_cb_level,
            flags: req.flags,
            volume_scaler: 1.0,
            owner_client: self.client_id,
            attached_device: None,
        };
        if meta.validate().is_err() {
            return Ok(self.fail_connect(ProtoError::InvalidParam));
        }

        let used_size = (req.buffer_frames as usize) * req.format.frame_bytes();
        let shm = match AudioShm::create(used_size, req.format.frame_bytes()) {
            Ok(shm) => shm,
            Err(_) => return Ok(self.fail_connect(ProtoError::Io)),
        };

        let header_fd = match shm.header_segment().try_clone_fd() {
            Ok(fd) => fd,
            Err(_) => return Ok(self.fail_connect(ProtoError::Io)),
        };
        let samples_fd = match shm.samples_segment().try_clone_fd() {
            Ok(fd) => fd,
            Err(_) => return Ok(self.fail_connect(ProtoError::Io)),
        };

        let samples_shm_size = shm.samples_segment().len() as u32;
        let key = self.streams.insert(OwnedStream { meta, shm });
        self.by_stream_id.insert(req.stream_id.0, key);

        let reply = StreamConnectedReply::ok(req.stream_id, req.format, samples_shm_size, req.effects);
        Ok(Dispatch::with(MessageId::StreamConnected, reply.encode(), vec![header_fd, samples_fd]))
    }

    fn fail_connect(&self, err: ProtoError) -> Dispatch {
        let code: u32 = match err {
            ProtoError::Truncated | ProtoError::FdCountMismatch => 1,
            ProtoError::NotOwner | ProtoError::DirectionNotAllowed | ProtoError::InvalidParam => 2,
            ProtoError::Io => 3,
        };
        let reply = StreamConnectedReply::failure(code);
        // Any fds passed in by the caller are dropped before we get here
        // (they're consumed by value and never stored on failure paths).
        Dispatch::with(MessageId::StreamConnected, reply.encode(), Vec::new())
    }

    fn handle_disconnect_stream(&mut self, payload: &[u8]) -> Result<Dispatch> {
        let req = DisconnectStreamRequest::decode(payload)?;
        if let Some(key) = self.by_stream_id.remove(&req.stream_id.0) {
            self.streams.remove(key);
        }
        Ok(Dispatch::none())
    }
}

/// Tag values mirrored from the wire encoding in `message.rs`; kept local
/// since only the plugin-override path needs a symbolic name for "plugin".
#[repr(u8)]
enum ClientTypeTag {
    Plugin = 4,
}

fn read_client_shm_requested(payload: &[u8]) -> bool {
    if payload.len() < ConnectStreamRequest::MIN_LEN {
        return false;
    }
    let tail = &payload[payload.len() - 4..];
    u32::from_le_bytes([tail[0], tail[1], tail[2], tail[3]]) > 0
}

fn min_payload_len(id: MessageId) -> usize {
    match id {
        MessageId::ConnectStream => ConnectStreamRequest::MIN_LEN,
        MessageId::DisconnectStream => DisconnectStreamRequest::MIN_LEN,
        MessageId::SetSystemVolume => SetSystemVolumeRequest::MIN_LEN,
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use snd_core::{AudioFormat, ChannelLayout, SampleFormat};

    fn sample_request(client_id: u16) -> ConnectStreamRequest {
        ConnectStreamRequest {
            stream_id: StreamId::new(client_id, 0),
            direction: StreamDirection::Output,
            client_type_override: None,
            buffer_frames: 1024,
            cb_threshold: 512,
            min_cb_level: 256,
            flags: snd_core::stream::StreamFlags::NONE,
            format: AudioFormat::new(SampleFormat::S16Le, 48_000, ChannelLayout::stereo(), 2).unwrap(),
            client_shm_size: 0,
            effects: 0,
        }
    }

    #[test]
    fn connect_stream_from_correct_owner_succeeds() {
        let mut rc = RClient::new(3, ClientType::Full);
        let req = sample_request(3);
        let dispatch = rc.handle_message(MessageId::ConnectStream as u32, &req.encode(), vec![dummy_fd()]).unwrap();
        assert!(dispatch.reply.is_some());
        assert_eq!(dispatch.reply_fds.len(), 2);
        assert_eq!(rc.stream_count(), 1);
    }

    #[test]
    fn connect_stream_with_mismatched_owner_is_rejected_not_fatal() {
        let mut rc = RClient::new(3, ClientType::Full);
        let req = sample_request(7);
        let dispatch = rc.handle_message(MessageId::ConnectStream as u32, &req.encode(), vec![dummy_fd()]).unwrap();
        let (_id, payload) = dispatch.reply.unwrap();
        assert_ne!(payload[0], 0);
        assert_eq!(rc.stream_count(), 0);
    }

    #[test]
    fn connect_stream_wrong_fd_count_is_fatal() {
        let mut rc = RClient::new(3, ClientType::Full);
        let req = sample_request(3);
        let err = rc.handle_message(MessageId::ConnectStream as u32, &req.encode(), vec![]).unwrap_err();
        assert_eq!(err, ProtoError::FdCountMismatch);
    }

    #[test]
    fn playback_only_client_cannot_open_input_stream() {
        let mut rc = RClient::new(3, ClientType::PlaybackOnly);
        let mut req = sample_request(3);
        req.direction = StreamDirection::Input;
        let dispatch = rc.handle_message(MessageId::ConnectStream as u32, &req.encode(), vec![dummy_fd()]).unwrap();
        let (_id, payload) = dispatch.reply.unwrap();
        assert_ne!(payload[0], 0);
    }

    #[test]
    fn disconnect_removes_stream() {
        let mut rc = RClient::new(3, ClientType::Full);
        let req = sample_request(3);
        rc.handle_message(MessageId::ConnectStream as u32, &req.encode(), vec![dummy_fd()]).unwrap();
        assert_eq!(rc.stream_count(), 1);

        let dreq = DisconnectStreamRequest { stream_id: req.stream_id };
        rc.handle_message(MessageId::DisconnectStream as u32, &dreq.encode(), vec![]).unwrap();
        assert_eq!(rc.stream_count(), 0);
    }

    #[test]
    fn unknown_message_id_is_ignored() {
        let mut rc = RClient::new(3, ClientType::Full);
        let dispatch = rc.handle_message(0xDEAD_BEEF, &[], vec![]).unwrap();
        assert!(dispatch.reply.is_none());
    }

    #[test]
    fn truncated_connect_stream_is_a_fatal_error() {
        let mut rc = RClient::new(3, ClientType::Full);
        let dispatch = rc.handle_message(MessageId::ConnectStream as u32, &[0u8; 2], vec![dummy_fd()]);
        assert!(dispatch.is_err());
    }

    fn dummy_fd() -> OwnedFd {
        use std::fs::File;
        let f = File::open("/dev/null").unwrap();
        OwnedFd::from(f)
    }
}
