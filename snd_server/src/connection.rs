//! Per-connection handling: reads frames off one client's control socket,
//! dispatches them through that client's [`RClient`], and mirrors
//! `ConnectStream`/`DisconnectStream` outcomes into the shared audio thread.

use std::io::Write;
use std::os::fd::OwnedFd;
use std::os::unix::net::UnixStream;
use std::sync::{Arc, Mutex};

use tracing::{debug, info, warn};

use snd_core::StreamId;
use snd_proto::fds::recv_with_fds;
use snd_proto::message::{ClientConnectedReply, DisconnectStreamRequest, HEADER_LEN};
use snd_proto::{ClientType, Frame, MessageId, ProtoError, RClient};
use snd_shm::{AudioShm, ShmSegment};
use snd_thread::{AudioThread, Stream};

use crate::error::{Result, ServerError};

/// Reads one full frame (header + payload) together with any attached
/// `SCM_RIGHTS` fds. The length prefix is peeked first so the subsequent
/// `recvmsg` can size its buffer to the whole frame in one call — splitting
/// header and payload into separate reads would risk the payload's fds
/// landing on whichever read happens to consume their bytes.
fn read_frame_with_fds(stream: &UnixStream) -> Result<Option<(u32, Vec<u8>, Vec<OwnedFd>)>> {
    let mut len_peek = [0u8; 4];
    let n = stream.peek(&mut len_peek)?;
    if n == 0 {
        return Ok(None);
    }
    if n < 4 {
        return Err(ServerError::Proto(ProtoError::Truncated));
    }
    let total_len = u32::from_le_bytes(len_peek) as usize;
    if total_len < HEADER_LEN {
        return Err(ServerError::Proto(ProtoError::Truncated));
    }

    let (frame_bytes, fds) = recv_with_fds(stream, total_len)?;
    let id = u32::from_le_bytes([frame_bytes[4], frame_bytes[5], frame_bytes[6], frame_bytes[7]]);
    let payload = frame_bytes[HEADER_LEN..].to_vec();
    Ok(Some((id, payload, fds)))
}

fn send_reply(stream: &UnixStream, id: MessageId, payload: Vec<u8>, fds: Vec<OwnedFd>) -> Result<()> {
    let frame = Frame::new(id, payload);
    let mut buf = Vec::new();
    frame.write_to(&mut buf)?;
    let borrowed: Vec<_> = fds.iter().map(|fd| {
        use std::os::fd::AsFd;
        fd.as_fd()
    }).collect();
    snd_proto::fds::send_with_fds(stream, &buf, &borrowed)?;
    Ok(())
}

pub fn handle_connection(
    stream: UnixStream,
    client_id: u16,
    client_type: ClientType,
    audio: Arc<Mutex<AudioThread>>,
    default_device: String,
) -> Result<()> {
    info!(client_id, ?client_type, "client connected");

    let hello = ClientConnectedReply { client_id };
    let mut w: &UnixStream = &stream;
    Frame::new(MessageId::ClientConnected, hello.encode()).write_to(&mut w)?;
    w.flush()?;

    let mut rclient = RClient::new(client_id, client_type);
    let mut owned_streams: Vec<StreamId> = Vec::new();

    loop {
        let (id, payload, fds) = match read_frame_with_fds(&stream)? {
            Some(v) => v,
            None => break,
        };

        let incoming_id = MessageId::from_u32(id);
        let dispatch = match rclient.handle_message(id, &payload, fds) {
            Ok(d) => d,
            Err(e) => {
                warn!(client_id, error = %e, "fatal protocol error, closing connection");
                break;
            }
        };

        // `ConnectStream`'s success is decoded straight out of its own reply
        // payload (err == 0, stream_id in bytes [4..8]) rather than
        // recomputed from `RClient`'s table — the reply already carries it.
        if let Some((MessageId::StreamConnected, reply_payload)) = &dispatch.reply {
            if reply_payload.len() >= 8 && u32::from_le_bytes([reply_payload[0], reply_payload[1], reply_payload[2], reply_payload[3]]) == 0 {
                let stream_id = StreamId(u32::from_le_bytes([reply_payload[4], reply_payload[5], reply_payload[6], reply_payload[7]]));
                owned_streams.push(stream_id);
                if let Some(owned) = rclient.stream(stream_id) {
                    attach_to_audio_thread(&audio, &default_device, stream_id, owned);
                }
            }
        } else if incoming_id == Some(MessageId::DisconnectStream) {
            if let Ok(req) = DisconnectStreamRequest::decode(&payload) {
                owned_streams.retain(|id| *id != req.stream_id);
                let _ = audio.lock().unwrap().remove_stream(req.stream_id);
            }
        }

        if let Some((reply_id, reply_payload)) = dispatch.reply {
            if let Err(e) = send_reply(&stream, reply_id, reply_payload, dispatch.reply_fds) {
                warn!(client_id, error = %e, "failed to send reply, closing connection");
                break;
            }
        }
    }

    for stream_id in owned_streams {
        let _ = audio.lock().unwrap().remove_stream(stream_id);
    }
    debug!(client_id, "client disconnected, streams reclaimed");
    Ok(())
}

/// Maps the same shared-memory pages a second time for the audio thread's
/// own `AudioShm` handle, mirroring what a real client process would do
/// after receiving the fds over the control socket — here both "sides"
/// just happen to live in the same process.
fn remap_shm(owned: &snd_proto::OwnedStream) -> Result<AudioShm> {
    let header_len = owned.shm.header_segment().len();
    let header_fd = owned.shm.header_segment().try_clone_fd()?;
    let header = ShmSegment::from_fd(header_fd, header_len)?;

    let samples_len = owned.shm.samples_segment().len();
    let samples_fd = owned.shm.samples_segment().try_clone_fd()?;
    let samples = ShmSegment::from_fd(samples_fd, samples_len)?;

    Ok(AudioShm::from_segments(header, samples))
}

fn attach_to_audio_thread(audio: &Arc<Mutex<AudioThread>>, default_device: &str, stream_id: StreamId, owned: &snd_proto::OwnedStream) {
    let mut guard = audio.lock().unwrap();
    let Some(device_key) = guard.device_key(default_device) else {
        warn!(device = default_device, "no such device, stream will not be mixed");
        return;
    };
    let shm = match remap_shm(owned) {
        Ok(shm) => shm,
        Err(e) => {
            warn!(stream_id = stream_id.0, error = %e, "failed to map stream shm into audio thread");
            return;
        }
    };
    guard.attach_stream(device_key, Stream::new(owned.meta, shm));
}
