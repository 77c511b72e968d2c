//! Ancillary file descriptor passing (`SCM_RIGHTS`) over a `UnixStream`.
//!
//! The shared-memory fds created by [`snd_shm::posix::ShmSegment::create`]
//! travel alongside a message's fixed payload, never inside it — a
//! `ConnectStream` reply carries its samples-shm fd this way rather than
//! encoding a raw number that would be meaningless in the peer's fd table.

use std::io::{IoSlice, IoSliceMut};
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, FromRawFd, OwnedFd};
use std::os::unix::net::UnixStream;

use nix::sys::socket::{self, ControlMessage, ControlMessageOwned, MsgFlags};

use crate::error::{ProtoError, Result};

const MAX_FDS: usize = 2;

/// Sends `payload` on `stream` with `fds` attached as `SCM_RIGHTS`.
pub fn send_with_fds(stream: &UnixStream, payload: &[u8], fds: &[BorrowedFd<'_>]) -> Result<()> {
    let iov = [IoSlice::new(payload)];
    let cmsg = if fds.is_empty() { vec![] } else { vec![ControlMessage::ScmRights(fds)] };
    socket::sendmsg::<()>(stream.as_fd().as_raw_fd(), &iov, &cmsg, MsgFlags::empty(), None)
        .map_err(|_| ProtoError::Io)?;
    Ok(())
}

/// Receives up to `MAX_FDS` ancillary descriptors alongside `payload_len`
/// bytes of fixed payload. Returns the payload and whatever fds arrived —
/// callers compare `fds.len()` against the message type's expectation and
/// raise [`ProtoError::FdCountMismatch`] themselves, since only the
/// dispatcher knows what the message type required.
pub fn recv_with_fds(stream: &UnixStream, payload_len: usize) -> Result<(Vec<u8>, Vec<OwnedFd>)> {
    let mut payload = vec![0u8; payload_len];
    let mut cmsg_buf = nix::cmsg_space!([std::os::fd::RawFd; MAX_FDS]);
    let mut iov = [IoSliceMut::new(&mut payload)];

    let msg = socket::recvmsg::<()>(stream.as_fd().as_raw_fd(), &mut iov, Some(&mut cmsg_buf), MsgFlags::empty())
        .map_err(|_| ProtoError::Io)?;

    let mut fds = Vec::new();
    for cmsg in msg.cmsgs().map_err(|_| ProtoError::Io)? {
        if let ControlMessageOwned::ScmRights(raw_fds) = cmsg {
            for raw in raw_fds {
                // SAFETY: recvmsg with ScmRights hands back fds the kernel
                // just duped into our fd table; we own each one exactly once.
                fds.push(unsafe { OwnedFd::from_raw_fd(raw) });
            }
        }
    }

    if msg.bytes < payload_len {
        return Err(ProtoError::Truncated);
    }

    Ok((payload, fds))
}
