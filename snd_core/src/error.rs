//! Error types shared across the audio server workspace.
//!
//! Mirrors the C-compatible manual-enum pattern used throughout this
//! workspace: a `#[repr(C)]` discriminant, a hand-written `Display`, and a
//! `std::error::Error` impl, rather than a derive-macro-based error crate.

use core::fmt;

/// The seven error kinds the core must distinguish, independent of which
/// subsystem raised them.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CoreError {
    /// Bad frame length, bad message id for the connection's direction, or a
    /// file descriptor count that doesn't match the message type. Fatal to
    /// the connection.
    InvalidMessage,
    /// Stream id not owned by the client, direction not allowed, invalid
    /// format, or an shm-size paradox. The connection survives; a non-zero
    /// error is replied.
    InvalidParam,
    /// Shared-memory allocation failure or fd-table exhaustion.
    ResourceExhausted,
    /// `EAGAIN`/`ESTRPIPE`-class error from ALSA or a socket; recoverable
    /// with bounded retry.
    DeviceTransient,
    /// Unrecoverable device error; the device is detached and closed.
    DeviceFatal,
    /// The stream's audio fd returned `EPIPE` or the client hung up.
    StreamLost,
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoreError::InvalidMessage => write!(f, "invalid message framing"),
            CoreError::InvalidParam => write!(f, "invalid parameter"),
            CoreError::ResourceExhausted => write!(f, "resource exhausted"),
            CoreError::DeviceTransient => write!(f, "transient device error"),
            CoreError::DeviceFatal => write!(f, "fatal device error"),
            CoreError::StreamLost => write!(f, "stream lost"),
        }
    }
}

impl std::error::Error for CoreError {}

impl From<std::io::Error> for CoreError {
    fn from(e: std::io::Error) -> Self {
        use std::io::ErrorKind::*;
        match e.kind() {
            WouldBlock => CoreError::DeviceTransient,
            BrokenPipe | ConnectionReset | UnexpectedEof => CoreError::StreamLost,
            _ => CoreError::DeviceFatal,
        }
    }
}

/// Result type alias used across the workspace's new `snd_*` crates.
pub type Result<T> = core::result::Result<T, CoreError>;
