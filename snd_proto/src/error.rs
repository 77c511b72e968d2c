//! Protocol-level error type.

use core::fmt;

use snd_core::CoreError;

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtoError {
    /// Frame length shorter than the fixed part of its message type.
    Truncated,
    /// Ancillary fd count did not match what the message type requires.
    FdCountMismatch,
    /// Stream id's owner bits don't match the connection's client id.
    NotOwner,
    /// Requested stream direction isn't allowed under this client's policy.
    DirectionNotAllowed,
    /// Format or buffering parameters failed validation.
    InvalidParam,
    /// The underlying socket returned an I/O error.
    Io,
}

impl fmt::Display for ProtoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtoError::Truncated => write!(f, "truncated message"),
            ProtoError::FdCountMismatch => write!(f, "fd count mismatch"),
            ProtoError::NotOwner => write!(f, "stream id not owned by client"),
            ProtoError::DirectionNotAllowed => write!(f, "stream direction not allowed"),
            ProtoError::InvalidParam => write!(f, "invalid parameter"),
            ProtoError::Io => write!(f, "socket I/O error"),
        }
    }
}

impl std::error::Error for ProtoError {}

impl From<std::io::Error> for ProtoError {
    fn from(_: std::io::Error) -> Self {
        ProtoError::Io
    }
}

impl From<ProtoError> for CoreError {
    fn from(e: ProtoError) -> Self {
        match e {
            ProtoError::Truncated | ProtoError::FdCountMismatch => CoreError::InvalidMessage,
            ProtoError::NotOwner | ProtoError::DirectionNotAllowed | ProtoError::InvalidParam => CoreError::InvalidParam,
            ProtoError::Io => CoreError::StreamLost,
        }
    }
}

pub type Result<T> = core::result::Result<T, ProtoError>;
