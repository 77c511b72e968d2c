//! Top-level server error type.

use core::fmt;

use snd_core::CoreError;
use snd_proto::ProtoError;
use snd_shm::ShmError;

#[derive(Debug)]
pub enum ServerError {
    Io(std::io::Error),
    Proto(ProtoError),
    Core(CoreError),
    Shm(ShmError),
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerError::Io(e) => write!(f, "io error: {e}"),
            ServerError::Proto(e) => write!(f, "protocol error: {e}"),
            ServerError::Core(e) => write!(f, "core error: {e}"),
            ServerError::Shm(e) => write!(f, "shared memory error: {e}"),
        }
    }
}

impl std::error::Error for ServerError {}

impl From<std::io::Error> for ServerError {
    fn from(e: std::io::Error) -> Self {
        ServerError::Io(e)
    }
}

impl From<ProtoError> for ServerError {
    fn from(e: ProtoError) -> Self {
        ServerError::Proto(e)
    }
}

impl From<CoreError> for ServerError {
    fn from(e: CoreError) -> Self {
        ServerError::Core(e)
    }
}

impl From<ShmError> for ServerError {
    fn from(e: ShmError) -> Self {
        ServerError::Shm(e)
    }
}

pub type Result<T> = core::result::Result<T, ServerError>;
