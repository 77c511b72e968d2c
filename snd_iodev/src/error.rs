//! Device-level error type.

use core::fmt;

use snd_core::CoreError;

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IoDevError {
    /// `EAGAIN`/`ESTRPIPE`-class error: retry with bounded backoff.
    Transient,
    /// Unrecoverable: detach every stream, close the device.
    Fatal,
    /// Requested format/channel layout could not be negotiated.
    UnsupportedFormat,
    /// Operation invalid in the device's current state (e.g. `get_buffer`
    /// on a closed device).
    WrongState,
}

impl fmt::Display for IoDevError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IoDevError::Transient => write!(f, "transient device error"),
            IoDevError::Fatal => write!(f, "fatal device error"),
            IoDevError::UnsupportedFormat => write!(f, "unsupported format"),
            IoDevError::WrongState => write!(f, "operation invalid in current device state"),
        }
    }
}

impl std::error::Error for IoDevError {}

impl From<IoDevError> for CoreError {
    fn from(e: IoDevError) -> Self {
        match e {
            IoDevError::Transient => CoreError::DeviceTransient,
            IoDevError::Fatal | IoDevError::UnsupportedFormat | IoDevError::WrongState => CoreError::DeviceFatal,
        }
    }
}

pub type Result<T> = core::result::Result<T, IoDevError>;
