//! Error type for the shared-memory ring.

use core::fmt;

use snd_core::CoreError;

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShmError {
    /// `memfd_create`/`ftruncate`/`mmap` failed.
    Alloc,
    /// Operation attempted before the segment was mapped.
    NotMapped,
}

impl fmt::Display for ShmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShmError::Alloc => write!(f, "shared memory allocation failed"),
            ShmError::NotMapped => write!(f, "shared memory segment not mapped"),
        }
    }
}

impl std::error::Error for ShmError {}

impl From<ShmError> for CoreError {
    fn from(e: ShmError) -> Self {
        match e {
            ShmError::Alloc => CoreError::ResourceExhausted,
            ShmError::NotMapped => CoreError::InvalidParam,
        }
    }
}

pub type Result<T> = core::result::Result<T, ShmError>;
