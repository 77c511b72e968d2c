//! # snd_shm
//!
//! The per-stream shared-memory ring (`AudioShm`): a wait-free
//! single-producer/single-consumer double buffer carrying PCM frames
//! between a client process and the server's audio thread, backed by two
//! `memfd_create`'d segments whose file descriptors travel over the
//! control socket as `SCM_RIGHTS` ancillary data.

pub mod error;
pub mod header;
pub mod posix;
pub mod ring;

pub use error::{Result, ShmError};
pub use header::{ShmControlRaw, ShmHeader};
pub use posix::ShmSegment;
pub use ring::AudioShm;
