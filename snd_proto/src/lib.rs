//! # snd_proto
//!
//! The control-socket wire protocol: message catalog and binary encoding
//! ([`message`]), length-prefixed framing ([`framing`]), `SCM_RIGHTS`
//! ancillary fd passing ([`fds`]), and the per-connection endpoint that ties
//! them together ([`rclient`]).

pub mod error;
pub mod fds;
pub mod framing;
pub mod message;
pub mod rclient;

pub use error::{ProtoError, Result};
pub use framing::Frame;
pub use message::MessageId;
pub use rclient::{ClientType, Dispatch, OwnedStream, RClient};
