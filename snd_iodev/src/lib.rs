//! # snd_iodev
//!
//! Device abstraction: the `IoDev` state machine, the `IoDevBackend` trait
//! implemented by each concrete variant (ALSA, silent/loopback; paced
//! socket variants live in `snd_bt`), channel conversion, and resampling.

pub mod alsa_backend;
pub mod backend;
pub mod convert;
pub mod error;
pub mod iodev;
pub mod silent;
pub mod state;

pub use alsa_backend::AlsaIoDev;
pub use backend::{HwLevel, IoDevBackend, NegotiatedFormat};
pub use convert::{ChannelConvMatrix, RateConverter};
pub use error::{IoDevError, Result};
pub use iodev::IoDev;
pub use silent::SilentIoDev;
pub use state::DevState;
