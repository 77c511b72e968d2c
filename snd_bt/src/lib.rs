//! # snd_bt
//!
//! Bluetooth transport `IoDevBackend` variants: A2DP's unidirectional
//! paced socket ([`paced`]) and HFP's duplex socket ([`hfp`]), plus the
//! suspend-request coalescing they share ([`suspend`]).

pub mod hfp;
pub mod paced;
pub mod suspend;

pub use hfp::HfpIoDev;
pub use paced::{PacedSocketIoDev, TickOutcome, A2DP_WRITE_BLOCK_MS};
pub use suspend::{SuspendReason, SuspendSupervisor};
