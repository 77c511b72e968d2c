//! # snd_core
//!
//! Shared primitives for the audio server workspace: audio formats and
//! channel layouts, stream identifiers, the generation-checked arena used
//! in place of intrusive linked lists, CPU feature detection for mix-ops
//! dispatch, and the process-wide clock.

pub mod arena;
pub mod clock;
pub mod cpu;
pub mod error;
pub mod format;
pub mod stream;
pub mod stream_id;

pub use arena::{Arena, Key as ArenaKey};
pub use clock::{ClockSync, ClockTime};
pub use cpu::CpuFeatures;
pub use error::{CoreError, Result};
pub use format::{AudioFormat, Channel, ChannelLayout, SampleFormat, StreamDirection};
pub use stream::{StreamFlags, StreamMeta};
pub use stream_id::StreamId;

/// Replaces the legacy process-wide mutable globals (mix ops table, atlog,
/// btlog) with a context constructed once at process init and threaded
/// through explicitly.
pub struct CoreRuntime {
    pub cpu_features: CpuFeatures,
    pub clock: ClockSync,
}

impl CoreRuntime {
    pub fn new() -> Self {
        Self { cpu_features: CpuFeatures::detect(), clock: ClockSync::new() }
    }
}

impl Default for CoreRuntime {
    fn default() -> Self {
        Self::new()
    }
}
