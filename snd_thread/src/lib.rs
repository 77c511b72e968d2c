//! # snd_thread
//!
//! The real-time audio thread: mix ops dispatch ([`mixops`]), the
//! main-thread command channel ([`command`]), the audio thread's stream
//! representation ([`stream`]), sample format conversion ([`sampleconv`]),
//! and the scheduler loop itself ([`audio_thread`]).

pub mod audio_thread;
pub mod command;
pub mod mixops;
pub mod sampleconv;
pub mod stream;

pub use audio_thread::AudioThread;
pub use command::{channel, Command, CommandError, CommandReceiver, CommandResult, CommandSender};
pub use mixops::{select as select_mix_ops, Fma, MixOps, Scalar};
pub use stream::Stream;
