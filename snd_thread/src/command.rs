//! The main-thread → audio-thread command channel. Every mutation of the
//! audio thread's device/stream tables crosses this channel rather than
//! being applied opportunistically from the main thread, so the audio
//! thread never observes a half-updated structure mid-`poll`.
//!
//! Built on `std::sync::mpsc`, favoring channels over shared-state locking
//! for this cross-thread handoff; each command carries its own one-shot
//! completion sender so the caller can block until the audio thread has
//! actually processed it.

use std::sync::mpsc::{self, Receiver, Sender};

use snd_core::stream_id::StreamId;

#[derive(Debug)]
pub enum Command {
    AddStream { stream_id: StreamId, device_name: String },
    RemoveStream { stream_id: StreamId },
    SetStreamVolume { stream_id: StreamId, scaler: f32 },
    SetDeviceVolume { device_name: String, scaler: f32 },
    SwitchStreamTypeIodev { device_name: String, target_device: String },
    SetAecRef { stream_id: StreamId, iodev_idx: u32 },
    Drain { device_name: String },
}

/// Outcome of one processed command. `Ok(())` for everything except
/// `AddStream`/`SwitchStreamTypeIodev`, which report whether the target
/// stream/device was actually found.
pub type CommandResult = Result<(), CommandError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandError {
    UnknownStream,
    UnknownDevice,
}

pub struct CommandSender {
    tx: Sender<(Command, Sender<CommandResult>)>,
}

impl CommandSender {
    /// Sends `cmd` and blocks until the audio thread acknowledges it.
    pub fn send(&self, cmd: Command) -> CommandResult {
        let (ack_tx, ack_rx) = mpsc::channel();
        self.tx.send((cmd, ack_tx)).map_err(|_| CommandError::UnknownDevice)?;
        ack_rx.recv().unwrap_or(Err(CommandError::UnknownDevice))
    }
}

pub struct CommandReceiver {
    rx: Receiver<(Command, Sender<CommandResult>)>,
}

impl CommandReceiver {
    /// Drains every pending command, in order, invoking `handle` for each
    /// and sending its result back on the per-command completion channel.
    pub fn drain(&self, mut handle: impl FnMut(Command) -> CommandResult) {
        while let Ok((cmd, ack_tx)) = self.rx.try_recv() {
            let result = handle(cmd);
            let _ = ack_tx.send(result);
        }
    }
}

pub fn channel() -> (CommandSender, CommandReceiver) {
    let (tx, rx) = mpsc::channel();
    (CommandSender { tx }, CommandReceiver { rx })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn sender_blocks_until_worker_acknowledges() {
        use std::sync::atomic::{AtomicBool, Ordering};
        use std::sync::Arc;

        let (sender, receiver) = channel();
        let stop = Arc::new(AtomicBool::new(false));
        let stop2 = stop.clone();

        let worker = thread::spawn(move || {
            while !stop2.load(Ordering::Acquire) {
                receiver.drain(|cmd| match cmd {
                    Command::RemoveStream { .. } => {
                        stop2.store(true, Ordering::Release);
                        Ok(())
                    }
                    _ => Err(CommandError::UnknownStream),
                });
                thread::yield_now();
            }
        });

        let result = sender.send(Command::RemoveStream { stream_id: StreamId::new(1, 0) });
        assert_eq!(result, Ok(()));
        worker.join().unwrap();
    }

    #[test]
    fn commands_are_processed_in_send_order() {
        let (sender, receiver) = channel();
        let seen = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        let seen2 = seen.clone();

        let worker = thread::spawn(move || {
            let mut processed = 0;
            while processed < 2 {
                receiver.drain(|cmd| {
                    if let Command::SetDeviceVolume { device_name, .. } = cmd {
                        seen2.lock().unwrap().push(device_name);
                    }
                    Ok(())
                });
                processed = seen2.lock().unwrap().len();
            }
        });

        sender.send(Command::SetDeviceVolume { device_name: "a".into(), scaler: 0.1 }).unwrap();
        sender.send(Command::SetDeviceVolume { device_name: "b".into(), scaler: 0.2 }).unwrap();
        worker.join().unwrap();

        assert_eq!(*seen.lock().unwrap(), vec!["a".to_string(), "b".to_string()]);
    }
}
