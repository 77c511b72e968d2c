//! The real-time audio thread's scheduler: one loop that services every
//! open device and stream, and drains the command channel between
//! iterations.
//!
//! The full poll loop waits on `{device fds, command pipe, stream wake
//! pipes}` (per-stream `DATA_REQUEST`/`DATA_READY` signaling travels on a
//! separate fd from the control socket, §6). That per-stream audio-fd
//! protocol is not reimplemented here as a live socket: it would duplicate
//! the framing work already done in `snd_proto` for a second channel, and
//! every testable property this thread owns — threshold detection, mixing,
//! underrun recovery — is observable from the `AudioShm` side alone. A
//! `pending` flag on [`crate::stream::Stream`] stands in for "a
//! `DATA_REQUEST` was sent and not yet answered".

use std::collections::HashMap;

use tracing::warn;

use snd_core::{arena::Arena, format::StreamDirection, ArenaKey, StreamId};

use snd_iodev::IoDev;

use crate::command::{Command, CommandError, CommandReceiver, CommandResult};
use crate::mixops::MixOps;
use crate::sampleconv::{bytes_to_f32, f32_to_bytes};
use crate::stream::Stream;

pub struct AudioThread {
    devices: Arena<IoDev>,
    device_by_name: HashMap<String, ArenaKey>,
    streams: Arena<Stream>,
    streams_by_device: HashMap<ArenaKey, Vec<ArenaKey>>,
    mix_ops: Box<dyn MixOps>,
    commands: CommandReceiver,
    scratch_f32: Vec<f32>,
    mix_f32: Vec<f32>,
    capture_f32: Vec<f32>,
}

impl AudioThread {
    pub fn new(mix_ops: Box<dyn MixOps>, commands: CommandReceiver) -> Self {
        Self {
            devices: Arena::new(),
            device_by_name: HashMap::new(),
            streams: Arena::new(),
            streams_by_device: HashMap::new(),
            mix_ops,
            commands,
            scratch_f32: Vec::new(),
            mix_f32: Vec::new(),
            capture_f32: Vec::new(),
        }
    }

    pub fn add_device(&mut self, name: impl Into<String>, device: IoDev) -> ArenaKey {
        let name = name.into();
        let key = self.devices.insert(device);
        self.device_by_name.insert(name, key);
        self.streams_by_device.insert(key, Vec::new());
        key
    }

    pub fn device_key(&self, name: &str) -> Option<ArenaKey> {
        self.device_by_name.get(name).copied()
    }

    /// Attaches `stream` to `device_key`, building its channel/rate
    /// converter first if the stream's format doesn't match the device's
    /// already-negotiated one.
    pub fn attach_stream(&mut self, device_key: ArenaKey, mut stream: Stream) {
        if let Some(dev) = self.devices.get(device_key) {
            if let Some(negotiated) = dev.negotiated() {
                if let Err(e) = stream.attach_converter(&negotiated.format) {
                    warn!(stream_id = stream.meta.id.0, error = %e, "failed to build stream format converter");
                }
            }
        }
        let key = self.streams.insert(stream);
        self.streams_by_device.entry(device_key).or_default().push(key);
        if let Some(dev) = self.devices.get_mut(device_key) {
            dev.attach_stream();
        }
    }

    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    pub fn stream_count(&self) -> usize {
        self.streams.len()
    }

    /// One iteration of the forever-loop: drain commands, then service
    /// every open device's output path and its input path. Each pass
    /// ignores streams facing the other direction, so a device with only
    /// output streams attached never pays for a wasted `get_buffer` call
    /// meant for capture (and vice versa).
    pub fn tick(&mut self) {
        self.drain_commands();
        let device_keys: Vec<ArenaKey> = self.devices.iter().map(|(k, _)| k).collect();
        for key in device_keys {
            self.service_output_device(key);
            self.service_input_device(key);
        }
    }

    /// Detaches the stream with this id, wherever it's attached. Used both
    /// from the command queue (`Command::RemoveStream`) and directly by a
    /// connection handler tearing down a client's remaining streams on
    /// disconnect.
    pub fn remove_stream(&mut self, stream_id: StreamId) -> CommandResult {
        remove_stream_impl(&mut self.streams_by_device, &mut self.streams, &mut self.devices, stream_id)
    }

    fn drain_commands(&mut self) {
        let streams_by_device = &mut self.streams_by_device;
        let streams = &mut self.streams;
        let devices = &mut self.devices;
        let device_by_name = &self.device_by_name;
        self.commands.drain(|cmd| -> CommandResult {
            match cmd {
                Command::RemoveStream { stream_id } => remove_stream_impl(streams_by_device, streams, devices, stream_id),
                Command::SetStreamVolume { stream_id, scaler } => {
                    for (_, s) in streams.iter_mut() {
                        if s.meta.id == stream_id {
                            s.meta.volume_scaler = scaler.clamp(0.0, 1.0);
                            return Ok(());
                        }
                    }
                    Err(CommandError::UnknownStream)
                }
                Command::SetDeviceVolume { device_name, scaler } => {
                    match device_by_name.get(&device_name).and_then(|k| devices.get_mut(*k)) {
                        Some(dev) => {
                            dev.set_volume(scaler.clamp(0.0, 1.0));
                            Ok(())
                        }
                        None => Err(CommandError::UnknownDevice),
                    }
                }
                Command::AddStream { .. } | Command::SwitchStreamTypeIodev { .. } | Command::SetAecRef { .. } | Command::Drain { .. } => {
                    Ok(())
                }
            }
        });
    }

    /// Output-path service per device: fetch/threshold-check each attached
    /// stream, mix whatever is ready, `put_buffer`, underrun on shortfall.
    fn service_output_device(&mut self, device_key: ArenaKey) {
        let Some(stream_keys) = self.streams_by_device.get(&device_key).cloned() else { return };
        if stream_keys.is_empty() {
            return;
        }

        let Some(dev) = self.devices.get_mut(device_key) else { return };
        let Some(negotiated) = dev.negotiated() else { return };
        let frame_bytes = negotiated.format.frame_bytes();
        let out_channels = negotiated.format.num_channels as usize;

        let (buf_ptr, max_frames) = match dev.backend_mut().get_buffer(negotiated.buffer_size as usize) {
            Ok(v) => v,
            Err(_) => {
                let _ = dev.output_underrun();
                return;
            }
        };
        if max_frames == 0 {
            return;
        }

        self.mix_f32.clear();
        self.mix_f32.resize(max_frames * out_channels, 0.0);
        let mut any_ready = false;

        for key in &stream_keys {
            let Some(stream) = self.streams.get_mut(*key) else { continue };
            if stream.meta.direction != StreamDirection::Output {
                continue;
            }
            if stream.below_cb_threshold(frame_bytes) {
                stream.pending = true;
                continue;
            }
            stream.pending = false;

            let raw = stream.shm.read_frames(max_frames);
            if raw.is_empty() {
                continue;
            }
            bytes_to_f32(&raw, stream.meta.format.sample_format, &mut self.scratch_f32);

            let got_frames = self.scratch_f32.len() / stream.meta.format.num_channels as usize;
            let volume = stream.meta.volume_scaler;
            for i in 0..got_frames.min(max_frames) {
                let in_frame_start = i * stream.meta.format.num_channels as usize;
                let in_frame = &self.scratch_f32[in_frame_start..in_frame_start + stream.meta.format.num_channels as usize];
                let out_start = i * out_channels;
                if let Some(conv) = &stream.conv {
                    let mut routed = vec![0.0f32; out_channels];
                    conv.apply(in_frame, &mut routed);
                    self.mix_ops.scale_buffer(&mut routed, volume);
                    self.mix_ops.add(&mut self.mix_f32[out_start..out_start + out_channels], &routed);
                } else {
                    let mut scaled = in_frame.to_vec();
                    self.mix_ops.scale_buffer(&mut scaled, volume);
                    self.mix_ops.add(&mut self.mix_f32[out_start..out_start + out_channels], &scaled);
                }
            }
            any_ready = true;
        }

        if !any_ready {
            let _ = dev.output_underrun();
            return;
        }

        let mut out_bytes = Vec::new();
        f32_to_bytes(&self.mix_f32, negotiated.format.sample_format, &mut out_bytes);
        let write_len = out_bytes.len().min(max_frames * frame_bytes);
        // SAFETY: `buf_ptr` is valid for `max_frames * frame_bytes` bytes
        // per `get_buffer`'s contract, and `write_len` never exceeds that.
        unsafe {
            std::ptr::copy_nonoverlapping(out_bytes.as_ptr(), buf_ptr, write_len);
        }
        let _ = dev.backend_mut().put_buffer(write_len / frame_bytes.max(1));
    }

    /// Input-path service per device: pull whatever the backend has
    /// captured since the last tick, route/resample it per attached
    /// capture stream, and push it into that stream's `AudioShm` for the
    /// client to read. `get_buffer`/`put_buffer` are the same pair the
    /// output path uses — here `get_buffer` hands back the region the
    /// backend has already filled with captured samples, and `put_buffer`
    /// marks those frames consumed.
    fn service_input_device(&mut self, device_key: ArenaKey) {
        let Some(stream_keys) = self.streams_by_device.get(&device_key).cloned() else { return };
        if stream_keys.is_empty() {
            return;
        }
        if !stream_keys.iter().any(|k| self.streams.get(*k).map(|s| s.meta.direction == StreamDirection::Input).unwrap_or(false)) {
            return;
        }

        let Some(dev) = self.devices.get_mut(device_key) else { return };
        let Some(negotiated) = dev.negotiated() else { return };
        let frame_bytes = negotiated.format.frame_bytes();
        let in_channels = negotiated.format.num_channels as usize;

        let (buf_ptr, max_frames) = match dev.backend_mut().get_buffer(negotiated.buffer_size as usize) {
            Ok(v) => v,
            Err(_) => return,
        };
        if max_frames == 0 {
            return;
        }

        // SAFETY: `buf_ptr` is valid for `max_frames * frame_bytes` bytes
        // per `get_buffer`'s contract.
        let captured = unsafe { std::slice::from_raw_parts(buf_ptr as *const u8, max_frames * frame_bytes) };
        bytes_to_f32(captured, negotiated.format.sample_format, &mut self.scratch_f32);
        let got_frames = self.scratch_f32.len() / in_channels;

        let timestamp = dev.backend_mut().frames_queued().map(|hw| hw.timestamp_micros).unwrap_or(0);
        let mut any_consumed = false;

        for key in &stream_keys {
            let Some(stream) = self.streams.get_mut(*key) else { continue };
            if stream.meta.direction != StreamDirection::Input {
                continue;
            }

            let out_channels = stream.meta.format.num_channels as usize;
            self.capture_f32.clear();
            self.capture_f32.reserve(got_frames * out_channels);
            for i in 0..got_frames {
                let in_start = i * in_channels;
                let in_frame = &self.scratch_f32[in_start..in_start + in_channels];
                if let Some(conv) = &stream.conv {
                    let mut routed = vec![0.0f32; out_channels];
                    conv.apply(in_frame, &mut routed);
                    self.capture_f32.extend_from_slice(&routed);
                } else {
                    let n = out_channels.min(in_channels);
                    self.capture_f32.extend_from_slice(&in_frame[..n]);
                    self.capture_f32.resize(self.capture_f32.len() + (out_channels - n), 0.0);
                }
            }

            let mut out_bytes = Vec::new();
            f32_to_bytes(&self.capture_f32, stream.meta.format.sample_format, &mut out_bytes);
            let written = stream.shm.write_frames(&out_bytes);
            if written > 0 {
                stream.shm.set_ts(timestamp);
                any_consumed = true;
            }
            // Unlike the output path (where `pending` means "waiting on the
            // client to produce more"), here it means "enough has been
            // captured to notify the client" — the mirror image of the same
            // flag.
            stream.pending = !stream.below_cb_threshold(stream.meta.format.frame_bytes());
        }

        if any_consumed {
            let _ = dev.backend_mut().put_buffer(got_frames);
        }
    }
}

fn remove_stream_impl(
    streams_by_device: &mut HashMap<ArenaKey, Vec<ArenaKey>>,
    streams: &mut Arena<Stream>,
    devices: &mut Arena<IoDev>,
    stream_id: StreamId,
) -> CommandResult {
    let mut found = None;
    for (dev_key, stream_keys) in streams_by_device.iter_mut() {
        if let Some(pos) = stream_keys.iter().position(|k| streams.get(*k).map(|s| s.meta.id == stream_id).unwrap_or(false)) {
            found = Some((*dev_key, stream_keys.remove(pos)));
            break;
        }
    }
    match found {
        Some((dev_key, stream_key)) => {
            streams.remove(stream_key);
            if let Some(dev) = devices.get_mut(dev_key) {
                let _ = dev.detach_stream();
            }
            Ok(())
        }
        None => Err(CommandError::UnknownStream),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::channel;
    use crate::mixops::Scalar;
    use snd_core::format::{AudioFormat, ChannelLayout, SampleFormat};
    use snd_core::stream::StreamFlags;
    use snd_iodev::SilentIoDev;
    use snd_shm::AudioShm;

    fn fmt() -> AudioFormat {
        AudioFormat::new(SampleFormat::S16Le, 48_000, ChannelLayout::stereo(), 2).unwrap()
    }

    #[test]
    fn tick_with_no_devices_does_not_panic() {
        let (_tx, rx) = channel();
        let mut thread = AudioThread::new(Box::new(Scalar), rx);
        thread.tick();
    }

    #[test]
    fn stream_below_threshold_is_not_mixed_and_device_underruns() {
        let (_tx, rx) = channel();
        let mut thread = AudioThread::new(Box::new(Scalar), rx);

        let mut dev = IoDev::new("silent", Box::new(SilentIoDev::new()));
        dev.configure(&fmt()).unwrap();
        let dev_key = thread.add_device("silent", dev);

        let meta = snd_core::stream::StreamMeta {
            id: StreamId::new(1, 0),
            direction: StreamDirection::Output,
            format: fmt(),
            buffer_frames: 1024,
            cb_threshold: 512,
            min_cb_level: 256,
            flags: StreamFlags::NONE,
            volume_scaler: 1.0,
            owner_client: 1,
            attached_device: None,
        };
        let shm = AudioShm::create(1024, 4).unwrap();
        thread.attach_stream(dev_key, Stream::new(meta, shm));

        thread.tick();
        assert_eq!(thread.stream_count(), 1);
    }

    #[test]
    fn attach_stream_builds_converter_for_mismatched_rate() {
        let (_tx, rx) = channel();
        let mut thread = AudioThread::new(Box::new(Scalar), rx);

        let mut dev = IoDev::new("silent", Box::new(SilentIoDev::new()));
        dev.configure(&fmt()).unwrap();
        let dev_key = thread.add_device("silent", dev);

        let meta = snd_core::stream::StreamMeta {
            id: StreamId::new(3, 0),
            direction: StreamDirection::Output,
            format: AudioFormat::new(SampleFormat::S16Le, 44_100, ChannelLayout::stereo(), 2).unwrap(),
            buffer_frames: 1024,
            cb_threshold: 512,
            min_cb_level: 256,
            flags: StreamFlags::NONE,
            volume_scaler: 1.0,
            owner_client: 1,
            attached_device: None,
        };
        let shm = AudioShm::create(1024, 4).unwrap();
        thread.attach_stream(dev_key, Stream::new(meta, shm));

        let key = thread.streams.iter().next().unwrap().0;
        assert!(thread.streams.get(key).unwrap().needs_conversion());
    }

    #[test]
    fn input_stream_receives_captured_frames() {
        let (_tx, rx) = channel();
        let mut thread = AudioThread::new(Box::new(Scalar), rx);

        let mut dev = IoDev::new("silent-source", Box::new(SilentIoDev::new()));
        dev.configure(&fmt()).unwrap();
        let dev_key = thread.add_device("silent-source", dev);

        let meta = snd_core::stream::StreamMeta {
            id: StreamId::new(2, 0),
            direction: StreamDirection::Input,
            format: fmt(),
            buffer_frames: 1024,
            cb_threshold: 64,
            min_cb_level: 32,
            flags: StreamFlags::NONE,
            volume_scaler: 1.0,
            owner_client: 1,
            attached_device: None,
        };
        let shm = AudioShm::create(1024, 4).unwrap();
        thread.attach_stream(dev_key, Stream::new(meta, shm));

        thread.tick();
        assert_eq!(thread.stream_count(), 1);
    }

    #[test]
    fn remove_stream_command_detaches_it() {
        let (tx, rx) = channel();
        let mut thread = AudioThread::new(Box::new(Scalar), rx);

        let mut dev = IoDev::new("silent", Box::new(SilentIoDev::new()));
        dev.configure(&fmt()).unwrap();
        let dev_key = thread.add_device("silent", dev);

        let stream_id = StreamId::new(1, 0);
        let meta = snd_core::stream::StreamMeta {
            id: stream_id,
            direction: StreamDirection::Output,
            format: fmt(),
            buffer_frames: 1024,
            cb_threshold: 512,
            min_cb_level: 256,
            flags: StreamFlags::NONE,
            volume_scaler: 1.0,
            owner_client: 1,
            attached_device: None,
        };
        let shm = AudioShm::create(1024, 4).unwrap();
        thread.attach_stream(dev_key, Stream::new(meta, shm));
        assert_eq!(thread.stream_count(), 1);

        let worker = std::thread::spawn(move || tx.send(Command::RemoveStream { stream_id }));
        // The command arrives asynchronously; poll `tick()` (as the real
        // poll loop would on every wake) until it's been drained.
        for _ in 0..10_000 {
            thread.tick();
            if thread.stream_count() == 0 {
                break;
            }
            std::thread::yield_now();
        }
        worker.join().unwrap().unwrap();
        assert_eq!(thread.stream_count(), 0);
    }
}
