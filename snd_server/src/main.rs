//! Audio server entry point: binds the control socket, brings up one
//! default output device, and runs the mixing audio thread alongside the
//! per-client connection handlers.

mod config;
mod connection;
mod error;

use std::os::unix::net::UnixListener;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{error, info, warn};

use snd_core::format::{AudioFormat, ChannelLayout, SampleFormat};
use snd_core::CpuFeatures;
use snd_iodev::{AlsaIoDev, IoDev, SilentIoDev};
use snd_proto::ClientType;
use snd_thread::{channel, select_mix_ops, AudioThread};

use config::ServerConfig;
use error::Result;

const DEFAULT_FORMAT_RATE: u32 = 48_000;

fn default_format() -> AudioFormat {
    AudioFormat::new(SampleFormat::S16Le, DEFAULT_FORMAT_RATE, ChannelLayout::stereo(), 2)
        .expect("stereo 48kHz S16LE is always a valid format")
}

fn build_default_device(config: &ServerConfig) -> IoDev {
    let backend: Box<dyn snd_iodev::IoDevBackend> = if config.silent_only {
        Box::new(SilentIoDev::new())
    } else {
        Box::new(AlsaIoDev::new_sink(config.default_output_device.clone()))
    };
    let mut dev = IoDev::new(config.default_output_device.clone(), backend);
    if let Err(e) = dev.configure(&default_format()) {
        error!(error = %e, "failed to configure default output device");
    }
    dev
}

fn run() -> Result<()> {
    let config = ServerConfig::from_env();

    let _ = std::fs::remove_file(&config.socket_path);
    if let Some(parent) = config.socket_path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    let listener = UnixListener::bind(&config.socket_path)?;
    info!(socket = %config.socket_path.display(), "listening for clients");

    let (_commands_tx, commands_rx) = channel();
    let mix_ops = select_mix_ops(&CpuFeatures::detect());
    let mut audio_thread = AudioThread::new(mix_ops, commands_rx);
    audio_thread.add_device(config.default_output_device.clone(), build_default_device(&config));
    let audio = Arc::new(Mutex::new(audio_thread));

    {
        let audio = Arc::clone(&audio);
        std::thread::spawn(move || loop {
            audio.lock().unwrap().tick();
            std::thread::sleep(Duration::from_millis(5));
        });
    }

    let next_client_id = AtomicU16::new(1);
    for incoming in listener.incoming() {
        let stream = match incoming {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "failed to accept connection");
                continue;
            }
        };
        let client_id = next_client_id.fetch_add(1, Ordering::Relaxed);
        let audio = Arc::clone(&audio);
        let default_device = config.default_output_device.clone();
        std::thread::spawn(move || {
            if let Err(e) = connection::handle_connection(stream, client_id, ClientType::Full, audio, default_device) {
                warn!(client_id, error = %e, "connection ended with an error");
            }
        });
    }

    Ok(())
}

fn main() -> std::process::ExitCode {
    tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).init();

    match run() {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "server exited with an error");
            std::process::ExitCode::FAILURE
        }
    }
}
