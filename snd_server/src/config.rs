//! Server configuration, loaded from environment variables with the
//! defaults a developer running the server locally would expect.

use std::path::PathBuf;

/// Configuration for the control socket and the audio thread it feeds.
pub struct ServerConfig {
    /// Path of the Unix domain socket clients connect to.
    pub socket_path: PathBuf,
    /// Name of the default playback device, opened at startup.
    pub default_output_device: String,
    /// `true` runs every device through the silent backend instead of ALSA
    /// — used in CI and for the end-to-end loopback tests.
    pub silent_only: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from("/run/snd_audio/control"),
            default_output_device: "default".to_string(),
            silent_only: false,
        }
    }
}

impl ServerConfig {
    /// Overlays environment variables onto the defaults:
    /// `SND_AUDIO_SOCKET`, `SND_AUDIO_DEFAULT_DEVICE`, `SND_AUDIO_SILENT_ONLY`.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(path) = std::env::var("SND_AUDIO_SOCKET") {
            config.socket_path = PathBuf::from(path);
        }
        if let Ok(name) = std::env::var("SND_AUDIO_DEFAULT_DEVICE") {
            config.default_output_device = name;
        }
        if let Ok(flag) = std::env::var("SND_AUDIO_SILENT_ONLY") {
            config.silent_only = flag == "1" || flag.eq_ignore_ascii_case("true");
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_points_at_the_standard_runtime_socket() {
        let config = ServerConfig::default();
        assert_eq!(config.socket_path, PathBuf::from("/run/snd_audio/control"));
        assert!(!config.silent_only);
    }
}
