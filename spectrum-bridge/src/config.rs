//! Configuration management

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use spectrum_audio::{AudioConfig, SignalPattern};
use spectrum_broadcaster::ServerOptions;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::BridgeError;

/// WebSocket server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Interface to bind (default: "localhost")
    pub host: String,

    /// TCP port (default: 8081, 0 = ephemeral)
    pub port: u16,

    /// Refuse clients beyond this count (absent = unlimited)
    pub max_clients: Option<usize>,

    /// Payloads buffered per client before it is pruned
    pub client_queue_depth: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 8081,
            max_clients: None,
            client_queue_depth: 32,
        }
    }
}

/// Signal used when `simulate = true`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SimulatedSignal {
    #[default]
    Silence,
    /// 440 Hz at half scale
    Sine,
    /// Silence, then the device disappears after `disconnect_after_frames`
    Disconnect,
}

/// Capture and reduction settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioSettings {
    /// Input device name (absent or empty = host default input)
    pub device: Option<String>,

    pub sample_rate: u32,
    pub channels: u16,

    /// Samples per channel in one frame
    pub blocksize: usize,

    pub fft_size: usize,

    /// Magnitudes per spectrum message
    pub bins: usize,

    /// Use the simulated device instead of hardware
    pub simulate: bool,

    pub simulate_signal: SimulatedSignal,

    pub disconnect_after_frames: u64,

    /// Spectra queued between the capture thread and the server before
    /// new frames are dropped
    pub handoff_capacity: usize,
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            device: Some(spectrum_audio::DEFAULT_DEVICE_NAME.to_string()),
            sample_rate: spectrum_audio::DEFAULT_SAMPLE_RATE,
            channels: spectrum_audio::DEFAULT_CHANNELS,
            blocksize: spectrum_audio::DEFAULT_BLOCKSIZE,
            fft_size: spectrum_audio::DEFAULT_FFT_SIZE,
            bins: spectrum_audio::DEFAULT_SPECTRUM_BINS,
            simulate: false,
            simulate_signal: SimulatedSignal::Silence,
            disconnect_after_frames: 50,
            handoff_capacity: 8,
        }
    }
}

/// External streaming-software control endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExternalServiceConfig {
    pub host: String,
    pub port: u16,

    /// Sent as the `Authorization` header when non-empty
    pub password: String,

    pub connect_timeout_ms: u64,
}

impl Default for ExternalServiceConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 4455,
            password: String::new(),
            connect_timeout_ms: 5000,
        }
    }
}

impl ExternalServiceConfig {
    pub fn url(&self) -> String {
        format!("ws://{}:{}", self.host, self.port)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// Bridge configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Path to configuration file
    #[serde(skip)]
    pub config_path: PathBuf,

    /// Time allowed for clients to close during shutdown
    pub shutdown_grace_ms: u64,

    pub server: ServerSettings,

    pub audio: AudioSettings,

    /// Omitting the `[external]` table skips the external-service step
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external: Option<ExternalServiceConfig>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            config_path: Self::default_config_path(),
            shutdown_grace_ms: 2000,
            server: ServerSettings::default(),
            audio: AudioSettings::default(),
            external: Some(ExternalServiceConfig::default()),
        }
    }
}

impl BridgeConfig {
    /// Load configuration from the default location, or create it with defaults
    pub fn load() -> Result<Self> {
        let config_path = Self::default_config_path();

        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            let config = Self::default();
            // A read-only config dir must not stop the bridge from running
            if let Err(e) = config.save() {
                tracing::warn!("Could not write default config: {:#}", e);
            }
            Ok(config)
        }
    }

    /// Load configuration from an explicit file, which must exist
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let mut config: BridgeConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        config.config_path = path.to_path_buf();
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.config_path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;

        std::fs::write(&self.config_path, contents).context("Failed to write config file")?;

        Ok(())
    }

    /// Reject settings the bridge cannot start with
    pub fn validate(&self) -> std::result::Result<(), BridgeError> {
        if self.server.host.trim().is_empty() {
            return Err(BridgeError::config("server.host cannot be empty"));
        }
        if self.server.client_queue_depth == 0 {
            return Err(BridgeError::config("server.client_queue_depth must be at least 1"));
        }
        if self.server.max_clients == Some(0) {
            return Err(BridgeError::config("server.max_clients must be at least 1 when set"));
        }
        if self.audio.handoff_capacity == 0 {
            return Err(BridgeError::config("audio.handoff_capacity must be at least 1"));
        }
        if let Some(external) = &self.external {
            if external.host.trim().is_empty() {
                return Err(BridgeError::config("external.host cannot be empty"));
            }
            if external.connect_timeout_ms == 0 {
                return Err(BridgeError::config("external.connect_timeout_ms must be positive"));
            }
        }

        self.audio_config().validate()?;
        Ok(())
    }

    /// Listening address in `host:port` form
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    pub fn audio_config(&self) -> AudioConfig {
        AudioConfig {
            sample_rate: self.audio.sample_rate,
            channels: self.audio.channels,
            blocksize: self.audio.blocksize,
            fft_size: self.audio.fft_size,
            bins: self.audio.bins,
            device_name: self.audio.device.clone().filter(|name| !name.trim().is_empty()),
        }
    }

    pub fn server_options(&self) -> ServerOptions {
        ServerOptions {
            max_clients: self.server.max_clients,
            client_queue_depth: self.server.client_queue_depth,
            shutdown_grace: self.shutdown_grace(),
        }
    }

    pub fn signal_pattern(&self) -> SignalPattern {
        match self.audio.simulate_signal {
            SimulatedSignal::Silence => SignalPattern::Silence,
            SimulatedSignal::Sine => SignalPattern::Sine {
                frequency_hz: 440.0,
                amplitude: 0.5,
            },
            SimulatedSignal::Disconnect => SignalPattern::Disconnect {
                after_frames: self.audio.disconnect_after_frames,
            },
        }
    }

    /// Get default config path
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("spectrum-bridge")
            .join("config.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_match_reference_setup() {
        let config = BridgeConfig::default();
        assert_eq!(config.bind_addr(), "localhost:8081");
        assert_eq!(config.server.max_clients, None);
        assert_eq!(config.audio.sample_rate, 48_000);
        assert_eq!(config.audio.channels, 2);
        assert_eq!(config.audio.blocksize, 1024);
        assert_eq!(config.audio.fft_size, 2048);
        assert_eq!(config.audio.bins, 128);
        assert_eq!(config.audio.device.as_deref(), Some("Stream Mix (Wave Link)"));

        let external = config.external.as_ref().unwrap();
        assert_eq!(external.url(), "ws://localhost:4455");
        assert!(external.password.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = BridgeConfig::default();
        config.config_path = path.clone();
        config.server.port = 9001;
        config.server.max_clients = Some(4);
        config.audio.simulate = true;
        config.audio.simulate_signal = SimulatedSignal::Sine;
        config.save().unwrap();

        let loaded = BridgeConfig::load_from(&path).unwrap();
        assert_eq!(loaded.config_path, path);
        assert_eq!(loaded.server.port, 9001);
        assert_eq!(loaded.server.max_clients, Some(4));
        assert!(loaded.audio.simulate);
        assert_eq!(loaded.audio.simulate_signal, SimulatedSignal::Sine);
        assert!(loaded.external.is_some());
    }

    #[test]
    fn test_partial_file_uses_defaults_and_missing_external_disables_it() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
shutdown_grace_ms = 500

[server]
port = 0

[audio]
simulate = true
"#,
        )
        .unwrap();

        let config = BridgeConfig::load_from(&path).unwrap();
        assert_eq!(config.server.host, "localhost");
        assert_eq!(config.server.port, 0);
        assert_eq!(config.audio.bins, 128);
        assert!(config.audio.simulate);
        assert!(config.external.is_none());
        assert_eq!(config.shutdown_grace(), Duration::from_millis(500));
    }

    #[test]
    fn test_load_from_missing_file_fails() {
        let dir = TempDir::new().unwrap();
        assert!(BridgeConfig::load_from(&dir.path().join("absent.toml")).is_err());
    }

    #[test]
    fn test_malformed_file_fails() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[server]\nport = \"not a port\"\n").unwrap();
        assert!(BridgeConfig::load_from(&path).is_err());
    }

    #[test]
    fn test_validate_rejects_bad_shapes() {
        let mut config = BridgeConfig::default();
        config.audio.bins = 2000;
        assert!(matches!(config.validate(), Err(BridgeError::Config(_))));

        let mut config = BridgeConfig::default();
        config.audio.fft_size = 512;
        assert!(config.validate().is_err());

        let mut config = BridgeConfig::default();
        config.server.client_queue_depth = 0;
        assert!(config.validate().is_err());

        let mut config = BridgeConfig::default();
        config.audio.handoff_capacity = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_device_name_selects_default_input() {
        let mut config = BridgeConfig::default();
        config.audio.device = Some(String::new());
        assert_eq!(config.audio_config().device_name, None);
    }

    #[test]
    fn test_server_options_carry_grace_period() {
        let mut config = BridgeConfig::default();
        config.shutdown_grace_ms = 750;
        config.server.client_queue_depth = 4;

        let options = config.server_options();
        assert_eq!(options.shutdown_grace, Duration::from_millis(750));
        assert_eq!(options.client_queue_depth, 4);
    }
}
