//! Spectrum Bridge - live audio spectrum over WebSocket
//!
//! Captures the configured input device, reduces every frame to a magnitude
//! spectrum and pushes it as a JSON array to every connected WebSocket client.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use spectrum_audio::AudioCapture;
use spectrum_bridge::{Bridge, BridgeConfig, ExitReason};

#[derive(Debug, Parser)]
#[command(name = "spectrum-bridge", version, about)]
struct Cli {
    /// Configuration file (default: <config dir>/spectrum-bridge/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Interface for the WebSocket server
    #[arg(long)]
    host: Option<String>,

    /// Port for the WebSocket server
    #[arg(short, long)]
    port: Option<u16>,

    /// Input device name (empty string = host default input)
    #[arg(short, long)]
    device: Option<String>,

    /// Use the simulated input device
    #[arg(long)]
    simulate: bool,

    /// Skip connecting to the external service
    #[arg(long)]
    no_external: bool,

    /// Print input devices and exit
    #[arg(long)]
    list_devices: bool,

    /// Debug logging (RUST_LOG takes precedence)
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn apply(&self, config: &mut BridgeConfig) {
        if let Some(host) = &self.host {
            config.server.host = host.clone();
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(device) = &self.device {
            config.audio.device = Some(device.clone());
        }
        if self.simulate {
            config.audio.simulate = true;
        }
        if self.no_external {
            config.external = None;
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_level(true)
        .init();
}

async fn run(cli: Cli) -> Result<ExitCode> {
    if cli.list_devices {
        AudioCapture::print_devices().context("Failed to list input devices")?;
        return Ok(ExitCode::SUCCESS);
    }

    info!("🎚️ Starting Spectrum Bridge v{}", env!("CARGO_PKG_VERSION"));

    let mut config = match &cli.config {
        Some(path) => BridgeConfig::load_from(path)?,
        None => BridgeConfig::load().context("Failed to load configuration")?,
    };
    cli.apply(&mut config);
    info!("Configuration: {}", config.config_path.display());

    let bridge = Bridge::new(config)
        .start()
        .await
        .context("Bridge failed to start")?;

    let (reason, summary) = bridge.run_until(shutdown_signal()).await;

    match reason {
        ExitReason::Interrupted => {
            info!("👋 Stopped after {} frames", summary.capture.frames_processed);
            Ok(ExitCode::SUCCESS)
        }
        ExitReason::DeviceLost(msg) => {
            error!("Stopped because the audio device was lost: {}", msg);
            Ok(ExitCode::FAILURE)
        }
    }
}

/// Resolves on Ctrl+C, or SIGTERM on Unix
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
                return;
            }
            Err(e) => warn!("SIGTERM handler unavailable: {}", e),
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        // Without a signal handler the bridge runs until the device goes away
        warn!("Ctrl+C handler unavailable: {}", e);
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_overrides_config() {
        let cli = Cli::parse_from([
            "spectrum-bridge",
            "--host",
            "0.0.0.0",
            "--port",
            "9000",
            "--device",
            "USB Mic",
            "--simulate",
            "--no-external",
        ]);

        let mut config = BridgeConfig::default();
        cli.apply(&mut config);

        assert_eq!(config.bind_addr(), "0.0.0.0:9000");
        assert_eq!(config.audio.device.as_deref(), Some("USB Mic"));
        assert!(config.audio.simulate);
        assert!(config.external.is_none());
    }

    #[test]
    fn test_no_flags_keep_config() {
        let cli = Cli::parse_from(["spectrum-bridge"]);
        let mut config = BridgeConfig::default();
        cli.apply(&mut config);

        assert_eq!(config.bind_addr(), "localhost:8081");
        assert!(!config.audio.simulate);
        assert!(config.external.is_some());
    }
}
