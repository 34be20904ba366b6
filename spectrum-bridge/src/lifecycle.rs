//! Bridge lifecycle: Initializing → Running → ShuttingDown → Stopped
//!
//! Resources are acquired in order (external service, WebSocket server,
//! capture) and released in reverse. A failure while acquiring releases
//! whatever was already acquired before returning the error.

use serde::Serialize;
use spectrum_audio::{AudioCapture, CaptureStats, DeviceEvent};
use spectrum_broadcaster::{DispatchStats, SpectrumBroadcaster};
use std::fmt;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::BridgeConfig;
use crate::error::{BridgeError, Result};
use crate::external::ExternalServiceLink;
use crate::handoff::{run_dispatch_pump, SpectrumHandoff};

const PUMP_DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BridgeLifecycleState {
    Initializing,
    Running,
    ShuttingDown,
    Stopped,
}

impl fmt::Display for BridgeLifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Initializing => "initializing",
            Self::Running => "running",
            Self::ShuttingDown => "shutting down",
            Self::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Why `run_until` returned
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitReason {
    /// The shutdown signal fired
    Interrupted,
    /// The capture device disappeared
    DeviceLost(String),
}

/// Counters collected while stopping
#[derive(Debug, Clone, Copy, Default)]
pub struct ShutdownSummary {
    pub capture: CaptureStats,
    pub dispatch: DispatchStats,
    /// Frames discarded because the serving side was behind
    pub frames_dropped: u64,
    /// Frames encoded and handed to the dispatcher
    pub frames_dispatched: u64,
}

/// A configured bridge that has not acquired anything yet
///
/// The lifecycle state channel exists from construction, so observers that
/// subscribe here see `Initializing` and, if startup fails, `Stopped`.
pub struct Bridge {
    config: BridgeConfig,
    state_tx: watch::Sender<BridgeLifecycleState>,
}

impl Bridge {
    pub fn new(config: BridgeConfig) -> Self {
        let (state_tx, _) = watch::channel(BridgeLifecycleState::Initializing);
        Self { config, state_tx }
    }

    pub fn state(&self) -> BridgeLifecycleState {
        *self.state_tx.borrow()
    }

    /// Receiver that observes every later state change
    pub fn subscribe_state(&self) -> watch::Receiver<BridgeLifecycleState> {
        self.state_tx.subscribe()
    }

    /// Acquire every resource and start streaming
    pub async fn start(self) -> Result<RunningBridge> {
        let Self { config, state_tx } = self;
        info!("Bridge {}", BridgeLifecycleState::Initializing);

        match acquire(&config).await {
            Ok(parts) => {
                state_tx.send_replace(BridgeLifecycleState::Running);
                info!(
                    "Bridge {}: streaming spectra on ws://{}",
                    BridgeLifecycleState::Running,
                    parts.local_addr
                );
                Ok(RunningBridge { state_tx, ..parts })
            }
            Err(e) => {
                error!("Bridge startup failed: {}", e);
                state_tx.send_replace(BridgeLifecycleState::Stopped);
                info!("Bridge {}", BridgeLifecycleState::Stopped);
                Err(e)
            }
        }
    }
}

/// A started bridge
pub struct RunningBridge {
    state_tx: watch::Sender<BridgeLifecycleState>,
    external: Option<ExternalServiceLink>,
    broadcaster: SpectrumBroadcaster,
    capture: AudioCapture,
    pump: JoinHandle<u64>,
    dropped: Arc<AtomicU64>,
    device_events: mpsc::UnboundedReceiver<DeviceEvent>,
    local_addr: SocketAddr,
}

/// Acquire in order, releasing what was already held on failure. The returned
/// bridge carries a placeholder state sender that the caller replaces.
async fn acquire(config: &BridgeConfig) -> Result<RunningBridge> {
    config.validate()?;

    let external = match &config.external {
        Some(settings) => Some(ExternalServiceLink::connect(settings).await?),
        None => {
            info!("No external service configured");
            None
        }
    };

    let broadcaster = SpectrumBroadcaster::new(config.server_options());
    let local_addr = match broadcaster.start(config.bind_addr()).await {
        Ok(addr) => addr,
        Err(e) => {
            release_external(external).await;
            return Err(BridgeError::Bind(e));
        }
    };

    let (handoff, spectra) =
        SpectrumHandoff::channel(config.audio.handoff_capacity, config.audio.bins);
    let dropped = handoff.dropped_counter();
    let pump = tokio::spawn(run_dispatch_pump(spectra, broadcaster.dispatcher()));

    let (events_tx, device_events) = mpsc::unbounded_channel();

    let capture = match start_capture(config, handoff, events_tx) {
        Ok(capture) => capture,
        Err(e) => {
            let _ = broadcaster.stop().await;
            pump.abort();
            release_external(external).await;
            return Err(e);
        }
    };

    Ok(RunningBridge {
        state_tx: watch::Sender::new(BridgeLifecycleState::Initializing),
        external,
        broadcaster,
        capture,
        pump,
        dropped,
        device_events,
        local_addr,
    })
}

impl RunningBridge {
    /// Shorthand for `Bridge::new(config).start()`
    pub async fn start(config: BridgeConfig) -> Result<Self> {
        Bridge::new(config).start().await
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn state(&self) -> BridgeLifecycleState {
        *self.state_tx.borrow()
    }

    /// Receiver that observes every later state change, including `Stopped`
    pub fn subscribe_state(&self) -> watch::Receiver<BridgeLifecycleState> {
        self.state_tx.subscribe()
    }

    pub fn client_count(&self) -> usize {
        self.broadcaster.client_count()
    }

    pub fn capture_stats(&self) -> CaptureStats {
        self.capture.stats()
    }

    pub fn frames_dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Serve until `signal` resolves or the device is lost, then shut down
    pub async fn run_until<F>(mut self, signal: F) -> (ExitReason, ShutdownSummary)
    where
        F: Future<Output = ()>,
    {
        let reason = tokio::select! {
            _ = signal => {
                info!("Received shutdown signal");
                ExitReason::Interrupted
            }
            lost = wait_for_device_loss(&mut self.device_events) => {
                error!("Audio device lost: {}", lost);
                ExitReason::DeviceLost(lost)
            }
        };

        let summary = self.shutdown().await;
        (reason, summary)
    }

    /// Release everything in reverse acquisition order and end in `Stopped`
    pub async fn shutdown(self) -> ShutdownSummary {
        let Self {
            state_tx,
            external,
            broadcaster,
            mut capture,
            pump,
            dropped,
            device_events,
            ..
        } = self;

        state_tx.send_replace(BridgeLifecycleState::ShuttingDown);
        info!("Bridge {}", BridgeLifecycleState::ShuttingDown);

        // Dropping the capture driver drops the handoff, which ends the pump
        let capture_stats = capture.stop();
        drop(capture);
        drop(device_events);

        let frames_dispatched = match tokio::time::timeout(PUMP_DRAIN_TIMEOUT, pump).await {
            Ok(Ok(count)) => count,
            Ok(Err(e)) => {
                warn!("Dispatch pump ended abnormally: {}", e);
                0
            }
            Err(_) => {
                warn!("Dispatch pump did not drain in time");
                0
            }
        };

        if let Err(e) = broadcaster.stop().await {
            warn!("WebSocket server stop: {}", e);
        }
        let dispatch = broadcaster.stats();

        release_external(external).await;

        let summary = ShutdownSummary {
            capture: capture_stats,
            dispatch,
            frames_dropped: dropped.load(Ordering::Relaxed),
            frames_dispatched,
        };

        info!(
            "Frames processed: {}, invalid: {}, dropped at handoff: {}, broadcast: {}",
            summary.capture.frames_processed,
            summary.capture.frames_invalid,
            summary.frames_dropped,
            summary.dispatch.broadcasts
        );
        info!(
            "Deliveries: {}, clients pruned: {}",
            summary.dispatch.deliveries, summary.dispatch.pruned
        );

        state_tx.send_replace(BridgeLifecycleState::Stopped);
        info!("Bridge {}", BridgeLifecycleState::Stopped);

        summary
    }
}

fn start_capture(
    config: &BridgeConfig,
    mut handoff: SpectrumHandoff,
    events_tx: mpsc::UnboundedSender<DeviceEvent>,
) -> Result<AudioCapture> {
    let mut capture = AudioCapture::new(config.audio_config())?;

    capture.set_spectrum_callback(move |magnitudes: &[f32]| {
        handoff.offer(magnitudes);
    });
    capture.set_event_callback(move |event| {
        let _ = events_tx.send(event);
    });

    if config.audio.simulate {
        capture.start_simulated(config.signal_pattern())?;
    } else {
        capture.start()?;
    }

    Ok(capture)
}

async fn wait_for_device_loss(events: &mut mpsc::UnboundedReceiver<DeviceEvent>) -> String {
    while let Some(event) = events.recv().await {
        match event {
            DeviceEvent::DeviceLost(msg) => return msg,
            DeviceEvent::StreamError(msg) => warn!("Audio stream error: {}", msg),
        }
    }
    // Capture driver gone without a loss event; only the signal can end the run
    std::future::pending().await
}

async fn release_external(external: Option<ExternalServiceLink>) {
    if let Some(link) = external {
        link.close().await;
    }
}
