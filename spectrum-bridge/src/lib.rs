//! Spectrum bridge library
//!
//! Ties the audio capture driver to the WebSocket broadcaster: configuration,
//! the external-service link, the capture → server handoff and the lifecycle
//! coordinator used by the `spectrum-bridge` binary and the end-to-end tests.

pub mod config;
pub mod error;
pub mod external;
pub mod handoff;
pub mod lifecycle;

pub use config::{AudioSettings, BridgeConfig, ExternalServiceConfig, ServerSettings, SimulatedSignal};
pub use error::{BridgeError, Result};
pub use external::ExternalServiceLink;
pub use handoff::{run_dispatch_pump, Offer, SpectrumHandoff, SpectrumReceiver};
pub use lifecycle::{Bridge, BridgeLifecycleState, ExitReason, RunningBridge, ShutdownSummary};
