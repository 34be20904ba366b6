//! WebSocket fan-out for real-time spectrum fingerprints
//!
//! This crate provides a WebSocket server that delivers every encoded spectrum
//! frame to all connected clients. It manages any number of concurrent clients,
//! prunes clients whose delivery fails, and never lets one client slow down
//! another or the producer.
//!
//! # Features
//!
//! - Plain `ws://` server on a configurable TCP address (default `localhost:8081`)
//! - One WebSocket text message per payload, no extra framing
//! - Client registry with a single short-held lock and snapshot-before-iterate
//! - Non-blocking, per-client FIFO delivery queues (per-client ordering preserved)
//! - Graceful shutdown with a Close frame and a bounded grace period
//!
//! # Example Usage
//!
//! ```no_run
//! use spectrum_broadcaster::{Payload, ServerOptions, SpectrumBroadcaster};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let broadcaster = SpectrumBroadcaster::new(ServerOptions::default());
//!     let addr = broadcaster.start("localhost:8081").await?;
//!     println!("listening on {}", addr);
//!
//!     let payload = Payload::to_json(&[0.0f32, 12.4, 3.1][..])?;
//!     let report = broadcaster.broadcast(&payload);
//!     println!("delivered to {} clients", report.delivered);
//!
//!     broadcaster.stop().await?;
//!     Ok(())
//! }
//! ```

pub mod broadcaster;
pub mod client;
pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod payload;

// Re-exports
pub use broadcaster::{ServerOptions, SpectrumBroadcaster};
pub use client::{ClientHandle, ClientId, ClientRegistry};
pub use connection::CloseReason;
pub use dispatcher::{BroadcastDispatcher, BroadcastReport, DispatchStats};
pub use error::{BroadcasterError, DeliveryError, Result};
pub use payload::Payload;
