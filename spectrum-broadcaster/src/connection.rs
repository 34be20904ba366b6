//! Per-connection lifecycle: Accepted → Registered → Closed

use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info};

use crate::client::{ClientHandle, ClientRegistry};

/// Why a registered connection ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Peer sent a Close frame or the stream ended
    PeerClosed,
    /// Read or write failed (reset, protocol violation)
    TransportError,
    /// Dispatcher pruned the client after a failed delivery
    Pruned,
    /// Local shutdown
    Shutdown,
}

/// Resolves once `true` is published on the shutdown channel, or the sender
/// is gone. The `watch::Ref` guard is dropped before returning so callers can
/// use this as a `select!` branch in a `Send` future.
pub(crate) async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

/// Upgrade, register, pump outbound payloads until closure, then unregister
pub(crate) async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    registry: ClientRegistry,
    queue_depth: usize,
    mut shutdown: watch::Receiver<bool>,
) {
    let ws = tokio::select! {
        upgraded = tokio_tungstenite::accept_async(stream) => match upgraded {
            Ok(ws) => ws,
            Err(e) => {
                debug!("WebSocket handshake with {} failed: {}", peer, e);
                return;
            }
        },
        _ = shutdown_requested(&mut shutdown) => return,
    };

    let id = registry.allocate_id();
    let (handle, mut outbound) = ClientHandle::channel(id, Some(peer), queue_depth);
    let total = registry.register(handle);
    info!("New client {} connected from {}. Total clients: {}", id, peer, total);

    let (mut sink, mut inbound) = ws.split();

    let reason = loop {
        tokio::select! {
            _ = shutdown_requested(&mut shutdown) => break CloseReason::Shutdown,

            payload = outbound.recv() => match payload {
                Some(payload) => {
                    if let Err(e) = sink.send(Message::Text(payload.as_str().to_owned())).await {
                        debug!("Write to {} failed: {}", id, e);
                        break CloseReason::TransportError;
                    }
                }
                None => break CloseReason::Pruned,
            },

            message = inbound.next() => match message {
                Some(Ok(Message::Close(_))) | None => break CloseReason::PeerClosed,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!("Read from {} failed: {}", id, e);
                    break CloseReason::TransportError;
                }
            },
        }
    };

    // Unregister first so no further broadcast targets this client
    registry.unregister(id);
    drop(outbound);

    let close_frame = match reason {
        CloseReason::Shutdown => Some(CloseFrame {
            code: CloseCode::Away,
            reason: "server shutting down".into(),
        }),
        CloseReason::Pruned => Some(CloseFrame {
            code: CloseCode::Policy,
            reason: "delivery failed".into(),
        }),
        CloseReason::PeerClosed | CloseReason::TransportError => None,
    };
    if let Some(frame) = close_frame {
        let _ = sink.send(Message::Close(Some(frame))).await;
    }
    let _ = sink.close().await;

    info!("Client {} disconnected ({:?}). Remaining: {}", id, reason, registry.len());
}
