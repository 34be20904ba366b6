use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::{watch, Semaphore};
use tokio::task::{JoinHandle, JoinSet};

use crate::client::ClientRegistry;
use crate::connection::{serve_connection, shutdown_requested};
use crate::dispatcher::{BroadcastDispatcher, BroadcastReport, DispatchStats};
use crate::error::{BroadcasterError, Result};
use crate::payload::Payload;

/// Connection acceptor settings
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Refuse connections beyond this many open ones, counted from accept
    /// until the connection task ends (None = unlimited)
    pub max_clients: Option<usize>,
    /// Outbound payloads buffered per client before it counts as failed
    pub client_queue_depth: usize,
    /// How long `stop` waits for connections to close before aborting them
    pub shutdown_grace: Duration,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            max_clients: None,
            client_queue_depth: 32,
            shutdown_grace: Duration::from_secs(2),
        }
    }
}

/// WebSocket fan-out server for spectrum payloads
///
/// Owns the client registry, the dispatcher and the accept loop. Every accepted
/// connection is registered as a broadcast recipient right after its upgrade.
pub struct SpectrumBroadcaster {
    options: ServerOptions,
    registry: ClientRegistry,
    dispatcher: BroadcastDispatcher,
    shutdown_tx: watch::Sender<bool>,
    accept_task: Mutex<Option<JoinHandle<()>>>,
    local_addr: Mutex<Option<SocketAddr>>,
    running: AtomicBool,
}

impl SpectrumBroadcaster {
    /// Create new broadcaster
    pub fn new(options: ServerOptions) -> Self {
        let registry = ClientRegistry::new();
        let dispatcher = BroadcastDispatcher::new(registry.clone());
        let (shutdown_tx, _) = watch::channel(false);

        Self {
            options,
            registry,
            dispatcher,
            shutdown_tx,
            accept_task: Mutex::new(None),
            local_addr: Mutex::new(None),
            running: AtomicBool::new(false),
        }
    }

    /// Bind the listener and start accepting clients. Returns the bound address.
    pub async fn start<A>(&self, addr: A) -> Result<SocketAddr>
    where
        A: ToSocketAddrs + std::fmt::Debug,
    {
        if self.running.swap(true, Ordering::AcqRel) {
            return Err(BroadcasterError::AlreadyRunning);
        }

        let listener = match TcpListener::bind(&addr).await {
            Ok(listener) => listener,
            Err(source) => {
                self.running.store(false, Ordering::Release);
                return Err(BroadcasterError::Bind {
                    addr: format!("{:?}", addr),
                    source,
                });
            }
        };
        let local_addr = listener.local_addr()?;

        tracing::info!("WebSocket server listening on ws://{}", local_addr);

        self.shutdown_tx.send_replace(false);
        let task = tokio::spawn(accept_loop(
            listener,
            self.registry.clone(),
            self.options.clone(),
            self.shutdown_tx.subscribe(),
        ));

        *self.accept_task.lock() = Some(task);
        *self.local_addr.lock() = Some(local_addr);

        Ok(local_addr)
    }

    /// Stop accepting, close every connection, and wait for them within the grace period
    pub async fn stop(&self) -> Result<()> {
        if !self.running.swap(false, Ordering::AcqRel) {
            return Err(BroadcasterError::NotStarted);
        }

        self.shutdown_tx.send_replace(true);

        let task = self.accept_task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                tracing::warn!("Accept task ended abnormally: {}", e);
            }
        }

        // Anything still registered lost its task to the grace-period abort
        let leftover = self.registry.drain();
        if !leftover.is_empty() {
            tracing::warn!("Released {} clients that did not close in time", leftover.len());
        }

        *self.local_addr.lock() = None;
        tracing::info!("WebSocket server stopped");
        Ok(())
    }

    /// Deliver one payload to every connected client (best effort)
    pub fn broadcast(&self, payload: &Payload) -> BroadcastReport {
        self.dispatcher.broadcast(payload)
    }

    /// Dispatcher sharing this broadcaster's registry
    pub fn dispatcher(&self) -> BroadcastDispatcher {
        self.dispatcher.clone()
    }

    pub fn registry(&self) -> &ClientRegistry {
        &self.registry
    }

    pub fn client_count(&self) -> usize {
        self.registry.len()
    }

    pub fn stats(&self) -> DispatchStats {
        self.dispatcher.stats()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

impl Drop for SpectrumBroadcaster {
    fn drop(&mut self) {
        // Wake every connection task; they unregister themselves
        self.shutdown_tx.send_replace(true);
        if let Some(task) = self.accept_task.lock().take() {
            task.abort();
        }
    }
}

async fn accept_loop(
    listener: TcpListener,
    registry: ClientRegistry,
    options: ServerOptions,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut connections = JoinSet::new();
    // One permit per open connection, held by its task
    let slots = options.max_clients.map(|max| Arc::new(Semaphore::new(max)));

    loop {
        tokio::select! {
            _ = shutdown_requested(&mut shutdown) => break,

            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let permit = match &slots {
                        Some(slots) => match Arc::clone(slots).try_acquire_owned() {
                            Ok(permit) => Some(permit),
                            Err(_) => {
                                tracing::warn!(
                                    "Refusing {}: client limit {:?} reached",
                                    peer, options.max_clients
                                );
                                drop(stream);
                                continue;
                            }
                        },
                        None => None,
                    };
                    configure_stream(&stream);
                    let connection = serve_connection(
                        stream,
                        peer,
                        registry.clone(),
                        options.client_queue_depth,
                        shutdown.clone(),
                    );
                    connections.spawn(async move {
                        let _permit = permit;
                        connection.await
                    });
                }
                Err(e) => {
                    tracing::error!("Failed to accept client: {}", e);
                }
            },

            // Reap finished connections so the set does not grow unbounded
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
        }
    }

    drop(listener);
    tracing::info!(
        "Client acceptance stopped; closing {} connections",
        connections.len()
    );

    let drained = tokio::time::timeout(options.shutdown_grace, async {
        while connections.join_next().await.is_some() {}
    })
    .await;

    if drained.is_err() {
        tracing::warn!(
            "{} connections still open after {:?}; aborting",
            connections.len(),
            options.shutdown_grace
        );
        connections.shutdown().await;
    }
}

fn configure_stream(stream: &TcpStream) {
    if let Err(e) = stream.set_nodelay(true) {
        tracing::debug!("Could not disable Nagle: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_broadcaster_create() {
        let broadcaster = SpectrumBroadcaster::new(ServerOptions::default());
        assert_eq!(broadcaster.client_count(), 0);
        assert!(!broadcaster.is_running());
        assert!(broadcaster.local_addr().is_none());
    }

    #[tokio::test]
    async fn test_start_stop_lifecycle() {
        let broadcaster = SpectrumBroadcaster::new(ServerOptions::default());

        let addr = broadcaster.start("127.0.0.1:0").await.unwrap();
        assert_ne!(addr.port(), 0);
        assert_eq!(broadcaster.local_addr(), Some(addr));
        assert!(matches!(
            broadcaster.start("127.0.0.1:0").await,
            Err(BroadcasterError::AlreadyRunning)
        ));

        broadcaster.stop().await.unwrap();
        assert!(!broadcaster.is_running());
        assert!(matches!(
            broadcaster.stop().await,
            Err(BroadcasterError::NotStarted)
        ));
    }

    #[tokio::test]
    async fn test_bind_conflict_is_reported() {
        let first = SpectrumBroadcaster::new(ServerOptions::default());
        let addr = first.start("127.0.0.1:0").await.unwrap();

        let second = SpectrumBroadcaster::new(ServerOptions::default());
        let err = second.start(addr).await.unwrap_err();
        assert!(matches!(err, BroadcasterError::Bind { .. }));
        assert!(!second.is_running());

        first.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_broadcast_without_clients_is_noop() {
        let broadcaster = SpectrumBroadcaster::new(ServerOptions::default());
        let report = broadcaster.broadcast(&Payload::text("[0.0]"));
        assert_eq!(report, BroadcastReport::default());
    }
}
