use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::error::DeliveryError;
use crate::payload::Payload;

/// Unique identifier of one client connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(u64);

impl ClientId {
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "client-{}", self.0)
    }
}

/// Registry entry for one live connection
///
/// Pushing bytes goes through a bounded per-client queue drained by the
/// connection's own task, so delivery never waits on the network. Dropping the
/// last handle closes the queue, which the connection task observes as closure.
#[derive(Clone)]
pub struct ClientHandle {
    id: ClientId,
    peer: Option<SocketAddr>,
    tx: mpsc::Sender<Payload>,
}

impl ClientHandle {
    pub fn new(id: ClientId, peer: Option<SocketAddr>, tx: mpsc::Sender<Payload>) -> Self {
        Self { id, peer, tx }
    }

    /// Create a handle together with the receiving end of its outbound queue
    pub fn channel(
        id: ClientId,
        peer: Option<SocketAddr>,
        queue_depth: usize,
    ) -> (Self, mpsc::Receiver<Payload>) {
        let (tx, rx) = mpsc::channel(queue_depth.max(1));
        (Self::new(id, peer, tx), rx)
    }

    pub fn id(&self) -> ClientId {
        self.id
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// Enqueue a payload without waiting
    pub fn try_deliver(&self, payload: &Payload) -> Result<(), DeliveryError> {
        self.tx.try_send(payload.clone()).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => DeliveryError::Backlogged,
            mpsc::error::TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl fmt::Debug for ClientHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientHandle")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .finish()
    }
}

/// Thread-safe set of live client handles
///
/// Every operation takes the lock for one short critical section; the lock is
/// never held while delivering, so a slow client cannot stall registration.
#[derive(Clone, Default)]
pub struct ClientRegistry {
    clients: Arc<Mutex<HashMap<ClientId, ClientHandle>>>,
    next_id: Arc<AtomicU64>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve a fresh, never reused client id
    pub fn allocate_id(&self) -> ClientId {
        ClientId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1)
    }

    /// Add a client. Returns the client count after insertion.
    pub fn register(&self, handle: ClientHandle) -> usize {
        let mut clients = self.clients.lock();
        let id = handle.id();
        if clients.insert(id, handle).is_some() {
            tracing::warn!("{} registered twice; keeping the newer handle", id);
        }
        clients.len()
    }

    /// Remove a client if present. Removing an absent id is a no-op.
    ///
    /// Returns the removed handle so the caller decides when it is released.
    pub fn unregister(&self, id: ClientId) -> Option<ClientHandle> {
        self.clients.lock().remove(&id)
    }

    /// Point-in-time copy of the registered handles, safe to iterate unlocked
    pub fn snapshot(&self) -> Vec<ClientHandle> {
        self.clients.lock().values().cloned().collect()
    }

    pub fn contains(&self, id: ClientId) -> bool {
        self.clients.lock().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.clients.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.lock().is_empty()
    }

    /// Remove every client, returning the removed handles
    pub fn drain(&self) -> Vec<ClientHandle> {
        self.clients.lock().drain().map(|(_, handle)| handle).collect()
    }
}

impl fmt::Debug for ClientRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientRegistry")
            .field("clients", &self.len())
            .finish()
    }
}
