//! Best-effort fan-out of one payload to every registered client

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::client::{ClientId, ClientRegistry};
use crate::payload::Payload;

/// Outcome of one broadcast pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Clients in the snapshot (one attempt each)
    pub attempted: usize,
    /// Attempts that were enqueued successfully
    pub delivered: usize,
    /// Clients removed from the registry because their attempt failed
    pub pruned: usize,
}

/// Cumulative dispatcher counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub broadcasts: u64,
    pub deliveries: u64,
    pub pruned: u64,
}

#[derive(Debug, Default)]
struct DispatchCounters {
    broadcasts: AtomicU64,
    deliveries: AtomicU64,
    pruned: AtomicU64,
}

/// Delivers payloads to a registry snapshot, pruning clients that fail
///
/// Never returns an error: a failing client only affects itself. Each client
/// receives payloads in the order `broadcast` was called because its queue is
/// FIFO and a pass enqueues exactly once per client.
#[derive(Debug, Clone)]
pub struct BroadcastDispatcher {
    registry: ClientRegistry,
    counters: Arc<DispatchCounters>,
}

impl BroadcastDispatcher {
    pub fn new(registry: ClientRegistry) -> Self {
        Self {
            registry,
            counters: Arc::new(DispatchCounters::default()),
        }
    }

    pub fn registry(&self) -> &ClientRegistry {
        &self.registry
    }

    /// Attempt delivery of `payload` to every registered client
    pub fn broadcast(&self, payload: &Payload) -> BroadcastReport {
        let clients = self.registry.snapshot();
        if clients.is_empty() {
            return BroadcastReport::default();
        }

        let mut report = BroadcastReport {
            attempted: clients.len(),
            ..Default::default()
        };
        let mut failed: Vec<ClientId> = Vec::new();

        for client in &clients {
            match client.try_deliver(payload) {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    tracing::warn!("Failed to send to {}: {}", client.id(), e);
                    failed.push(client.id());
                }
            }
        }

        // Release snapshot clones before pruning so removed queues close promptly
        drop(clients);

        for id in failed {
            if self.registry.unregister(id).is_some() {
                report.pruned += 1;
                tracing::info!("Removed dead client {}. Remaining: {}", id, self.registry.len());
            }
        }

        self.counters.broadcasts.fetch_add(1, Ordering::Relaxed);
        self.counters
            .deliveries
            .fetch_add(report.delivered as u64, Ordering::Relaxed);
        self.counters
            .pruned
            .fetch_add(report.pruned as u64, Ordering::Relaxed);

        report
    }

    pub fn stats(&self) -> DispatchStats {
        DispatchStats {
            broadcasts: self.counters.broadcasts.load(Ordering::Relaxed),
            deliveries: self.counters.deliveries.load(Ordering::Relaxed),
            pruned: self.counters.pruned.load(Ordering::Relaxed),
        }
    }
}
