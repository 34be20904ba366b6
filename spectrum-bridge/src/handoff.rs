//! Capture thread → serving context handoff
//!
//! A fixed pool of spectrum buffers is allocated up front and cycles between
//! two `ringbuf` SPSC queues: `free` (serving side → capture thread) and
//! `ready` (capture thread → serving side). The capture callback copies each
//! spectrum into a free buffer without waiting or allocating. When no buffer
//! is free the serving side is behind, so the offered frame is dropped and
//! counted and capture never stalls. The dispatch pump encodes each ready
//! spectrum once, hands the payload to the broadcast dispatcher, and returns
//! the buffer to the pool.

use ringbuf::traits::{Consumer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};
use spectrum_broadcaster::{BroadcastDispatcher, Payload};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{debug, warn};

/// Result of offering one spectrum
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Offer {
    Queued,
    /// No free buffer; this frame was discarded
    Dropped,
    /// Serving side has gone away
    Closed,
}

#[derive(Default)]
struct HandoffShared {
    notify: Notify,
    /// Set when the producer is dropped
    closed: AtomicBool,
    /// Set when the receiver is dropped
    receiver_gone: AtomicBool,
}

/// Producer half, owned by the capture callback
pub struct SpectrumHandoff {
    free: HeapCons<Vec<f32>>,
    ready: HeapProd<Vec<f32>>,
    dropped: Arc<AtomicU64>,
    shared: Arc<HandoffShared>,
}

/// Consumer half, owned by the dispatch pump
pub struct SpectrumReceiver {
    ready: HeapCons<Vec<f32>>,
    free: HeapProd<Vec<f32>>,
    shared: Arc<HandoffShared>,
}

impl SpectrumHandoff {
    /// Allocate `capacity` buffers of `bins` magnitudes each
    pub fn channel(capacity: usize, bins: usize) -> (Self, SpectrumReceiver) {
        let capacity = capacity.max(1);
        let (mut free_tx, free_rx) = HeapRb::<Vec<f32>>::new(capacity).split();
        let (ready_tx, ready_rx) = HeapRb::<Vec<f32>>::new(capacity).split();

        for _ in 0..capacity {
            let _ = free_tx.try_push(Vec::with_capacity(bins));
        }

        let shared = Arc::new(HandoffShared::default());
        (
            Self {
                free: free_rx,
                ready: ready_tx,
                dropped: Arc::new(AtomicU64::new(0)),
                shared: Arc::clone(&shared),
            },
            SpectrumReceiver {
                ready: ready_rx,
                free: free_tx,
                shared,
            },
        )
    }

    /// Never blocks and never allocates once `magnitudes` fits the pooled
    /// buffers; safe to call from the audio callback
    pub fn offer(&mut self, magnitudes: &[f32]) -> Offer {
        if self.shared.receiver_gone.load(Ordering::Acquire) {
            return Offer::Closed;
        }

        let Some(mut buffer) = self.free.try_pop() else {
            return self.record_drop();
        };
        buffer.clear();
        buffer.extend_from_slice(magnitudes);

        // `ready` holds at most every pooled buffer, so this only fails if the
        // pool was built inconsistently
        if self.ready.try_push(buffer).is_err() {
            return self.record_drop();
        }

        self.shared.notify.notify_one();
        Offer::Queued
    }

    fn record_drop(&self) -> Offer {
        let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
        if total == 1 || total % 100 == 0 {
            warn!("Serving side behind; dropped {} frames so far", total);
        }
        Offer::Dropped
    }

    /// Shared dropped-frame counter, readable after the handoff itself is gone
    pub fn dropped_counter(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.dropped)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Drop for SpectrumHandoff {
    fn drop(&mut self) {
        self.shared.closed.store(true, Ordering::Release);
        self.shared.notify.notify_one();
    }
}

impl SpectrumReceiver {
    /// Broadcast every ready spectrum and recycle its buffer
    fn drain(&mut self, dispatcher: &BroadcastDispatcher) -> u64 {
        let mut dispatched = 0u64;

        while let Some(buffer) = self.ready.try_pop() {
            match Payload::to_json(buffer.as_slice()) {
                Ok(payload) => {
                    dispatcher.broadcast(&payload);
                    dispatched += 1;
                }
                Err(e) => debug!("Skipping frame that failed to encode: {}", e),
            }
            // Every buffer outside `ready` fits in `free`
            let _ = self.free.try_push(buffer);
        }

        dispatched
    }
}

impl Drop for SpectrumReceiver {
    fn drop(&mut self) {
        self.shared.receiver_gone.store(true, Ordering::Release);
    }
}

/// Encode and broadcast every spectrum until the producer is dropped.
/// Returns the number of spectra dispatched.
pub async fn run_dispatch_pump(
    mut receiver: SpectrumReceiver,
    dispatcher: BroadcastDispatcher,
) -> u64 {
    let shared = Arc::clone(&receiver.shared);
    let mut dispatched = 0u64;

    loop {
        // Read before draining so frames offered just before close still go out
        let closed = shared.closed.load(Ordering::Acquire);
        dispatched += receiver.drain(&dispatcher);
        if closed {
            break;
        }
        shared.notify.notified().await;
    }

    debug!("Dispatch pump finished after {} frames", dispatched);
    dispatched
}

#[cfg(test)]
mod tests {
    use super::*;
    use spectrum_broadcaster::{ClientHandle, ClientRegistry};

    const BINS: usize = 128;

    fn silent() -> Vec<f32> {
        vec![0.0; BINS]
    }

    fn dispatcher_with_client(
        depth: usize,
    ) -> (BroadcastDispatcher, tokio::sync::mpsc::Receiver<Payload>) {
        let registry = ClientRegistry::new();
        let dispatcher = BroadcastDispatcher::new(registry.clone());
        let (handle, client_rx) = ClientHandle::channel(registry.allocate_id(), None, depth);
        registry.register(handle);
        (dispatcher, client_rx)
    }

    #[test]
    fn test_exhausted_pool_drops_only_the_offered_frame() {
        let (mut handoff, mut receiver) = SpectrumHandoff::channel(2, BINS);
        let spectrum = silent();

        assert_eq!(handoff.offer(&spectrum), Offer::Queued);
        assert_eq!(handoff.offer(&spectrum), Offer::Queued);
        assert_eq!(handoff.offer(&spectrum), Offer::Dropped);
        assert_eq!(handoff.dropped(), 1);

        // Queued frames are untouched
        assert_eq!(receiver.ready.try_pop().map(|b| b.len()), Some(BINS));
        assert_eq!(receiver.ready.try_pop().map(|b| b.len()), Some(BINS));
        assert!(receiver.ready.try_pop().is_none());
        assert_eq!(handoff.dropped_counter().load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_drained_buffers_return_to_the_pool() {
        let (dispatcher, _client_rx) = dispatcher_with_client(16);
        let (mut handoff, mut receiver) = SpectrumHandoff::channel(2, BINS);
        let spectrum = silent();

        for _ in 0..3 {
            assert_eq!(handoff.offer(&spectrum), Offer::Queued);
            assert_eq!(handoff.offer(&spectrum), Offer::Queued);
            assert_eq!(receiver.drain(&dispatcher), 2);
        }

        assert_eq!(handoff.dropped(), 0);
        assert_eq!(dispatcher.stats().broadcasts, 6);
    }

    #[test]
    fn test_offer_after_receiver_gone_is_closed() {
        let (mut handoff, receiver) = SpectrumHandoff::channel(1, BINS);
        drop(receiver);
        assert_eq!(handoff.offer(&silent()), Offer::Closed);
        assert_eq!(handoff.dropped(), 0);
    }

    #[tokio::test]
    async fn test_pump_encodes_and_broadcasts_until_producer_drops() {
        let (dispatcher, mut client_rx) = dispatcher_with_client(8);

        let (mut handoff, receiver) = SpectrumHandoff::channel(4, BINS);
        let pump = tokio::spawn(run_dispatch_pump(receiver, dispatcher.clone()));

        handoff.offer(&silent());
        handoff.offer(&silent());
        drop(handoff);

        assert_eq!(pump.await.unwrap(), 2);
        assert_eq!(dispatcher.stats().broadcasts, 2);

        let payload = client_rx.recv().await.unwrap();
        let decoded: Vec<f32> = serde_json::from_str(payload.as_str()).unwrap();
        assert_eq!(decoded.len(), BINS);
        assert!(decoded.iter().all(|&m| m == 0.0));
    }

    #[tokio::test]
    async fn test_pump_wakes_for_frames_offered_while_idle() {
        let (dispatcher, mut client_rx) = dispatcher_with_client(8);

        let (mut handoff, receiver) = SpectrumHandoff::channel(2, BINS);
        let pump = tokio::spawn(run_dispatch_pump(receiver, dispatcher.clone()));

        // Let the pump park on the notifier first
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        let mut spectrum = silent();
        spectrum[3] = 1.5;
        assert_eq!(handoff.offer(&spectrum), Offer::Queued);

        let payload = tokio::time::timeout(std::time::Duration::from_secs(1), client_rx.recv())
            .await
            .unwrap()
            .unwrap();
        let decoded: Vec<f32> = serde_json::from_str(payload.as_str()).unwrap();
        assert_eq!(decoded[3], 1.5);

        drop(handoff);
        assert_eq!(pump.await.unwrap(), 1);
    }
}
