//! Update Batcher (spec.md §4.C): decouples the decision hot path from
//! counter-store write latency for a parallel, analytics-only write
//! stream. The Decision Engine's own verdict-critical increments go
//! straight to the Counter Store (see `engine.rs`) — this pipeline only
//! feeds the `ip:<v>` / `company:<v>` / `combined:<ip>:<company>` keys
//! that exist for external analytics and that nothing in the decision
//! path ever reads back (spec.md §9, open question 3).

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

use crate::metrics::Metrics;
use crate::store::CounterStore;

/// A pending increment derived from one descriptor's `remote_address` and
/// `company_id` values, if present.
#[derive(Debug, Clone)]
pub struct DeferredUpdate {
    pub ip: Option<String>,
    pub company_id: Option<String>,
}

/// Handle to the batcher's ingress queue. Cheap to clone; every RPC handler
/// holds one.
#[derive(Clone)]
pub struct UpdateBatcher {
    sender: mpsc::Sender<DeferredUpdate>,
    metrics: Arc<Metrics>,
}

impl UpdateBatcher {
    /// Spawns `workers` long-lived worker tasks sharing one bounded ingress
    /// queue. Each worker owns its own local buffer and flush timer — no
    /// shared mutable state beyond the queue itself (spec.md §4.C, §9).
    pub fn spawn(
        store: Arc<dyn CounterStore>,
        metrics: Arc<Metrics>,
        window: Duration,
        queue_capacity: usize,
        workers: usize,
        buffer_size: usize,
        flush_interval: Duration,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(queue_capacity);
        let receiver = Arc::new(Mutex::new(receiver));

        for id in 0..workers {
            tokio::spawn(worker_loop(
                id,
                receiver.clone(),
                store.clone(),
                metrics.clone(),
                window,
                buffer_size,
                flush_interval,
            ));
        }

        Self { sender, metrics }
    }

    /// Non-blocking enqueue. A full queue drops the update and counts it —
    /// this is the batcher's sole backpressure signal (spec.md §5).
    pub fn enqueue(&self, update: DeferredUpdate) {
        if self.sender.try_send(update).is_err() {
            debug!("update batcher queue full, dropping deferred update");
            self.metrics.record_batcher_queue_drop();
        }
    }
}

async fn worker_loop(
    id: usize,
    receiver: Arc<Mutex<mpsc::Receiver<DeferredUpdate>>>,
    store: Arc<dyn CounterStore>,
    metrics: Arc<Metrics>,
    window: Duration,
    buffer_size: usize,
    flush_interval: Duration,
) {
    let mut buffer: Vec<DeferredUpdate> = Vec::with_capacity(buffer_size);
    let mut ticker = tokio::time::interval(flush_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            item = recv_one(&receiver) => {
                match item {
                    Some(update) => {
                        buffer.push(update);
                        if buffer.len() >= buffer_size {
                            flush(id, &store, &metrics, &mut buffer, window).await;
                        }
                    }
                    None => {
                        // Sender side dropped; nothing left to do.
                        return;
                    }
                }
            }
            _ = ticker.tick() => {
                if !buffer.is_empty() {
                    flush(id, &store, &metrics, &mut buffer, window).await;
                }
            }
        }
    }
}

async fn recv_one(
    receiver: &Arc<Mutex<mpsc::Receiver<DeferredUpdate>>>,
) -> Option<DeferredUpdate> {
    receiver.lock().await.recv().await
}

async fn flush(
    worker_id: usize,
    store: &Arc<dyn CounterStore>,
    metrics: &Metrics,
    buffer: &mut Vec<DeferredUpdate>,
    window: Duration,
) {
    let keys = analytics_keys(buffer);
    buffer.clear();

    if keys.is_empty() {
        return;
    }

    match store.pipeline_increment(&keys, window).await {
        Ok(()) => metrics.record_batcher_flush("ok"),
        Err(e) => {
            warn!(worker = worker_id, error = %e, "batcher flush failed, buffer dropped");
            metrics.record_batcher_flush("error");
        }
    }
}

/// Translates buffered descriptors into the analytics-only key set
/// (spec.md §4.C).
fn analytics_keys(buffer: &[DeferredUpdate]) -> Vec<String> {
    let mut keys = Vec::with_capacity(buffer.len() * 2);
    for update in buffer {
        if let Some(ip) = &update.ip {
            keys.push(format!("ip:{ip}"));
        }
        if let Some(company) = &update.company_id {
            keys.push(format!("company:{company}"));
        }
        if let (Some(ip), Some(company)) = (&update.ip, &update.company_id) {
            keys.push(format!("combined:{ip}:{company}"));
        }
    }
    keys
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_support::InMemoryCounterStore;

    #[test]
    fn analytics_keys_cover_ip_company_and_combined() {
        let buffer = vec![DeferredUpdate {
            ip: Some("10.0.0.1".into()),
            company_id: Some("acme".into()),
        }];
        let keys = analytics_keys(&buffer);
        assert!(keys.contains(&"ip:10.0.0.1".to_string()));
        assert!(keys.contains(&"company:acme".to_string()));
        assert!(keys.contains(&"combined:10.0.0.1:acme".to_string()));
    }

    #[test]
    fn analytics_keys_omit_combined_when_one_side_missing() {
        let buffer = vec![DeferredUpdate {
            ip: Some("10.0.0.1".into()),
            company_id: None,
        }];
        let keys = analytics_keys(&buffer);
        assert_eq!(keys, vec!["ip:10.0.0.1".to_string()]);
    }

    #[tokio::test]
    async fn flush_fires_on_buffer_capacity() {
        let store: Arc<dyn CounterStore> = Arc::new(InMemoryCounterStore::new());
        let metrics = Arc::new(Metrics::new().unwrap());
        let batcher = UpdateBatcher::spawn(
            store.clone(),
            metrics,
            Duration::from_secs(60),
            100,
            1,
            2, // buffer_size
            Duration::from_secs(3600), // timer far in the future
        );

        batcher.enqueue(DeferredUpdate {
            ip: Some("10.0.0.1".into()),
            company_id: None,
        });
        batcher.enqueue(DeferredUpdate {
            ip: Some("10.0.0.2".into()),
            company_id: None,
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        let count = store.increment("ip:10.0.0.1", 0, Duration::from_secs(60)).await.unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn flush_fires_on_timer_with_partial_buffer() {
        let store: Arc<dyn CounterStore> = Arc::new(InMemoryCounterStore::new());
        let metrics = Arc::new(Metrics::new().unwrap());
        let batcher = UpdateBatcher::spawn(
            store.clone(),
            metrics,
            Duration::from_secs(60),
            100,
            1,
            100, // buffer never fills from one update
            Duration::from_millis(20),
        );

        batcher.enqueue(DeferredUpdate {
            ip: Some("10.0.0.9".into()),
            company_id: Some("acme".into()),
        });

        tokio::time::sleep(Duration::from_millis(100)).await;
        let count = store.increment("combined:10.0.0.9:acme", 0, Duration::from_secs(60)).await.unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn enqueue_drops_on_full_queue_without_blocking() {
        let store: Arc<dyn CounterStore> = Arc::new(InMemoryCounterStore::new());
        let metrics = Arc::new(Metrics::new().unwrap());
        // Zero workers: nothing ever drains the queue, so it fills up.
        let batcher = UpdateBatcher::spawn(
            store,
            metrics,
            Duration::from_secs(60),
            1,
            0,
            10,
            Duration::from_secs(3600),
        );

        batcher.enqueue(DeferredUpdate { ip: Some("a".into()), company_id: None });
        // Second enqueue should not block even though the queue is full.
        batcher.enqueue(DeferredUpdate { ip: Some("b".into()), company_id: None });
    }
}
