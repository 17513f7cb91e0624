//! Wraps the Decision Engine with the bits that don't belong in the
//! decision algorithm itself: end-to-end latency timing and health
//! checking for the RPC front-end (spec.md §4.E).

use std::sync::Arc;
use std::time::Instant;

use crate::engine::{DecisionEngine, RateLimitRequest, RateLimitResponse};
use crate::error::Result;
use crate::metrics::Metrics;

pub struct RateLimitService {
    engine: DecisionEngine,
    metrics: Arc<Metrics>,
}

impl RateLimitService {
    pub fn new(engine: DecisionEngine, metrics: Arc<Metrics>) -> Self {
        Self { engine, metrics }
    }

    /// Processes one `ShouldRateLimit` call end to end, per spec.md §7:
    /// descriptor-level failures never surface here as `Err` — this always
    /// returns `Ok` unless the request itself is structurally invalid.
    pub async fn should_rate_limit(&self, request: RateLimitRequest) -> Result<RateLimitResponse> {
        if request.descriptors.is_empty() {
            return Err(crate::error::RateLimitError::Service(
                "descriptor list must not be empty".to_string(),
            ));
        }

        let start = Instant::now();
        let response = self.engine.should_rate_limit(&request).await;
        self.metrics
            .observe_latency("request", start.elapsed().as_secs_f64());

        Ok(response)
    }

    pub async fn health_check(&self) -> Result<()> {
        self.engine.health_check().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batcher::UpdateBatcher;
    use crate::cache::AdmissionCache;
    use crate::config::Config;
    use crate::engine::Descriptor;
    use crate::store::test_support::InMemoryCounterStore;
    use std::time::Duration;

    async fn test_service() -> RateLimitService {
        let config = Config::default();
        let store = Arc::new(InMemoryCounterStore::new());
        let metrics = Arc::new(Metrics::new().unwrap());
        let cache = AdmissionCache::new(config.admission_cache_capacity);
        let batcher = UpdateBatcher::spawn(
            store.clone(),
            metrics.clone(),
            config.window().unwrap(),
            config.batcher_queue_capacity,
            config.batcher_workers,
            config.batcher_buffer_size,
            Duration::from_millis(config.batcher_flush_interval_ms),
        );
        let engine = DecisionEngine::new(config, cache, store, batcher, metrics.clone()).unwrap();
        RateLimitService::new(engine, metrics)
    }

    #[tokio::test]
    async fn rejects_empty_descriptor_list() {
        let service = test_service().await;
        let request = RateLimitRequest {
            domain: "edge".into(),
            descriptors: vec![],
            hits_addend: 1,
        };

        let result = service.should_rate_limit(request).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn processes_a_populated_request() {
        let service = test_service().await;
        let request = RateLimitRequest {
            domain: "edge".into(),
            descriptors: vec![Descriptor {
                entries: vec![("remote_address".to_string(), "10.0.0.1".to_string())],
            }],
            hits_addend: 1,
        };

        let response = service.should_rate_limit(request).await.unwrap();
        assert_eq!(response.statuses.len(), 1);
    }
}
