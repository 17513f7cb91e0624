//! Decision Engine (spec.md §4.D): maps an incoming descriptor set to
//! counter keys, chooses per-dimension limits, consults the Admission
//! Cache then the Counter Store, and emits per-descriptor and overall
//! verdicts.

use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::batcher::{DeferredUpdate, UpdateBatcher};
use crate::cache::AdmissionCache;
use crate::config::Config;
use crate::dimension::{counter_key, Dimension};
use crate::error::Result;
use crate::metrics::Metrics;
use crate::store::CounterStore;
use crate::utils::Unit;

/// One descriptor: an ordered sequence of (key, value) pairs naming a
/// single counter (spec.md §3).
#[derive(Debug, Clone)]
pub struct Descriptor {
    pub entries: Vec<(String, String)>,
}

/// A full rate-limit request: a non-empty, ordered set of descriptors
/// sharing one `domain` and `hits_addend` (spec.md §3, §6).
#[derive(Debug, Clone)]
pub struct RateLimitRequest {
    pub domain: String,
    pub descriptors: Vec<Descriptor>,
    pub hits_addend: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Code {
    Ok,
    OverLimit,
}

#[derive(Debug, Clone)]
pub struct CurrentLimit {
    pub requests_per_unit: u32,
    pub unit: Unit,
}

#[derive(Debug, Clone)]
pub struct DescriptorStatus {
    pub code: Code,
    pub current_limit: Option<CurrentLimit>,
    pub limit_remaining: u32,
}

#[derive(Debug, Clone)]
pub struct RateLimitResponse {
    pub overall_code: Code,
    pub statuses: Vec<DescriptorStatus>,
}

pub struct DecisionEngine {
    config: Config,
    window: Duration,
    cache: AdmissionCache,
    store: Arc<dyn CounterStore>,
    batcher: UpdateBatcher,
    metrics: Arc<Metrics>,
}

impl DecisionEngine {
    pub fn new(
        config: Config,
        cache: AdmissionCache,
        store: Arc<dyn CounterStore>,
        batcher: UpdateBatcher,
        metrics: Arc<Metrics>,
    ) -> Result<Self> {
        let window = config.window()?;
        Ok(Self {
            config,
            window,
            cache,
            store,
            batcher,
            metrics,
        })
    }

    pub async fn health_check(&self) -> Result<()> {
        self.store.ping().await
    }

    /// spec.md §4.D: request-level aggregation over the per-descriptor
    /// algorithm. Descriptor order is preserved in the output (invariant 2,
    /// spec.md §8).
    pub async fn should_rate_limit(&self, request: &RateLimitRequest) -> RateLimitResponse {
        let hits = if request.hits_addend == 0 {
            1
        } else {
            request.hits_addend as u64
        };

        let mut statuses = Vec::with_capacity(request.descriptors.len());
        for descriptor in &request.descriptors {
            statuses.push(self.evaluate_descriptor(descriptor, hits).await);
            self.enqueue_analytics_update(descriptor);
        }

        let overall_code = if statuses.iter().any(|s| s.code == Code::OverLimit) {
            Code::OverLimit
        } else {
            Code::Ok
        };

        RateLimitResponse {
            overall_code,
            statuses,
        }
    }

    /// §4.D steps 1-5.
    async fn evaluate_descriptor(&self, descriptor: &Descriptor, hits: u64) -> DescriptorStatus {
        // 1. Scan entries in order; the last recognized entry wins.
        let mut selected: Option<(Dimension, &str)> = None;
        for (key, value) in &descriptor.entries {
            if let Some(dimension) = Dimension::from_descriptor_key(key) {
                selected = Some((dimension, value.as_str()));
            }
        }

        // 2. No recognized entry: lenient current behavior (spec.md §9 open
        // question 1) — counted as an error but returned as OK.
        let Some((dimension, value)) = selected else {
            self.metrics.record_request("error", "unknown", "no_valid_key");
            return DescriptorStatus {
                code: Code::Ok,
                current_limit: None,
                limit_remaining: 0,
            };
        };

        let limit = self.config.limit_for(dimension) as u64;
        let key = counter_key(dimension, value);
        let type_label = dimension.as_str();

        // 3. Cache consult: a hit that's already over limit short-circuits
        // the store round trip entirely.
        if let Some(count) = self.cache.get(&key).await {
            self.metrics.record_admission_cache_hit();
            if count >= limit {
                self.metrics.record_request("over_limit", type_label, "none");
                return over_limit(limit);
            }
        } else {
            self.metrics.record_admission_cache_miss();
        }

        // 4. Cache miss, or under-limit cache hit: go to the Counter Store.
        match self.store.increment(&key, hits, self.window).await {
            Ok(count) => {
                self.cache.put(key, count).await;
                if count > limit {
                    self.metrics.record_request("over_limit", type_label, "none");
                    over_limit(limit)
                } else {
                    self.metrics.record_request("ok", type_label, "none");
                    DescriptorStatus {
                        code: Code::Ok,
                        current_limit: Some(CurrentLimit {
                            requests_per_unit: limit as u32,
                            unit: Unit::Minute,
                        }),
                        limit_remaining: (limit - count) as u32,
                    }
                }
            }
            // 5. Store error: fail closed at the descriptor level. The
            // store has already counted this against redis_errors_total.
            Err(e) => {
                warn!(key = %key, error = %e, "counter store error, failing closed");
                self.metrics.record_request("error", type_label, "store");
                over_limit(limit)
            }
        }
    }

    /// Enqueues the parallel, best-effort analytics update (spec.md §4.C).
    /// Never consulted by the decision path above.
    fn enqueue_analytics_update(&self, descriptor: &Descriptor) {
        let ip = find_value(descriptor, "remote_address");
        let company_id = find_value(descriptor, "company_id");
        if ip.is_some() || company_id.is_some() {
            self.batcher.enqueue(DeferredUpdate { ip, company_id });
        }
    }
}

fn find_value(descriptor: &Descriptor, key: &str) -> Option<String> {
    descriptor
        .entries
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.clone())
}

fn over_limit(limit: u64) -> DescriptorStatus {
    DescriptorStatus {
        code: Code::OverLimit,
        current_limit: Some(CurrentLimit {
            requests_per_unit: limit as u32,
            unit: Unit::Minute,
        }),
        limit_remaining: 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_support::InMemoryCounterStore;
    use std::sync::atomic::Ordering;

    async fn test_engine(config: Config) -> (DecisionEngine, Arc<InMemoryCounterStore>) {
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
        let engine =
            DecisionEngine::new(config, cache, store.clone(), batcher, metrics).unwrap();
        (engine, store)
    }

    fn descriptor(pairs: &[(&str, &str)]) -> Descriptor {
        Descriptor {
            entries: pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    #[tokio::test]
    async fn single_ok_request() {
        let (engine, _) = test_engine(Config::default()).await;
        let request = RateLimitRequest {
            domain: "edge".into(),
            descriptors: vec![descriptor(&[("remote_address", "10.0.0.1")])],
            hits_addend: 1,
        };

        let response = engine.should_rate_limit(&request).await;
        assert_eq!(response.overall_code, Code::Ok);
        assert_eq!(response.statuses.len(), 1);
        let status = &response.statuses[0];
        assert_eq!(status.code, Code::Ok);
        assert_eq!(status.limit_remaining, 999);
        let limit = status.current_limit.as_ref().unwrap();
        assert_eq!(limit.requests_per_unit, 1000);
        assert!(matches!(limit.unit, Unit::Minute));
    }

    #[tokio::test]
    async fn crossing_the_limit_yields_over_limit() {
        let mut config = Config::default();
        config.ip_rate_limit = 3;
        let (engine, _) = test_engine(config).await;

        let mut last = None;
        for _ in 0..4 {
            let request = RateLimitRequest {
                domain: "edge".into(),
                descriptors: vec![descriptor(&[("remote_address", "10.0.0.2")])],
                hits_addend: 1,
            };
            last = Some(engine.should_rate_limit(&request).await);
        }

        let response = last.unwrap();
        assert_eq!(response.overall_code, Code::OverLimit);
        assert_eq!(response.statuses[0].limit_remaining, 0);
    }

    #[tokio::test]
    async fn mixed_descriptors_report_independent_verdicts() {
        let mut config = Config::default();
        config.user_rate_limit = 2;
        let (engine, _) = test_engine(config).await;

        let mut last = None;
        for _ in 0..3 {
            let request = RateLimitRequest {
                domain: "edge".into(),
                descriptors: vec![
                    descriptor(&[("remote_address", "10.0.0.3")]),
                    descriptor(&[("user_id", "u1")]),
                ],
                hits_addend: 1,
            };
            last = Some(engine.should_rate_limit(&request).await);
        }

        let response = last.unwrap();
        assert_eq!(response.overall_code, Code::OverLimit);
        assert_eq!(response.statuses[0].code, Code::Ok);
        assert_eq!(response.statuses[1].code, Code::OverLimit);
    }

    #[tokio::test]
    async fn unrecognized_descriptor_is_lenient_but_counted() {
        let (engine, _) = test_engine(Config::default()).await;
        let request = RateLimitRequest {
            domain: "edge".into(),
            descriptors: vec![descriptor(&[("foo", "bar")])],
            hits_addend: 1,
        };

        let response = engine.should_rate_limit(&request).await;
        assert_eq!(response.overall_code, Code::Ok);
        assert_eq!(response.statuses[0].code, Code::Ok);
        assert!(response.statuses[0].current_limit.is_none());
        assert_eq!(response.statuses[0].limit_remaining, 0);
    }

    #[tokio::test]
    async fn last_recognized_key_wins_when_descriptor_has_multiple() {
        let (engine, store) = test_engine(Config::default()).await;
        let request = RateLimitRequest {
            domain: "edge".into(),
            descriptors: vec![descriptor(&[
                ("remote_address", "10.0.0.4"),
                ("user_id", "u9"),
            ])],
            hits_addend: 1,
        };

        engine.should_rate_limit(&request).await;
        // "user" dimension should have been incremented, not "ip".
        let user_count = store.increment("user:u9", 0, Duration::from_secs(60)).await.unwrap();
        assert_eq!(user_count, 1);
    }

    #[tokio::test]
    async fn store_failure_fails_closed() {
        let (engine, store) = test_engine(Config::default()).await;
        store.fail_next.store(true, Ordering::SeqCst);

        let request = RateLimitRequest {
            domain: "edge".into(),
            descriptors: vec![descriptor(&[("remote_address", "10.0.0.5")])],
            hits_addend: 1,
        };

        let response = engine.should_rate_limit(&request).await;
        assert_eq!(response.overall_code, Code::OverLimit);
        assert_eq!(response.statuses[0].limit_remaining, 0);
    }

    #[tokio::test]
    async fn hits_addend_zero_is_treated_as_one() {
        let (engine, store) = test_engine(Config::default()).await;
        let request = RateLimitRequest {
            domain: "edge".into(),
            descriptors: vec![descriptor(&[("remote_address", "10.0.0.6")])],
            hits_addend: 0,
        };

        engine.should_rate_limit(&request).await;
        let count = store.increment("ip:10.0.0.6", 0, Duration::from_secs(60)).await.unwrap();
        assert_eq!(count, 1);
    }
}
