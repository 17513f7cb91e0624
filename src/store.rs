//! Counter Store (spec.md §4.A): authoritative counter arithmetic across
//! the fleet, backed by a Redis cluster.

use std::time::Duration;

use async_trait::async_trait;
use redis::{cluster::ClusterClientBuilder, cluster_async::ClusterConnection, Script};
use tracing::warn;

use crate::error::{RateLimitError, Result};
use crate::metrics::Metrics;

/// `{Incr, PipelineIncr, Ping}` capability surface, kept as a trait so the
/// Decision Engine and Update Batcher can be tested against an in-memory
/// double without a live Redis cluster (spec.md §9 re-architecture notes).
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Atomically increments `key` by `by` and returns the new value. On the
    /// 0→1 transition the key's TTL is set to `window`; later increments in
    /// the same window leave the TTL untouched (fixed window, not sliding).
    async fn increment(&self, key: &str, by: u64, window: Duration) -> Result<u64>;

    /// Best-effort batch form of `increment`. Not atomic across keys —
    /// partial success is acceptable; a single error covers the whole call.
    async fn pipeline_increment(&self, keys: &[String], window: Duration) -> Result<()>;

    /// Liveness probe, used at startup and by the health endpoint.
    async fn ping(&self) -> Result<()>;
}

// INCR then, only on the 0→1 transition, EXPIRE — this is what makes the
// counter a fixed window instead of refreshing its TTL on every hit.
const INCR_AND_EXPIRE_ONCE: &str = r"
local count = redis.call('INCRBY', KEYS[1], ARGV[1])
if count == tonumber(ARGV[1]) then
    redis.call('EXPIRE', KEYS[1], ARGV[2])
end
return count
";

/// Redis-cluster-backed `CounterStore`. Key-to-shard mapping is handled by
/// the cluster client transparently; `store_max_redirects` bounds how many
/// MOVED/ASK redirects it will follow per call.
pub struct RedisCounterStore {
    connection: ClusterConnection,
    timeout: Duration,
    metrics: std::sync::Arc<Metrics>,
    script: Script,
}

impl RedisCounterStore {
    pub async fn connect(
        addrs: &[String],
        max_redirects: u32,
        timeout: Duration,
        metrics: std::sync::Arc<Metrics>,
    ) -> Result<Self> {
        let urls: Vec<String> = addrs
            .iter()
            .map(|a| format!("redis://{a}"))
            .collect();

        let client = ClusterClientBuilder::new(urls)
            .retries(max_redirects)
            .build()
            .map_err(RateLimitError::Store)?;

        let connection = client
            .get_async_connection()
            .await
            .map_err(RateLimitError::Store)?;

        Ok(Self {
            connection,
            timeout,
            metrics,
            script: Script::new(INCR_AND_EXPIRE_ONCE),
        })
    }

    async fn with_timeout<F, T>(&self, operation: &'static str, fut: F) -> Result<T>
    where
        F: std::future::Future<Output = redis::RedisResult<T>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                self.metrics.record_redis_error(operation);
                Err(RateLimitError::Store(e))
            }
            Err(_) => {
                self.metrics.record_redis_error(operation);
                Err(RateLimitError::StoreTimeout(self.timeout))
            }
        }
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn increment(&self, key: &str, by: u64, window: Duration) -> Result<u64> {
        let mut conn = self.connection.clone();
        let window_secs = window.as_secs().max(1);
        self.with_timeout(
            "incr",
            self.script
                .key(key)
                .arg(by)
                .arg(window_secs)
                .invoke_async(&mut conn),
        )
        .await
    }

    async fn pipeline_increment(&self, keys: &[String], window: Duration) -> Result<()> {
        if keys.is_empty() {
            return Ok(());
        }

        // Cluster keys can land on different shards, so a single atomic
        // pipeline isn't available; increments are issued concurrently
        // instead. This matches spec.md §4.A: "not atomic across keys;
        // partial success is acceptable. Failure is reported as a single
        // error."
        let results = futures::future::join_all(
            keys.iter().map(|key| self.increment(key, 1, window)),
        )
        .await;

        let mut first_error = None;
        for result in results {
            if let Err(e) = result {
                warn!(error = %e, "pipeline_increment: key failed");
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.connection.clone();
        self.with_timeout("ping", redis::cmd("PING").query_async(&mut conn))
            .await
    }
}
