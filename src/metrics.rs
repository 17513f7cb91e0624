use std::sync::Arc;

use prometheus::{Counter, CounterVec, Histogram, HistogramOpts, HistogramVec, Opts, Registry};

/// Metrics collector for the rate limit service. Registered once at
/// startup and shared by reference; metric registration itself is the one
/// process-wide-global exception spec.md §9 allows.
#[derive(Clone)]
pub struct Metrics {
    registry: Arc<Registry>,

    // spec.md §6: "Metrics emitted" — the three that are required.
    requests_total: CounterVec,
    redis_errors_total: CounterVec,
    latency_seconds: HistogramVec,

    // Ambient, beyond the required minimum.
    admission_cache_hits: Counter,
    admission_cache_misses: Counter,
    batcher_queue_drops: Counter,
    batcher_flushes: CounterVec,
}

impl Metrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let requests_total = CounterVec::new(
            Opts::new(
                "rate_limit_requests_total",
                "Total rate limit decisions by outcome",
            ),
            &["status", "type", "error"],
        )?;

        let redis_errors_total = CounterVec::new(
            Opts::new(
                "redis_errors_total",
                "Counter store errors by operation",
            ),
            &["operation"],
        )?;

        let latency_seconds = HistogramVec::new(
            HistogramOpts::new(
                "rate_limit_latency_seconds",
                "Rate limit decision latency in seconds",
            ),
            &["type"],
        )?;

        let admission_cache_hits = Counter::new(
            "admission_cache_hits_total",
            "Admission cache hits",
        )?;
        let admission_cache_misses = Counter::new(
            "admission_cache_misses_total",
            "Admission cache misses",
        )?;
        let batcher_queue_drops = Counter::new(
            "update_batcher_queue_drops_total",
            "Deferred updates dropped because the ingress queue was full",
        )?;
        let batcher_flushes = CounterVec::new(
            Opts::new(
                "update_batcher_flushes_total",
                "Update batcher flushes by result",
            ),
            &["result"],
        )?;

        registry.register(Box::new(requests_total.clone()))?;
        registry.register(Box::new(redis_errors_total.clone()))?;
        registry.register(Box::new(latency_seconds.clone()))?;
        registry.register(Box::new(admission_cache_hits.clone()))?;
        registry.register(Box::new(admission_cache_misses.clone()))?;
        registry.register(Box::new(batcher_queue_drops.clone()))?;
        registry.register(Box::new(batcher_flushes.clone()))?;

        Ok(Self {
            registry,
            requests_total,
            redis_errors_total,
            latency_seconds,
            admission_cache_hits,
            admission_cache_misses,
            batcher_queue_drops,
            batcher_flushes,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// `rate_limit_requests_total{status,type,error}` — `status` is
    /// `ok` | `over_limit` | `error`; `type` is the dimension name or
    /// `unknown`; `error` is `none` unless `status=error`.
    pub fn record_request(&self, status: &str, dimension_type: &str, error: &str) {
        self.requests_total
            .with_label_values(&[status, dimension_type, error])
            .inc();
    }

    /// `redis_errors_total{operation}`.
    pub fn record_redis_error(&self, operation: &str) {
        self.redis_errors_total.with_label_values(&[operation]).inc();
    }

    /// `rate_limit_latency_seconds{type}`.
    pub fn observe_latency(&self, label_type: &str, seconds: f64) {
        self.latency_seconds
            .with_label_values(&[label_type])
            .observe(seconds);
    }

    pub fn record_admission_cache_hit(&self) {
        self.admission_cache_hits.inc();
    }

    pub fn record_admission_cache_miss(&self) {
        self.admission_cache_misses.inc();
    }

    pub fn record_batcher_queue_drop(&self) {
        self.batcher_queue_drops.inc();
    }

    pub fn record_batcher_flush(&self, result: &str) {
        self.batcher_flushes.with_label_values(&[result]).inc();
    }
}
