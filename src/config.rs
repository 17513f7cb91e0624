use std::time::Duration;

use serde::Deserialize;

use crate::dimension::Dimension;
use crate::error::{RateLimitError, Result};

/// Static, compiled-in defaults, overridable by environment (spec.md §6).
/// Loaded once at startup and handed to every component by reference —
/// there is no dynamic reconfiguration protocol (spec.md §1 Non-goals); a
/// restart is required to change any of these.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub rate_limit_window: String,
    pub ip_rate_limit: u32,
    pub path_rate_limit: u32,
    pub company_rate_limit: u32,
    pub user_rate_limit: u32,
    pub redis_cluster_addrs: Vec<String>,

    pub grpc_addr: String,
    pub metrics_addr: String,

    pub admission_cache_capacity: u64,
    pub store_timeout_secs: u64,
    pub store_max_redirects: u32,

    pub batcher_queue_capacity: usize,
    pub batcher_workers: usize,
    pub batcher_buffer_size: usize,
    pub batcher_flush_interval_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            rate_limit_window: "60s".to_string(),
            ip_rate_limit: 1000,
            path_rate_limit: 500,
            company_rate_limit: 10_000,
            user_rate_limit: 100,
            redis_cluster_addrs: vec![
                "redis-cluster-0.redis:6379".to_string(),
                "redis-cluster-1.redis:6379".to_string(),
                "redis-cluster-2.redis:6379".to_string(),
            ],
            grpc_addr: "0.0.0.0:8081".to_string(),
            metrics_addr: "0.0.0.0:9090".to_string(),
            admission_cache_capacity: 100_000,
            store_timeout_secs: 1,
            store_max_redirects: 3,
            batcher_queue_capacity: 10_000,
            batcher_workers: 10,
            batcher_buffer_size: 100,
            batcher_flush_interval_ms: 100,
        }
    }
}

impl Config {
    /// Load config from environment, falling back to the defaults above for
    /// anything unset. Environment variable names match the struct's
    /// upper-snake-cased field names (`RATE_LIMIT_WINDOW`, `IP_RATE_LIMIT`,
    /// `REDIS_CLUSTER_ADDRS`, ...), per spec.md §6.
    pub fn load() -> Result<Self> {
        let defaults = Self::default();

        let builder = config::Config::builder()
            .set_default("rate_limit_window", defaults.rate_limit_window.clone())
            .map_err(config_err)?
            .set_default("ip_rate_limit", defaults.ip_rate_limit)
            .map_err(config_err)?
            .set_default("path_rate_limit", defaults.path_rate_limit)
            .map_err(config_err)?
            .set_default("company_rate_limit", defaults.company_rate_limit)
            .map_err(config_err)?
            .set_default("user_rate_limit", defaults.user_rate_limit)
            .map_err(config_err)?
            .set_default("redis_cluster_addrs", defaults.redis_cluster_addrs.clone())
            .map_err(config_err)?
            .set_default("grpc_addr", defaults.grpc_addr.clone())
            .map_err(config_err)?
            .set_default("metrics_addr", defaults.metrics_addr.clone())
            .map_err(config_err)?
            .set_default("admission_cache_capacity", defaults.admission_cache_capacity)
            .map_err(config_err)?
            .set_default("store_timeout_secs", defaults.store_timeout_secs)
            .map_err(config_err)?
            .set_default("store_max_redirects", defaults.store_max_redirects)
            .map_err(config_err)?
            .set_default("batcher_queue_capacity", defaults.batcher_queue_capacity as i64)
            .map_err(config_err)?
            .set_default("batcher_workers", defaults.batcher_workers as i64)
            .map_err(config_err)?
            .set_default("batcher_buffer_size", defaults.batcher_buffer_size as i64)
            .map_err(config_err)?
            .set_default(
                "batcher_flush_interval_ms",
                defaults.batcher_flush_interval_ms,
            )
            .map_err(config_err)?
            .add_source(
                config::Environment::default()
                    .list_separator(",")
                    .with_list_parse_key("redis_cluster_addrs"),
            );

        let raw = builder.build().map_err(config_err)?;
        raw.try_deserialize().map_err(config_err)
    }

    /// Parse `rate_limit_window` into a `Duration`, accepting a bare integer
    /// (seconds) or a `<n><unit>` suffix (`s`, `m`, `h`, `d`).
    pub fn window(&self) -> Result<Duration> {
        parse_duration(&self.rate_limit_window)
    }

    /// The static Limit Table (spec.md §3): requests-per-window by
    /// dimension.
    pub fn limit_for(&self, dimension: Dimension) -> u32 {
        match dimension {
            Dimension::Ip => self.ip_rate_limit,
            Dimension::Path => self.path_rate_limit,
            Dimension::Company => self.company_rate_limit,
            Dimension::User => self.user_rate_limit,
        }
    }
}

fn config_err(e: config::ConfigError) -> RateLimitError {
    RateLimitError::Config(e.to_string())
}

fn parse_duration(raw: &str) -> Result<Duration> {
    let raw = raw.trim();
    if let Ok(secs) = raw.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }

    let (digits, suffix) = raw.split_at(raw.len().saturating_sub(1));
    let n: u64 = digits
        .parse()
        .map_err(|_| RateLimitError::Config(format!("invalid duration: {raw}")))?;

    let secs = match suffix {
        "s" => n,
        "m" => n * 60,
        "h" => n * 3600,
        "d" => n * 86_400,
        other => {
            return Err(RateLimitError::Config(format!(
                "unrecognized duration suffix: {other}"
            )))
        }
    };

    Ok(Duration::from_secs(secs))
}
