//! Distributed rate-limit decision service speaking the Envoy rate limit
//! protocol (spec.md §1). Coordinates counters across a fleet through a
//! shared Redis cluster, absorbing decision load through a per-process
//! admission cache and amortizing writes through background batching.

pub mod batcher;
pub mod cache;
pub mod config;
pub mod dimension;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod proto;
pub mod rpc;
pub mod service;
pub mod store;
pub mod utils;

pub use config::Config;
pub use error::{RateLimitError, Result};
pub use service::RateLimitService;
