use thiserror::Error;

/// Result type used throughout the service.
pub type Result<T> = std::result::Result<T, RateLimitError>;

/// Errors surfaced by the counter store, admission cache, batcher and
/// decision engine. Per spec.md §7, per-descriptor errors never escape the
/// gRPC boundary as a `Result::Err` — only startup and malformed-request
/// errors do.
#[derive(Error, Debug)]
pub enum RateLimitError {
    #[error("counter store error: {0}")]
    Store(#[from] redis::RedisError),

    #[error("counter store operation timed out after {0:?}")]
    StoreTimeout(std::time::Duration),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("service error: {0}")]
    Service(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
