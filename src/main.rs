use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::{extract::State, http::StatusCode, response::Json, routing::get, Router};
use prometheus::TextEncoder;
use serde_json::json;
use tokio::{net::TcpListener, signal};
use tonic::transport::Server;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ratelimit_core::batcher::UpdateBatcher;
use ratelimit_core::cache::AdmissionCache;
use ratelimit_core::config::Config;
use ratelimit_core::engine::DecisionEngine;
use ratelimit_core::metrics::Metrics;
use ratelimit_core::proto::{generated::FILE_DESCRIPTOR_SET, RateLimitServiceServer};
use ratelimit_core::rpc::{trace_interceptor, RateLimitServiceImpl};
use ratelimit_core::service::RateLimitService;
use ratelimit_core::store::{CounterStore, RedisCounterStore};

#[derive(Clone)]
struct AppState {
    service: Arc<RateLimitService>,
    metrics: Arc<Metrics>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ratelimit_core=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("starting rate limit decision service");

    let config = Config::load()?;
    let metrics = Arc::new(Metrics::new()?);

    // spec.md §7: Redis connect/ping failure at startup is fatal.
    let service = match build_service(&config, metrics.clone()).await {
        Ok(service) => service,
        Err(e) => {
            error!(error = %e, "fatal startup error");
            std::process::exit(1);
        }
    };

    let state = AppState {
        service: service.clone(),
        metrics,
    };

    let metrics_addr: SocketAddr = config.metrics_addr.parse()?;
    let grpc_addr: SocketAddr = config.grpc_addr.parse()?;

    info!(%metrics_addr, "metrics listener starting");
    info!(%grpc_addr, "grpc listener starting");

    tokio::select! {
        result = start_metrics_server(state, metrics_addr) => {
            if let Err(e) = result {
                error!(error = %e, "metrics server exited");
            }
        }
        result = start_grpc_server(service, grpc_addr) => {
            if let Err(e) = result {
                error!(error = %e, "grpc server exited");
            }
        }
        _ = signal::ctrl_c() => {
            info!("received ctrl-c, shutting down");
        }
    }

    Ok(())
}

async fn build_service(config: &Config, metrics: Arc<Metrics>) -> anyhow::Result<Arc<RateLimitService>> {
    let window = config.window()?;

    let store: Arc<dyn CounterStore> = Arc::new(
        RedisCounterStore::connect(
            &config.redis_cluster_addrs,
            config.store_max_redirects,
            std::time::Duration::from_secs(config.store_timeout_secs),
            metrics.clone(),
        )
        .await?,
    );
    store.ping().await?;

    let cache = AdmissionCache::new(config.admission_cache_capacity);

    let batcher = UpdateBatcher::spawn(
        store.clone(),
        metrics.clone(),
        window,
        config.batcher_queue_capacity,
        config.batcher_workers,
        config.batcher_buffer_size,
        std::time::Duration::from_millis(config.batcher_flush_interval_ms),
    );

    let engine = DecisionEngine::new(config.clone(), cache, store, batcher, metrics.clone())?;
    Ok(Arc::new(RateLimitService::new(engine, metrics)))
}

async fn start_metrics_server(state: AppState, addr: SocketAddr) -> anyhow::Result<()> {
    let app: Router = Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/healthcheck", get(health_check))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn start_grpc_server(service: Arc<RateLimitService>, addr: SocketAddr) -> anyhow::Result<()> {
    let reflection = tonic_reflection::server::Builder::configure()
        .register_encoded_file_descriptor_set(FILE_DESCRIPTOR_SET)
        .build()?;

    let grpc_service = RateLimitServiceImpl { service };
    let server = RateLimitServiceServer::with_interceptor(grpc_service, trace_interceptor);

    Server::builder()
        .add_service(server)
        .add_service(reflection)
        .serve(addr)
        .await
        .map_err(|e| anyhow::anyhow!("grpc server error: {e}"))
}

async fn health_check(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    match state.service.health_check().await {
        Ok(()) => Ok(Json(json!({
            "status": "healthy",
            "timestamp": chrono::Utc::now().to_rfc3339(),
        }))),
        Err(_) => Err(StatusCode::SERVICE_UNAVAILABLE),
    }
}

async fn metrics_handler(State(state): State<AppState>) -> Result<String, StatusCode> {
    let encoder = TextEncoder::new();
    let metric_families = state.metrics.registry().gather();
    encoder
        .encode_to_string(&metric_families)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}
