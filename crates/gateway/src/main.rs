//! askforge API Gateway
//!
//! HTTP front door for the conversational retrieval core.
//! Handles:
//! - Request routing and validation
//! - Rate limiting and backpressure
//! - Observability (logging, metrics, request ids)

mod handlers;
mod middleware;

use askforge_common::{
    config::AppConfig,
    context::{MemoryStore, Orchestrator},
    embeddings::create_embedder,
    errors::Result as AppResult,
    index::{create_index, VectorIndex},
    ingest::IngestService,
    llm::create_language_model,
    metrics,
};
use axum::{
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::Notify;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub orchestrator: Arc<Orchestrator>,
    pub ingest: Arc<IngestService>,
    pub index: Arc<dyn VectorIndex>,
}

/// Wire collaborators and the core from configuration
async fn build_state(config: Arc<AppConfig>) -> AppResult<AppState> {
    let embedder = create_embedder(&config.embedding)?;
    let llm = create_language_model(&config.llm)?;
    let index = create_index(&config).await?;
    let memory = Arc::new(MemoryStore::new(&config.memory));

    info!(
        embedder = embedder.model_name(),
        llm = llm.model_name(),
        index = index.backend(),
        "Collaborators ready"
    );

    let orchestrator = Orchestrator::new(&config, embedder.clone(), index.clone(), llm, memory);
    let ingest = IngestService::new(embedder, index.clone());

    Ok(AppState {
        config,
        orchestrator: Arc::new(orchestrator),
        ingest: Arc::new(ingest),
        index,
    })
}

fn init_tracing(config: &AppConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.observability.log_level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    if config.observability.json_logging {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn init_metrics(config: &AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    metrics::register_metrics();

    if config.observability.metrics_port == 0 {
        return Ok(());
    }

    let addr = SocketAddr::from(([0, 0, 0, 0], config.observability.metrics_port));
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .set_buckets_for_metric(
            Matcher::Full(format!("{}_request_duration_seconds", metrics::METRICS_PREFIX)),
            metrics::LATENCY_BUCKETS,
        )?
        .set_buckets_for_metric(Matcher::Suffix("_duration_seconds".to_string()), metrics::UPSTREAM_BUCKETS)?
        .install()?;

    info!(%addr, "Prometheus exporter listening");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config = Arc::new(AppConfig::load()?);
    init_tracing(&config);

    info!("Starting askforge gateway v{}", askforge_common::VERSION);

    init_metrics(&config)?;

    let state = build_state(config.clone()).await?;
    let app = create_router(state)?;

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Listening on {}", addr);

    let stop = Arc::new(Notify::new());
    let server = axum::serve(listener, app).with_graceful_shutdown({
        let stop = stop.clone();
        async move { stop.notified().await }
    });
    let mut server = tokio::spawn(async move { server.await });

    tokio::select! {
        result = &mut server => result??,
        _ = shutdown_signal() => {
            stop.notify_one();
            match tokio::time::timeout(config.shutdown_timeout(), server).await {
                Ok(result) => result??,
                Err(_) => warn!("Shutdown deadline reached, dropping open connections"),
            }
        }
    }

    info!("Server shutdown complete");
    Ok(())
}

/// Create the main application router
fn create_router(state: AppState) -> AppResult<Router> {
    let config = state.config.clone();

    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Request ID propagation
    let request_id = SetRequestIdLayer::x_request_id(MakeRequestUuid);
    let propagate_id = PropagateRequestIdLayer::x_request_id();

    let mut api_routes = Router::new()
        // Health endpoints
        .route("/health", get(handlers::health::health))
        .route("/ready", get(handlers::health::ready))
        // Conversational retrieval
        .route("/chat", post(handlers::chat::chat))
        // Ingestion
        .route("/ingest", post(handlers::ingest::ingest))
        // Session memory
        .route(
            "/sessions/{session_id}/memory",
            get(handlers::sessions::get_memory),
        )
        .route_layer(axum::middleware::from_fn(middleware::track_metrics));

    if config.rate_limit.enabled {
        let limit =
            middleware::RateLimit::new(config.rate_limit.requests_per_second, config.rate_limit.burst)?;
        api_routes = api_routes.layer(axum::middleware::from_fn(
            move |request: axum::extract::Request, next: axum::middleware::Next| {
                middleware::rate_limit_middleware(limit.clone(), request, next)
            },
        ));
    }

    // Compose the app
    Ok(Router::new()
        .nest("/v2", api_routes)
        .layer(ConcurrencyLimitLayer::new(config.server.max_concurrent_requests))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(propagate_id)
        .layer(request_id)
        .with_state(state))
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, starting shutdown..."),
        _ = terminate => info!("Received SIGTERM, starting shutdown..."),
    }
}
