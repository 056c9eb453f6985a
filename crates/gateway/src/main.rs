//! Tripwise API Gateway
//!
//! The HTTP front door for the travel assistant.
//! Handles:
//! - Conversation storage and history hydration
//! - Rate limiting
//! - Server-sent event delivery of answer cycles
//! - Observability (logging, metrics)

mod handlers;
mod middleware;
mod store;

use axum::{
    middleware::from_fn_with_state,
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::{signal, sync::oneshot};
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use tripwise_common::{config::AppConfig, metrics};
use tripwise_engine::{AppContext, Engine};

use crate::middleware::rate_limit::{rate_limit_middleware, RateLimit};
use crate::store::ConversationStore;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub engine: Engine,
    pub store: ConversationStore,
}

impl AppState {
    pub fn new(config: Arc<AppConfig>, engine: Engine) -> Self {
        Self {
            config,
            engine,
            store: ConversationStore::new(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = Arc::new(AppConfig::load()?);

    init_tracing(&config);
    info!(
        service = %config.observability.service_name,
        "Starting Tripwise API Gateway v{}",
        tripwise_common::VERSION
    );

    // Initialize metrics
    if config.observability.metrics_port != 0 {
        install_metrics_exporter(config.observability.metrics_port)?;
    }
    metrics::register_metrics();

    let ctx = AppContext::from_config(&config).await.map_err(|e| {
        tracing::error!(error = %e, "Failed to initialize collaborators");
        e
    })?;

    let state = AppState::new(config.clone(), Engine::new(ctx));
    let app = create_router(state);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    // In-flight streams get a bounded window to drain once a signal arrives
    let (signal_tx, signal_rx) = oneshot::channel::<()>();
    let server = axum::serve(listener, app).with_graceful_shutdown(async move {
        shutdown_signal().await;
        let _ = signal_tx.send(());
    });
    let shutdown_timeout = config.shutdown_timeout();
    let drain_deadline = async move {
        if signal_rx.await.is_err() {
            std::future::pending::<()>().await;
        }
        tokio::time::sleep(shutdown_timeout).await;
    };

    tokio::select! {
        result = server.into_future() => result?,
        _ = drain_deadline => warn!(
            timeout_secs = shutdown_timeout.as_secs(),
            "Graceful shutdown timed out, dropping open connections"
        ),
    }

    info!("Server shutdown complete");
    Ok(())
}

fn init_tracing(config: &AppConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.observability.log_level));

    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);
    if config.observability.json_logging {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn install_metrics_exporter(port: u16) -> Result<(), Box<dyn std::error::Error>> {
    PrometheusBuilder::new()
        .with_http_listener(SocketAddr::from(([0, 0, 0, 0], port)))
        .set_buckets_for_metric(
            Matcher::Full(format!("{}_cycle_duration_seconds", metrics::METRICS_PREFIX)),
            metrics::CYCLE_BUCKETS,
        )?
        .set_buckets_for_metric(
            Matcher::Full(format!("{}_connector_duration_seconds", metrics::METRICS_PREFIX)),
            metrics::UPSTREAM_BUCKETS,
        )?
        .set_buckets_for_metric(
            Matcher::Full(format!("{}_llm_duration_seconds", metrics::METRICS_PREFIX)),
            metrics::UPSTREAM_BUCKETS,
        )?
        .install()?;

    info!(port, "Prometheus exporter listening");
    Ok(())
}

/// Create the main application router
fn create_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
        .expose_headers(Any);

    // Request ID propagation
    let request_id = SetRequestIdLayer::x_request_id(MakeRequestUuid);
    let propagate_id = PropagateRequestIdLayer::x_request_id();

    let mut chat_routes = Router::new().route("/chat/stream", post(handlers::chat::stream_chat));

    if state.config.rate_limit.enabled {
        let limit = RateLimit::from_config(&state.config.rate_limit);
        chat_routes = chat_routes.layer(from_fn_with_state(limit, rate_limit_middleware));
    }

    // Compose the app
    Router::new()
        .route("/health", get(handlers::health::health))
        .route("/ready", get(handlers::health::ready))
        .nest("/v1", chat_routes)
        .layer(TimeoutLayer::new(state.config.request_timeout()))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(request_id)
        .layer(propagate_id)
        .with_state(state)
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, starting shutdown..."),
        _ = terminate => info!("Received SIGTERM, starting shutdown..."),
    }
}
