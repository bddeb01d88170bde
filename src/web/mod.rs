pub mod extractors;
pub mod handlers;
pub mod middleware;

use crate::{
    config::{ServerConfig, StartupMode},
    image::ImageLoader,
    models::{manager::spawn_reload_task, ModelManager},
    Config, Result,
};
use axum::{
    extract::{DefaultBodyLimit, State},
    http::StatusCode,
    middleware::from_fn,
    response::Json,
    routing::{get, post},
    Router,
};
use middleware::InferenceLimiter;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, limit::RequestBodyLimitLayer, timeout::TimeoutLayer};

/// 处理器共享状态，启动时构建一次
#[derive(Clone)]
pub struct AppState {
    pub models: Arc<ModelManager>,
    pub limiter: InferenceLimiter,
    pub loader: Arc<ImageLoader>,
    pub max_request_size: usize,
    server_config: Arc<ServerConfig>,
}

impl AppState {
    pub fn new(models: Arc<ModelManager>, server_config: &ServerConfig) -> Self {
        Self {
            models,
            limiter: InferenceLimiter::new(
                server_config.max_concurrent_inferences,
                server_config.max_queued_requests,
            ),
            loader: Arc::new(ImageLoader::new(server_config.max_image_dimension)),
            max_request_size: server_config.max_request_size,
            server_config: Arc::new(server_config.clone()),
        }
    }
}

pub async fn serve(config: Config) -> Result<()> {
    let addr = config.validate()?;

    let load_config = config.clone();
    let models = tokio::task::spawn_blocking(move || ModelManager::load(&load_config))
        .await
        .map_err(|e| crate::ClassifierError::Internal(format!("Model load task failed: {}", e)))??;
    let models = Arc::new(models);

    if !models.is_ready() && config.startup_mode == StartupMode::Degraded {
        if let Some(interval) = config.retry_interval {
            tracing::info!("Retrying model load every {}s", interval.as_secs());
            spawn_reload_task(Arc::clone(&models), config.clone(), interval);
        }
    }

    let state = AppState::new(models, &config.server_config);
    let app = create_app(state);

    tracing::info!("Server starting on http://{}", addr);
    tracing::info!("API endpoints:");
    tracing::info!("  POST /predict   - Multipart image upload");
    tracing::info!("  GET  /health    - Readiness check");
    tracing::info!("  GET  /api/info  - Service information");

    let listener = TcpListener::bind(&addr).await.map_err(|e| {
        crate::ClassifierError::Internal(format!("Failed to bind to address {}: {}", addr, e))
    })?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

pub fn create_app(state: AppState) -> Router {
    let server_config = Arc::clone(&state.server_config);

    Router::new()
        .route("/predict", post(handlers::predict_handler))
        .route("/health", get(health_handler))
        .route("/api/info", get(info_handler))
        .layer(from_fn(middleware::request_logging))
        .layer(from_fn(middleware::security_headers))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(server_config.max_request_size))
        .layer(TimeoutLayer::new(Duration::from_secs(
            server_config.request_timeout,
        )))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// 就绪检查：模型加载后返回200，之前返回503
async fn health_handler(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    let health = state.models.health();
    let status = if health.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let body = json!({
        "status": if health.ready { "healthy" } else { "unready" },
        "ready": health.ready,
        "reason": health.reason,
        "since": health.since.to_rfc3339(),
        "device": health.device,
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION"),
    });

    (status, Json(body))
}

/// 服务信息处理器
async fn info_handler(State(state): State<AppState>) -> Json<Value> {
    let stats = state.models.get_stats();

    Json(json!({
        "service": "Flood Classifier",
        "version": env!("CARGO_PKG_VERSION"),
        "description": env!("CARGO_PKG_DESCRIPTION"),
        "model": stats,
        "limits": {
            "request_timeout_secs": state.server_config.request_timeout,
            "max_request_size": state.server_config.max_request_size,
            "max_concurrent_inferences": state.server_config.max_concurrent_inferences,
            "max_queued_requests": state.server_config.max_queued_requests,
            "max_image_dimension": state.server_config.max_image_dimension,
            "queue_capacity": state.limiter.capacity(),
            "available_slots": state.limiter.available_slots(),
        }
    }))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl-C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
