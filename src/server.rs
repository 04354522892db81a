//! HTTP surface: `GET /health`, `GET /ready`, `POST /predict`.

use std::{sync::Arc, time::Duration};

use axum::{
    extract::{rejection::JsonRejection, DefaultBodyLimit, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};

use crate::{
    config::ServiceConfig,
    core::pipeline::Pipeline,
    error::SeparationError,
    types::{SeparationRequest, SeparationResult},
};

#[derive(Clone)]
pub struct AppState {
    pipeline: Arc<Pipeline>,
    request_timeout: Option<Duration>,
}

impl AppState {
    pub fn new(pipeline: Arc<Pipeline>, request_timeout: Option<Duration>) -> Self {
        Self {
            pipeline,
            request_timeout,
        }
    }
}

/// JSON error body `{"error": <code>, "detail": <message>}` with its status.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    detail: String,
}

impl From<SeparationError> for ApiError {
    fn from(e: SeparationError) -> Self {
        Self {
            status: StatusCode::from_u16(e.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            code: e.code(),
            detail: e.to_string(),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
            return Self {
                status: StatusCode::PAYLOAD_TOO_LARGE,
                code: "payload_too_large",
                detail: rejection.body_text(),
            };
        }
        Self {
            status: StatusCode::BAD_REQUEST,
            code: "decoding_error",
            detail: format!("invalid request body: {}", rejection.body_text()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = json!({ "error": self.code, "detail": self.detail });
        (self.status, Json(body)).into_response()
    }
}

pub fn router(state: AppState, max_body_bytes: usize) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ready", get(ready))
        .route("/predict", post(predict))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Binds `cfg.listen_addr` and serves until Ctrl-C / SIGTERM.
pub async fn serve(cfg: ServiceConfig) -> anyhow::Result<()> {
    let pipeline = cfg.build_pipeline();
    match pipeline.workspaces().sweep_stale() {
        Ok(0) => {}
        Ok(n) => info!(removed = n, root = %pipeline.workspaces().root().display(), "removed stale workspaces"),
        Err(e) => warn!(error = %e, "could not sweep stale workspaces"),
    }

    let state = AppState::new(Arc::new(pipeline), cfg.request_timeout());
    let app = router(state, cfg.max_body_bytes());

    let listener = tokio::net::TcpListener::bind(&cfg.listen_addr).await?;
    info!(addr = %listener.local_addr()?, tmp_dir = %cfg.tmp_dir.display(), "stem splitter listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutting down");
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn ready(State(state): State<AppState>) -> Response {
    let pipeline = state.pipeline.clone();
    match tokio::task::spawn_blocking(move || pipeline.check()).await {
        Ok(Ok(())) => (StatusCode::OK, Json(json!({ "status": "ready" }))).into_response(),
        Ok(Err(e)) => {
            let mut err = ApiError::from(e);
            err.status = StatusCode::SERVICE_UNAVAILABLE;
            err.into_response()
        }
        Err(e) => ApiError::from(SeparationError::SeparationExecution(format!(
            "readiness check panicked: {e}"
        )))
        .into_response(),
    }
}

/// Runs the blocking pipeline on its own thread so long separations never
/// hold up other requests.
///
/// `content_type` in the response is `audio/mpeg`. Earlier deployments of
/// this API answered `audio/mp3`; clients that compare the string should
/// accept both.
async fn predict(
    State(state): State<AppState>,
    payload: Result<Json<SeparationRequest>, JsonRejection>,
) -> Result<Json<SeparationResult>, ApiError> {
    let Json(request) = payload?;

    let pipeline = state.pipeline.clone();
    let task = tokio::task::spawn_blocking(move || pipeline.process(request));

    // On timeout the worker keeps running and still releases its workspace.
    let joined = match state.request_timeout {
        Some(limit) => tokio::time::timeout(limit, task)
            .await
            .map_err(|_| SeparationError::TimedOut(limit))?,
        None => task.await,
    };

    let result = joined
        .map_err(|e| SeparationError::SeparationExecution(format!("worker failed: {e}")))??;
    Ok(Json(result))
}
