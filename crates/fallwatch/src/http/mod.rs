//! HTTP JSON API.
//!
//! Endpoints:
//! - GET    /health                              - Liveness (no identity required)
//! - GET    /api/fall-detection/status           - Inference slot and model settings
//! - POST   /api/fall-detection/analyze          - Upload a video, returns 202 with the job id
//! - GET    /api/fall-detection/analysis         - The caller's jobs
//! - GET    /api/fall-detection/analysis/{id}    - One job
//! - DELETE /api/fall-detection/analysis/{id}    - Delete a finished job and its alert
//! - GET    /api/alerts                          - The caller's alerts
//! - GET    /api/alerts/{id}                     - One alert
//! - PATCH  /api/alerts/{id}                     - Change an alert's status
//! - POST   /api/alerts/bulk-status              - Change the status of several alerts
//!
//! Callers are identified by the `X-User-Id` header set by the gateway.
//! Errors are returned as `{"error": message}`.

mod alerts;
mod auth;
mod error;
mod health;
mod jobs;

pub use auth::{AuthUser, USER_ID_HEADER};
pub use error::ApiError;

use std::future::Future;
use std::path::{Path, PathBuf};

use axum::extract::DefaultBodyLimit;
use axum::http::Method;
use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use self::alerts::{handle_bulk_status, handle_get_alert, handle_list_alerts, handle_update_alert};
use self::health::{handle_health, handle_status};
use self::jobs::{handle_analyze, handle_delete_job, handle_get_job, handle_list_jobs};
use crate::analysis::AnalysisService;
use crate::config::Config;
use crate::error::JobError;
use crate::store::AlertStore;

/// Room for multipart framing and text fields on top of the video itself.
const FORM_OVERHEAD_BYTES: u64 = 64 * 1024;

/// State shared by all handlers.
#[derive(Clone)]
pub struct AppState {
    pub service: AnalysisService,
    pub alerts: AlertStore,
    pub uploads_dir: PathBuf,
    pub max_upload_bytes: u64,
    /// Report foreign records as 404 rather than 403.
    pub hide_foreign_resources: bool,
}

impl AppState {
    pub fn new(service: AnalysisService, alerts: AlertStore, config: &Config) -> Self {
        Self {
            service,
            alerts,
            uploads_dir: config.uploads_dir(),
            max_upload_bytes: config.server.max_upload_bytes,
            hide_foreign_resources: config.server.hide_foreign_resources,
        }
    }

    pub(crate) fn reject(&self, err: JobError) -> ApiError {
        ApiError::from_job(err, self.hide_foreign_resources)
    }

    pub(crate) fn io_error(&self, path: &Path, source: std::io::Error) -> ApiError {
        self.reject(JobError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}

async fn handle_not_found() -> ApiError {
    ApiError::not_found()
}

/// Builds the router with tracing, CORS and the upload size limit applied.
pub fn build_router(state: AppState) -> Router {
    let body_limit = state.max_upload_bytes.saturating_add(FORM_OVERHEAD_BYTES);
    let body_limit = usize::try_from(body_limit).unwrap_or(usize::MAX);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::DELETE])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/api/fall-detection/status", get(handle_status))
        .route("/api/fall-detection/analyze", post(handle_analyze))
        .route("/api/fall-detection/analysis", get(handle_list_jobs))
        .route(
            "/api/fall-detection/analysis/{id}",
            get(handle_get_job).delete(handle_delete_job),
        )
        .route("/api/alerts", get(handle_list_alerts))
        .route("/api/alerts/bulk-status", post(handle_bulk_status))
        .route(
            "/api/alerts/{id}",
            get(handle_get_alert).patch(handle_update_alert),
        )
        .fallback(handle_not_found)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serves the API on `listener` until `shutdown` resolves.
pub async fn serve<F>(listener: TcpListener, state: AppState, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        tracing::info!(%addr, "Listening for HTTP requests");
    }
    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown)
        .await
}
