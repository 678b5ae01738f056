//! HTTP front door: health, metrics, session status and the file server.
//!
//! Runs on WEB_PORT (default 3000). `/session` routes require
//! `Authorization: Bearer <ADMIN_TOKEN>` when a token is configured.

use axum::{
    extract::{multipart::MultipartError, DefaultBodyLimit, Multipart, Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use bytes::BytesMut;
use secrecy::ExposeSecret;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::time::Instant;
use tower_http::limit::RequestBodyLimitLayer;

use crate::core::config::Settings;
use crate::core::error::AppError;
use crate::core::metrics;
use crate::remote::RemoteError;
use crate::session::{SessionError, SessionManager};
use crate::storage::{public_url, FileStore};

/// Room for multipart boundaries and part headers on top of the file itself.
const MULTIPART_OVERHEAD: u64 = 64 * 1024;

/// Shared state for the web server.
#[derive(Clone)]
pub struct WebState {
    pub manager: Arc<SessionManager>,
    pub files: FileStore,
    pub settings: Arc<Settings>,
    pub start_time: Instant,
}

impl WebState {
    pub fn new(manager: Arc<SessionManager>, files: FileStore, settings: Arc<Settings>) -> Self {
        Self {
            manager,
            files,
            settings,
            start_time: Instant::now(),
        }
    }
}

/// Builds the router. Split out from [`start_web_server`] so tests can drive it directly.
pub fn router(state: WebState) -> Router {
    let body_limit = usize::try_from(state.files.max_bytes().saturating_add(MULTIPART_OVERHEAD)).unwrap_or(usize::MAX);

    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/session", get(session_status_handler))
        .route("/session/sync", post(session_sync_handler))
        .route("/files", get(list_files_handler).post(upload_handler))
        .route("/files/:name", get(download_handler).delete(delete_file_handler))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(body_limit))
        .with_state(state)
}

/// Start the web server and serve until the shutdown future resolves.
pub async fn start_web_server(
    state: WebState,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr = SocketAddr::from(([0, 0, 0, 0], state.settings.web_port));
    let app = router(state);

    log::info!("Starting web server on http://{}", addr);
    log::info!("  /health            - Health check");
    log::info!("  /metrics           - Prometheus metrics");
    log::info!("  /session           - Session status (admin)");
    log::info!("  /session/sync      - Trigger a sync (admin)");
    log::info!("  /files, /files/:n  - Upload, list, download, delete (admin)");

    let listener = TcpListener::bind(&addr).await?;
    axum::serve(listener, app).with_graceful_shutdown(shutdown).await?;

    Ok(())
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::TooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::Session(SessionError::NoSession | SessionError::Invalidated(_)) => StatusCode::CONFLICT,
            AppError::Session(SessionError::Remote(e)) | AppError::Remote(e) => remote_status(e),
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        metrics::HTTP_ERRORS_TOTAL.with_label_values(&[self.category()]).inc();
        if status.is_server_error() {
            log::error!("Request failed: {}", self);
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

fn remote_status(err: &RemoteError) -> StatusCode {
    match err {
        RemoteError::RateLimited { .. } => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::BAD_GATEWAY,
    }
}

fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        [(header::WWW_AUTHENTICATE, "Bearer")],
        Json(json!({ "error": "unauthorized" })),
    )
        .into_response()
}

/// Checks the bearer token when `ADMIN_TOKEN` is configured.
fn authorized(settings: &Settings, headers: &HeaderMap) -> bool {
    let Some(expected) = settings.admin_token.as_ref() else {
        return true;
    };
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.as_bytes().strip_prefix(b"Bearer "))
        .is_some_and(|token| constant_time_eq(token, expected.expose_secret().as_bytes()))
}

/// Compares without short-circuiting on the first differing byte.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// GET /health
///
/// Never waits on the session lock.
async fn health_handler(State(state): State<WebState>) -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "uptime_seconds": state.start_time.elapsed().as_secs(),
        "version": env!("CARGO_PKG_VERSION"),
        "session": state.manager.state_label(),
    }))
}

/// GET /metrics
async fn metrics_handler() -> Response {
    match metrics::render() {
        Ok((content_type, body)) => ([(header::CONTENT_TYPE, content_type)], body).into_response(),
        Err(e) => {
            log::error!("Failed to encode metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, format!("Failed to encode metrics: {}", e)).into_response()
        }
    }
}

/// GET /session
async fn session_status_handler(State(state): State<WebState>, headers: HeaderMap) -> Response {
    if !authorized(&state.settings, &headers) {
        return unauthorized();
    }
    Json(state.manager.status().await).into_response()
}

/// POST /session/sync
async fn session_sync_handler(State(state): State<WebState>, headers: HeaderMap) -> Response {
    if !authorized(&state.settings, &headers) {
        return unauthorized();
    }
    match state.manager.sync().await {
        Ok(outcome) => Json(outcome).into_response(),
        Err(e) => AppError::from(e).into_response(),
    }
}

/// POST /files (multipart, field `file`)
async fn upload_handler(State(state): State<WebState>, mut multipart: Multipart) -> Result<Response, AppError> {
    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|e| multipart_error(e, state.files.max_bytes()))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let original = field.file_name().unwrap_or("upload").to_string();

        let mut buf = BytesMut::new();
        while let Some(chunk) = field
            .chunk()
            .await
            .map_err(|e| multipart_error(e, state.files.max_bytes()))?
        {
            buf.extend_from_slice(&chunk);
            if let Err(e) = state.files.check_size(buf.len() as u64) {
                metrics::UPLOADS_TOTAL.with_label_values(&["http", "rejected"]).inc();
                return Err(e);
            }
        }

        let stored = state.files.save(&original, buf.freeze()).await?;
        metrics::UPLOADS_TOTAL.with_label_values(&["http", "stored"]).inc();
        let url = public_url(&state.settings.public_base_url, &stored.name);
        return Ok((
            StatusCode::CREATED,
            Json(json!({ "name": stored.name, "size": stored.size, "url": url })),
        )
            .into_response());
    }

    Err(AppError::Validation("multipart field \"file\" is missing".to_string()))
}

fn multipart_error(err: MultipartError, limit: u64) -> AppError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        // The body limit tripped mid-stream; the exact size is unknown.
        AppError::TooLarge {
            size: limit.saturating_add(1),
            limit,
        }
    } else {
        AppError::Validation(format!("invalid multipart body: {}", err.body_text()))
    }
}

/// GET /files
async fn list_files_handler(State(state): State<WebState>) -> Result<Response, AppError> {
    let files = state.files.list().await?;
    let base = &state.settings.public_base_url;
    let items: Vec<_> = files
        .into_iter()
        .map(|f| {
            json!({
                "url": public_url(base, &f.name),
                "name": f.name,
                "size": f.size,
                "modified": f.modified,
                "content_type": f.content_type,
            })
        })
        .collect();
    Ok(Json(json!({ "files": items })).into_response())
}

/// GET /files/:name
async fn download_handler(State(state): State<WebState>, Path(name): Path<String>) -> Result<Response, AppError> {
    let (file, bytes) = state.files.open(&name).await?;
    Ok((
        [
            (header::CONTENT_TYPE, file.content_type),
            (header::CONTENT_DISPOSITION, format!("inline; filename=\"{}\"", file.name)),
        ],
        bytes,
    )
        .into_response())
}

/// DELETE /files/:name (admin)
async fn delete_file_handler(
    State(state): State<WebState>,
    headers: HeaderMap,
    Path(name): Path<String>,
) -> Result<Response, AppError> {
    if !authorized(&state.settings, &headers) {
        return Ok(unauthorized());
    }
    state.files.remove(&name).await?;
    log::info!("Deleted uploaded file {}", name);
    Ok(StatusCode::NO_CONTENT.into_response())
}
