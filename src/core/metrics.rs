//! Prometheus metrics for session sync, remote storage, and uploads
//!
//! Everything registers in the default registry, which `/metrics` gathers.

use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge, register_histogram_vec, CounterVec, Gauge, HistogramVec,
};

lazy_static! {
    /// Sync runs by outcome
    /// Labels: outcome (nothing/in_sync/push/pull/failed)
    pub static ref SESSION_SYNC_TOTAL: CounterVec = register_counter_vec!(
        "telesync_session_sync_total",
        "Session sync runs by outcome",
        &["outcome"]
    )
    .unwrap();

    /// Session lifecycle events
    /// Labels: event (created/refreshed/invalidated/corrupt)
    pub static ref SESSION_EVENTS_TOTAL: CounterVec = register_counter_vec!(
        "telesync_session_events_total",
        "Session lifecycle transitions",
        &["event"]
    )
    .unwrap();

    /// 1 when an active session is held, 0 otherwise
    pub static ref SESSION_ACTIVE: Gauge = register_gauge!(
        "telesync_session_active",
        "Whether an active session is loaded"
    )
    .unwrap();

    /// Remote storage request latency
    /// Labels: operation (fetch/put/delete/token)
    pub static ref REMOTE_REQUEST_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "telesync_remote_request_duration_seconds",
        "Remote storage request latency",
        &["operation"],
        vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]
    )
    .unwrap();

    /// Remote storage errors
    /// Labels: operation, kind
    pub static ref REMOTE_ERRORS_TOTAL: CounterVec = register_counter_vec!(
        "telesync_remote_errors_total",
        "Remote storage errors by operation and kind",
        &["operation", "kind"]
    )
    .unwrap();

    /// Retries performed by the retry helper
    /// Labels: attempt
    pub static ref RETRIES_TOTAL: CounterVec = register_counter_vec!(
        "telesync_retries_total",
        "Retried operations by attempt number",
        &["attempt"]
    )
    .unwrap();

    /// Stored uploads
    /// Labels: source (http/telegram), result (stored/rejected)
    pub static ref UPLOADS_TOTAL: CounterVec = register_counter_vec!(
        "telesync_uploads_total",
        "Files accepted or rejected by the upload store",
        &["source", "result"]
    )
    .unwrap();

    /// Failed HTTP requests
    /// Labels: category (see `AppError::category`)
    pub static ref HTTP_ERRORS_TOTAL: CounterVec = register_counter_vec!(
        "telesync_http_errors_total",
        "HTTP requests that ended in an error response",
        &["category"]
    )
    .unwrap();

    /// Bot commands handled
    /// Labels: command
    pub static ref BOT_COMMANDS_TOTAL: CounterVec = register_counter_vec!(
        "telesync_bot_commands_total",
        "Bot commands handled",
        &["command"]
    )
    .unwrap();
}

/// Forces registration so `/metrics` lists every series from the start.
pub fn init_metrics() {
    lazy_static::initialize(&SESSION_SYNC_TOTAL);
    lazy_static::initialize(&SESSION_EVENTS_TOTAL);
    lazy_static::initialize(&SESSION_ACTIVE);
    lazy_static::initialize(&REMOTE_REQUEST_DURATION_SECONDS);
    lazy_static::initialize(&REMOTE_ERRORS_TOTAL);
    lazy_static::initialize(&RETRIES_TOTAL);
    lazy_static::initialize(&UPLOADS_TOTAL);
    lazy_static::initialize(&HTTP_ERRORS_TOTAL);
    lazy_static::initialize(&BOT_COMMANDS_TOTAL);
}

/// Renders the default registry in Prometheus text format.
pub fn render() -> Result<(String, String), prometheus::Error> {
    use prometheus::{Encoder, TextEncoder};

    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&prometheus::gather(), &mut buffer)?;
    let body = String::from_utf8_lossy(&buffer).into_owned();
    Ok((encoder.format_type().to_string(), body))
}
