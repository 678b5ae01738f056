//! Dropbox HTTP API v2 backend
//!
//! Only the three endpoints the session backup needs: download, upload and
//! delete. Request arguments for content endpoints travel in the
//! `Dropbox-API-Arg` header, metadata comes back in `Dropbox-API-Result`.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, AUTHORIZATION, CONTENT_TYPE, RETRY_AFTER};
use reqwest::{Response, StatusCode};
use secrecy::ExposeSecret;
use serde::Deserialize;
use serde_json::json;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use super::{RemoteError, RemoteMetadata, RemoteObject, RemoteStore, WriteMode};
use crate::core::config::{self, DropboxAuth};
use crate::core::metrics;
use crate::core::retry::{retry, RetryConfig};

const API_ARG_HEADER: &str = "Dropbox-API-Arg";
const API_RESULT_HEADER: &str = "Dropbox-API-Result";

/// Refresh the access token this long before it actually expires
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(60);

/// Base URLs of the two Dropbox API hosts
#[derive(Debug, Clone)]
pub struct DropboxEndpoints {
    /// RPC host (`files/delete_v2`, `oauth2/token`)
    pub api: String,
    /// Content host (`files/upload`, `files/download`)
    pub content: String,
}

impl Default for DropboxEndpoints {
    fn default() -> Self {
        Self {
            api: "https://api.dropboxapi.com".to_string(),
            content: "https://content.dropboxapi.com".to_string(),
        }
    }
}

impl DropboxEndpoints {
    /// Points both hosts at one base URL (mock servers in tests).
    pub fn single(base: &str) -> Self {
        let base = base.trim_end_matches('/').to_string();
        Self {
            api: base.clone(),
            content: base,
        }
    }
}

#[derive(Debug, Clone)]
struct CachedToken {
    value: String,
    expires_at: Option<Instant>,
}

impl CachedToken {
    fn is_fresh(&self) -> bool {
        match self.expires_at {
            None => true,
            Some(at) => Instant::now() + TOKEN_EXPIRY_MARGIN < at,
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

/// Subset of Dropbox `FileMetadata` we use
#[derive(Debug, Deserialize)]
struct FileMetadata {
    rev: String,
    #[serde(default)]
    server_modified: Option<DateTime<Utc>>,
    #[serde(default)]
    size: u64,
}

impl From<FileMetadata> for RemoteMetadata {
    fn from(meta: FileMetadata) -> Self {
        Self {
            rev: meta.rev,
            server_modified: meta.server_modified,
            size: meta.size,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    error_summary: String,
}

/// Dropbox client with token caching and retries
pub struct DropboxClient {
    http: reqwest::Client,
    auth: DropboxAuth,
    endpoints: DropboxEndpoints,
    token: Mutex<Option<CachedToken>>,
    retry: RetryConfig,
}

impl DropboxClient {
    pub fn new(auth: DropboxAuth, endpoints: DropboxEndpoints) -> Result<Self, RemoteError> {
        let http = reqwest::Client::builder()
            .timeout(config::network::timeout())
            .user_agent(concat!("telesync/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            http,
            auth,
            endpoints,
            token: Mutex::new(None),
            retry: RetryConfig::remote(),
        })
    }

    /// Overrides the retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Returns a usable access token, refreshing it when needed.
    async fn access_token(&self) -> Result<String, RemoteError> {
        let (refresh_token, app_key, app_secret) = match &self.auth {
            DropboxAuth::AccessToken(token) => return Ok(token.expose_secret().to_string()),
            DropboxAuth::RefreshToken {
                refresh_token,
                app_key,
                app_secret,
            } => (refresh_token, app_key, app_secret),
        };

        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref().filter(|t| t.is_fresh()) {
            return Ok(token.value.clone());
        }

        let started = Instant::now();
        let response = self
            .http
            .post(format!("{}/oauth2/token", self.endpoints.api))
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token.expose_secret()),
                ("client_id", app_key.as_str()),
                ("client_secret", app_secret.expose_secret()),
            ])
            .send()
            .await?;
        observe("token", started);

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(record_error("token", RemoteError::Auth(format!("token refresh failed ({}): {}", status, body))));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| RemoteError::InvalidResponse(format!("token response: {}", e)))?;
        log::info!(
            "Refreshed Dropbox access token (expires in {}s)",
            token.expires_in.unwrap_or_default()
        );

        let value = token.access_token.clone();
        *cached = Some(CachedToken {
            value: token.access_token,
            expires_at: token.expires_in.map(|secs| Instant::now() + Duration::from_secs(secs)),
        });
        Ok(value)
    }

    async fn invalidate_token(&self) {
        *self.token.lock().await = None;
    }

    fn uses_refresh_token(&self) -> bool {
        matches!(self.auth, DropboxAuth::RefreshToken { .. })
    }

    /// Sends a request built by `build`, retrying once with a fresh token on 401.
    async fn send_authorized<F>(&self, build: F) -> Result<Response, RemoteError>
    where
        F: Fn(&str) -> reqwest::RequestBuilder,
    {
        let token = self.access_token().await?;
        let response = build(&token).send().await?;
        if response.status() == StatusCode::UNAUTHORIZED && self.uses_refresh_token() {
            log::warn!("Dropbox rejected the access token, refreshing");
            self.invalidate_token().await;
            let token = self.access_token().await?;
            return Ok(build(&token).send().await?);
        }
        Ok(response)
    }

    async fn download_once(&self, path: &str) -> Result<Option<RemoteObject>, RemoteError> {
        let url = format!("{}/2/files/download", self.endpoints.content);
        let arg = header_safe_json(&json!({ "path": path }));

        let response = self
            .send_authorized(|token| {
                self.http
                    .post(&url)
                    .header(AUTHORIZATION, format!("Bearer {}", token))
                    .header(API_ARG_HEADER, arg.as_str())
            })
            .await?;

        if !response.status().is_success() {
            let err = error_from_response(response, path).await;
            if is_not_found(&err) {
                return Ok(None);
            }
            return Err(err);
        }

        let metadata = parse_result_header(response.headers())?;
        let bytes = response.bytes().await?;
        Ok(Some(RemoteObject {
            bytes,
            metadata: metadata.into(),
        }))
    }

    async fn upload_once(&self, path: &str, bytes: Bytes, mode: &WriteMode) -> Result<RemoteMetadata, RemoteError> {
        let url = format!("{}/2/files/upload", self.endpoints.content);
        let mode_arg = match mode {
            WriteMode::Overwrite => json!("overwrite"),
            WriteMode::Update(rev) => json!({ ".tag": "update", "update": rev }),
        };
        let arg = header_safe_json(&json!({
            "path": path,
            "mode": mode_arg,
            "autorename": false,
            "mute": true,
        }));

        let response = self
            .send_authorized(|token| {
                self.http
                    .post(&url)
                    .header(AUTHORIZATION, format!("Bearer {}", token))
                    .header(API_ARG_HEADER, arg.as_str())
                    .header(CONTENT_TYPE, "application/octet-stream")
                    .body(bytes.clone())
            })
            .await?;

        if !response.status().is_success() {
            return Err(error_from_response(response, path).await);
        }

        let metadata: FileMetadata = response
            .json()
            .await
            .map_err(|e| RemoteError::InvalidResponse(format!("upload metadata: {}", e)))?;
        Ok(metadata.into())
    }

    async fn delete_once(&self, path: &str) -> Result<(), RemoteError> {
        let url = format!("{}/2/files/delete_v2", self.endpoints.api);
        let body = json!({ "path": path });

        let response = self
            .send_authorized(|token| {
                self.http
                    .post(&url)
                    .header(AUTHORIZATION, format!("Bearer {}", token))
                    .json(&body)
            })
            .await?;

        if response.status().is_success() {
            return Ok(());
        }
        let err = error_from_response(response, path).await;
        if is_not_found(&err) {
            return Ok(());
        }
        Err(err)
    }
}

#[async_trait]
impl RemoteStore for DropboxClient {
    fn name(&self) -> &str {
        "dropbox"
    }

    async fn fetch(&self, path: &str) -> Result<Option<RemoteObject>, RemoteError> {
        let started = Instant::now();
        let result = retry(&self.retry, "dropbox download", || self.download_once(path)).await;
        observe("fetch", started);
        result.map(|(object, _)| object).map_err(|e| record_error("fetch", e))
    }

    async fn put(&self, path: &str, bytes: Bytes, mode: WriteMode) -> Result<RemoteMetadata, RemoteError> {
        let started = Instant::now();
        let result = retry(&self.retry, "dropbox upload", || {
            self.upload_once(path, bytes.clone(), &mode)
        })
        .await;
        observe("put", started);
        result.map(|(meta, _)| meta).map_err(|e| record_error("put", e))
    }

    async fn delete(&self, path: &str) -> Result<(), RemoteError> {
        let started = Instant::now();
        let result = retry(&self.retry, "dropbox delete", || self.delete_once(path)).await;
        observe("delete", started);
        result.map(|_| ()).map_err(|e| record_error("delete", e))
    }
}

fn observe(operation: &str, started: Instant) {
    metrics::REMOTE_REQUEST_DURATION_SECONDS
        .with_label_values(&[operation])
        .observe(started.elapsed().as_secs_f64());
}

fn record_error(operation: &str, err: RemoteError) -> RemoteError {
    metrics::REMOTE_ERRORS_TOTAL
        .with_label_values(&[operation, err.kind()])
        .inc();
    err
}

/// Maps a non-success response to a `RemoteError`.
async fn error_from_response(response: Response, path: &str) -> RemoteError {
    let status = response.status();
    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs);
        return RemoteError::RateLimited { retry_after };
    }

    let body = response.text().await.unwrap_or_default();
    if status == StatusCode::UNAUTHORIZED {
        return RemoteError::Auth(body);
    }

    let summary = serde_json::from_str::<ApiErrorBody>(&body)
        .map(|b| b.error_summary)
        .unwrap_or_else(|_| body.chars().take(200).collect());

    if status == StatusCode::CONFLICT && summary.contains("/conflict") {
        return RemoteError::Conflict(path.to_string());
    }
    RemoteError::Api {
        status: status.as_u16(),
        summary,
    }
}

/// `path/not_found` (download) and `path_lookup/not_found` (delete)
fn is_not_found(err: &RemoteError) -> bool {
    matches!(err, RemoteError::Api { status: 409, summary } if summary.contains("not_found"))
}

fn parse_result_header(headers: &HeaderMap) -> Result<FileMetadata, RemoteError> {
    let raw = headers
        .get(API_RESULT_HEADER)
        .ok_or_else(|| RemoteError::InvalidResponse(format!("missing {} header", API_RESULT_HEADER)))?;
    let raw = raw
        .to_str()
        .map_err(|e| RemoteError::InvalidResponse(format!("{} header: {}", API_RESULT_HEADER, e)))?;
    serde_json::from_str(raw).map_err(|e| RemoteError::InvalidResponse(format!("{} header: {}", API_RESULT_HEADER, e)))
}

/// JSON for an HTTP header: non-ASCII characters are escaped as `\uXXXX`.
fn header_safe_json(value: &serde_json::Value) -> String {
    let raw = value.to_string();
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if c.is_ascii() {
            out.push(c);
        } else {
            let mut buf = [0u16; 2];
            for unit in c.encode_utf16(&mut buf) {
                out.push_str(&format!("\\u{:04x}", unit));
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_safe_json_escapes_non_ascii() {
        let encoded = header_safe_json(&json!({ "path": "/сессия.json" }));
        assert!(encoded.is_ascii());
        let decoded: serde_json::Value = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded["path"], "/сессия.json");
    }

    #[test]
    fn test_header_safe_json_escapes_astral_chars() {
        let encoded = header_safe_json(&json!("🔑"));
        assert_eq!(encoded, "\"\\ud83d\\udd11\"");
    }

    #[test]
    fn test_is_not_found() {
        let err = RemoteError::Api {
            status: 409,
            summary: "path/not_found/..".into(),
        };
        assert!(is_not_found(&err));
        assert!(!is_not_found(&RemoteError::Conflict("/x".into())));
    }

    #[test]
    fn test_cached_token_freshness() {
        let fresh = CachedToken {
            value: "t".into(),
            expires_at: Some(Instant::now() + Duration::from_secs(3600)),
        };
        let stale = CachedToken {
            value: "t".into(),
            expires_at: Some(Instant::now() + Duration::from_secs(10)),
        };
        assert!(fresh.is_fresh());
        assert!(!stale.is_fresh());
    }
}
