//! HTTP routes driven through the router without binding a socket
//!
//! Run with: cargo test --test web_server_test

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use http_body_util::BodyExt;
use pretty_assertions::assert_eq;
use secrecy::SecretString;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tower::ServiceExt;

use telesync::core::config::{RemoteBackend, Settings};
use telesync::core::web_server::{router, WebState};
use telesync::remote::{DirectoryRemote, RemoteStore};
use telesync::session::{LocalSessionStore, SessionManager};
use telesync::storage::FileStore;

const BOUNDARY: &str = "telesync-test-boundary";

struct Harness {
    _dir: TempDir,
    state: WebState,
}

fn harness(admin_token: Option<&str>, max_upload_bytes: u64) -> Harness {
    let dir = TempDir::new().unwrap();
    let settings = Settings {
        session_path: dir.path().join("session.json"),
        remote_session_path: "/session.json".into(),
        remote: RemoteBackend::Directory(dir.path().join("remote")),
        upload_dir: dir.path().join("uploads"),
        public_base_url: "https://files.example".into(),
        web_port: 0,
        admin_ids: vec![],
        admin_token: admin_token.map(|t| SecretString::from(t.to_string())),
        sync_interval: Duration::from_secs(300),
        max_upload_bytes,
        telegram_api_id: None,
        telegram_api_hash: None,
    };
    let remote: Arc<dyn RemoteStore> = Arc::new(DirectoryRemote::new(dir.path().join("remote")));
    let manager = Arc::new(SessionManager::new(
        LocalSessionStore::new(&settings.session_path),
        Some(remote),
        settings.remote_session_path.clone(),
    ));
    let files = FileStore::new(&settings.upload_dir, settings.max_upload_bytes);
    let state = WebState::new(manager, files, Arc::new(settings));
    Harness { _dir: dir, state }
}

fn multipart_body(field: &str, file_name: &str, content: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
    body.extend_from_slice(
        format!(
            "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: application/octet-stream\r\n\r\n",
            field, file_name
        )
        .as_bytes(),
    );
    body.extend_from_slice(content);
    body.extend_from_slice(format!("\r\n--{}--\r\n", BOUNDARY).as_bytes());
    body
}

fn upload_request(body: Vec<u8>) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/files")
        .header(header::CONTENT_TYPE, format!("multipart/form-data; boundary={}", BOUNDARY))
        .body(Body::from(body))
        .unwrap()
}

async fn json_body(response: axum::response::Response) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_health() {
    let h = harness(None, 1024);
    let response = router(h.state.clone())
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["session"], "absent");
}

#[tokio::test]
async fn test_metrics_exposition() {
    telesync::core::metrics::init_metrics();
    let h = harness(None, 1024);
    let response = router(h.state.clone())
        .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    assert!(String::from_utf8_lossy(&bytes).contains("telesync_session_active"));
}

#[tokio::test]
async fn test_upload_then_download() {
    let h = harness(None, 1024);
    let app = router(h.state.clone());

    let response = app
        .clone()
        .oneshot(upload_request(multipart_body("file", "notes.txt", b"hello world")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = json_body(response).await;
    let name = body["name"].as_str().unwrap().to_string();
    assert!(name.ends_with("_notes.txt"));
    assert_eq!(body["size"], 11);
    assert_eq!(body["url"], format!("https://files.example/files/{}", name));

    let response = app
        .clone()
        .oneshot(Request::get(format!("/files/{}", name)).body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "text/plain");
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&bytes[..], b"hello world");

    let response = app
        .oneshot(Request::get("/files").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let listing = json_body(response).await;
    assert_eq!(listing["files"][0]["name"], name.as_str());
}

#[tokio::test]
async fn test_upload_without_file_field() {
    let h = harness(None, 1024);
    let response = router(h.state.clone())
        .oneshot(upload_request(multipart_body("other", "x.txt", b"data")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_upload_too_large() {
    let h = harness(None, 8);
    let response = router(h.state.clone())
        .oneshot(upload_request(multipart_body("file", "big.bin", &[7u8; 64])))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert!(h.state.files.list().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_download_missing_and_invalid() {
    let h = harness(None, 1024);
    let app = router(h.state.clone());

    let response = app
        .clone()
        .oneshot(Request::get("/files/20260101_000000_deadbeef_nope.txt").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app
        .oneshot(Request::get("/files/.env").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_session_routes_require_token() {
    let h = harness(Some("s3cret"), 1024);
    let app = router(h.state.clone());

    let response = app
        .clone()
        .oneshot(Request::get("/session").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .clone()
        .oneshot(
            Request::get("/session")
                .header(header::AUTHORIZATION, "Bearer s3cret")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["state"], "absent");

    let response = app
        .oneshot(
            Request::post("/session/sync")
                .header(header::AUTHORIZATION, "Bearer wrong")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_sync_route_pushes_session() {
    let h = harness(None, 1024);
    h.state.manager.create(b"key".to_vec()).await.unwrap();

    let response = router(h.state.clone())
        .oneshot(Request::post("/session/sync").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["action"], "push");
    assert!(body["rev"].is_string());
}

#[tokio::test]
async fn test_health_answers_while_session_is_locked() {
    let h = harness(None, 1024);
    h.state.manager.create(b"key".to_vec()).await.unwrap();
    let _lease = h.state.manager.lease().await;

    let response = tokio::time::timeout(
        Duration::from_millis(500),
        router(h.state.clone()).oneshot(Request::get("/health").body(Body::empty()).unwrap()),
    )
    .await
    .expect("health blocked on the session lock")
    .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["session"], "active");
}

#[tokio::test]
async fn test_delete_file_requires_token() {
    let h = harness(Some("s3cret"), 1024);
    let app = router(h.state.clone());
    let stored = h
        .state
        .files
        .save("report.pdf", bytes::Bytes::from_static(b"%PDF"))
        .await
        .unwrap();
    let uri = format!("/files/{}", stored.name);

    let response = app
        .clone()
        .oneshot(Request::delete(uri.as_str()).body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .clone()
        .oneshot(
            Request::delete(uri.as_str())
                .header(header::AUTHORIZATION, "Bearer s3cret")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert!(h.state.files.list().await.unwrap().is_empty());

    let response = app
        .oneshot(
            Request::delete(uri.as_str())
                .header(header::AUTHORIZATION, "Bearer s3cret")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_error_responses_are_counted_by_category() {
    let h = harness(None, 1024);
    let before = telesync::core::metrics::HTTP_ERRORS_TOTAL
        .with_label_values(&["validation"])
        .get();
    let response = router(h.state.clone())
        .oneshot(Request::get("/files/.env").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let after = telesync::core::metrics::HTTP_ERRORS_TOTAL
        .with_label_values(&["validation"])
        .get();
    assert!(after >= before + 1.0);
}
