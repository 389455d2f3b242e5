#![allow(dead_code)]

use anyhow::Result;
use axum::body::{to_bytes, Body};
use axum::http::{HeaderMap, Request, StatusCode};
use metrika_common::codec::Compression;
use metrika_common::secure::Signer;
use metrika_server::app;
use metrika_server::state::{AppState, Storage};
use metrika_storage::dumper::FileDumper;
use metrika_storage::sqlite::{SqliteBackend, SqliteDatabase};
use metrika_storage::StorageState;
use serde_json::Value;
use std::sync::Arc;
use tempfile::TempDir;
use tower::util::ServiceExt;

pub struct TestContext {
    pub temp_dir: TempDir,
    pub state: AppState,
    pub app: axum::Router,
}

impl TestContext {
    fn new(temp_dir: TempDir, state: AppState) -> Self {
        let app = app::build_http_app(state.clone());
        Self {
            temp_dir,
            state,
            app,
        }
    }

    pub fn dump_path(&self) -> std::path::PathBuf {
        self.temp_dir.path().join("metrics.json")
    }
}

/// In-memory backend, no signing, no dumps.
pub fn build_test_context() -> Result<TestContext> {
    let temp_dir = tempfile::tempdir()?;
    let state = AppState::new(Storage::in_memory(StorageState::new(), StorageState::new()));
    Ok(TestContext::new(temp_dir, state))
}

/// SQLite backend in a temporary directory.
pub fn build_sqlite_context() -> Result<TestContext> {
    let temp_dir = tempfile::tempdir()?;
    let db = SqliteDatabase::open(&temp_dir.path().join("metrics.db"))?;
    let state = AppState::new(Storage::sqlite(SqliteBackend::new(db)));
    Ok(TestContext::new(temp_dir, state))
}

/// In-memory backend with signature checks under `key`.
pub fn build_signed_context(key: &str) -> Result<TestContext> {
    let temp_dir = tempfile::tempdir()?;
    let state = AppState::new(Storage::in_memory(StorageState::new(), StorageState::new()))
        .with_signer(Some(Signer::new(key)));
    Ok(TestContext::new(temp_dir, state))
}

/// In-memory backend dumping to `<temp>/metrics.json` after every write.
pub fn build_sync_dump_context() -> Result<TestContext> {
    let temp_dir = tempfile::tempdir()?;
    let dumper = Arc::new(FileDumper::new(temp_dir.path().join("metrics.json")));
    let state = AppState::new(Storage::in_memory(StorageState::new(), StorageState::new()))
        .with_sync_dump(dumper, false);
    Ok(TestContext::new(temp_dir, state))
}

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl TestResponse {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).to_string()
    }

    pub fn json(&self) -> Value {
        serde_json::from_slice(&self.body).expect("body should be JSON")
    }
}

pub async fn send(app: &axum::Router, req: Request<Body>) -> TestResponse {
    let resp = app
        .clone()
        .oneshot(req)
        .await
        .expect("request should be handled");
    let status = resp.status();
    let headers = resp.headers().clone();
    let body = to_bytes(resp.into_body(), usize::MAX)
        .await
        .expect("body should read")
        .to_vec();
    TestResponse {
        status,
        headers,
        body,
    }
}

pub async fn request_no_body(app: &axum::Router, method: &str, uri: &str) -> TestResponse {
    let req = Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .expect("request should build");
    send(app, req).await
}

pub async fn request_raw(app: &axum::Router, method: &str, uri: &str, body: &str) -> TestResponse {
    let req = Request::builder()
        .method(method)
        .uri(uri)
        .header("Content-Type", "application/json")
        .body(Body::from(body.to_string()))
        .expect("request should build");
    send(app, req).await
}

pub async fn request_json(app: &axum::Router, method: &str, uri: &str, body: Value) -> TestResponse {
    request_raw(app, method, uri, &body.to_string()).await
}

/// Posts `body`, optionally gzip-compressed and signed, the way the agent does.
pub async fn post_encoded(
    app: &axum::Router,
    uri: &str,
    body: &Value,
    compression: Compression,
    signer: Option<&Signer>,
) -> TestResponse {
    let payload = compression
        .encode(body.to_string().as_bytes())
        .expect("body should encode");
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header("Content-Type", "application/json");
    if let Some(encoding) = compression.content_encoding() {
        builder = builder.header("Content-Encoding", encoding);
    }
    if let Some(signer) = signer {
        builder = builder.header("HashSHA256", signer.sign(&payload).expect("body should sign"));
    }
    let req = builder
        .body(Body::from(payload))
        .expect("request should build");
    send(app, req).await
}
