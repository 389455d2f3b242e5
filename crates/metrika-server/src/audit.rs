//! Fire-and-forget audit trail of accepted writes.

use crate::config::AuditConfig;
use anyhow::Context;
use async_trait::async_trait;
use axum::extract::{ConnectInfo, FromRequestParts};
use axum::http::request::Parts;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

/// Receives the ids of every accepted write.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn log_metrics(&self, ids: &[String], source_addr: &str) -> anyhow::Result<()>;
}

/// One audit record, serialized as a single JSON line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Unix seconds.
    pub ts: i64,
    pub metrics: Vec<String>,
    pub ip_address: String,
}

struct FileTarget {
    path: PathBuf,
    lock: Mutex<()>,
}

/// Writes entries to a file and/or posts them to a URL, concurrently.
pub struct AuditLogger {
    file: Option<FileTarget>,
    url: Option<String>,
    client: reqwest::Client,
}

impl AuditLogger {
    /// Returns `None` when neither target is configured.
    pub fn from_config(config: &AuditConfig) -> anyhow::Result<Option<Self>> {
        if config.file.is_none() && config.url.is_none() {
            return Ok(None);
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .context("failed to build audit HTTP client")?;
        Ok(Some(Self {
            file: config.file.as_ref().map(|path| FileTarget {
                path: PathBuf::from(path),
                lock: Mutex::new(()),
            }),
            url: config.url.clone(),
            client,
        }))
    }

    async fn write_file(&self, line: &[u8]) -> anyhow::Result<()> {
        let Some(target) = &self.file else {
            return Ok(());
        };
        let _guard = target.lock.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&target.path)
            .await
            .with_context(|| format!("failed to open audit file {}", target.path.display()))?;
        file.write_all(line).await?;
        file.write_all(b"\n").await?;
        file.flush().await?;
        Ok(())
    }

    async fn post(&self, body: &[u8]) -> anyhow::Result<()> {
        let Some(url) = &self.url else {
            return Ok(());
        };
        let response = self
            .client
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body.to_vec())
            .send()
            .await
            .context("failed to send audit entry")?;
        if !response.status().is_success() {
            anyhow::bail!("audit endpoint returned {}", response.status());
        }
        Ok(())
    }
}

#[async_trait]
impl AuditSink for AuditLogger {
    async fn log_metrics(&self, ids: &[String], source_addr: &str) -> anyhow::Result<()> {
        let entry = AuditEntry {
            ts: chrono::Utc::now().timestamp(),
            metrics: ids.to_vec(),
            ip_address: source_addr.to_string(),
        };
        let body = serde_json::to_vec(&entry)?;
        let (file, url) = tokio::join!(self.write_file(&body), self.post(&body));
        file?;
        url?;
        Ok(())
    }
}

/// Hands an entry to the sink in the background; failures are only logged.
pub fn spawn_audit(sink: Arc<dyn AuditSink>, ids: Vec<String>, source_addr: String) {
    tokio::spawn(async move {
        if let Err(e) = sink.log_metrics(&ids, &source_addr).await {
            tracing::warn!(error = %e, count = ids.len(), "Audit logging failed");
        }
    });
}

/// Client address for audit entries: `X-Real-IP` when present, otherwise
/// the socket peer, otherwise empty.
#[derive(Debug, Clone)]
pub struct SourceAddr(pub String);

impl<S: Send + Sync> FromRequestParts<S> for SourceAddr {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let real_ip = parts
            .headers
            .get("X-Real-IP")
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty());
        if let Some(ip) = real_ip {
            return Ok(SourceAddr(ip.to_string()));
        }
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip().to_string())
            .unwrap_or_default();
        Ok(SourceAddr(peer))
    }
}
