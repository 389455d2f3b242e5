use crate::error::DeliveryError;
use async_trait::async_trait;
use metrika_common::codec::Compression;
use metrika_common::secure::SIGNATURE_HEADER;
use reqwest::header::{ACCEPT_ENCODING, CONTENT_ENCODING, CONTENT_TYPE};
use std::time::Duration;

/// A batch ready for the wire: encoded, compressed and signed.
#[derive(Debug, Clone)]
pub struct EncodedBatch {
    pub body: Vec<u8>,
    pub compression: Compression,
    pub signature: Option<String>,
    /// Number of metrics in the batch, for logs.
    pub metrics: usize,
}

/// Sends one encoded batch and reports the response status.
///
/// Implementations return `Err` only for transport failures; any HTTP
/// status, including errors, is returned as `Ok(status)` for the caller to
/// classify.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, batch: &EncodedBatch) -> Result<u16, DeliveryError>;
}

/// Posts batches to the server's `/updates/` endpoint.
pub struct HttpTransport {
    client: reqwest::Client,
    url: String,
}

impl HttpTransport {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, DeliveryError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, batch: &EncodedBatch) -> Result<u16, DeliveryError> {
        let mut request = self
            .client
            .post(&self.url)
            .header(CONTENT_TYPE, "application/json");
        if let Some(encoding) = batch.compression.content_encoding() {
            request = request
                .header(CONTENT_ENCODING, encoding)
                .header(ACCEPT_ENCODING, encoding);
        }
        if let Some(signature) = &batch.signature {
            request = request.header(SIGNATURE_HEADER, signature);
        }

        let response = request.body(batch.body.clone()).send().await?;
        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            tracing::debug!(status = status.as_u16(), body = %detail.trim(), "Server returned error");
        }
        Ok(status.as_u16())
    }
}
