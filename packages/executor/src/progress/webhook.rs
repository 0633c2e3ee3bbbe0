// packages/executor/src/progress/webhook.rs
//! Outbound progress callbacks
//!
//! One POST per event, no retries. Callers treat delivery as
//! fire-and-forget; see `ProgressPublisher::notify`.

use crate::task::TaskState;
use crate::utils::errors::{ExecutorError, Result};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

/// Destination for progress callbacks
#[async_trait]
pub trait CallbackSink: Send + Sync {
    /// Deliver one event to `url`
    async fn deliver(&self, url: &str, event: &TaskState) -> Result<()>;
}

/// HTTP callback delivery (JSON body, POST)
pub struct HttpCallback {
    client: Client,
}

impl HttpCallback {
    /// Create a callback client with a per-request timeout
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ExecutorError::Callback(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { client })
    }
}

#[async_trait]
impl CallbackSink for HttpCallback {
    async fn deliver(&self, url: &str, event: &TaskState) -> Result<()> {
        let response = self
            .client
            .post(url)
            .header("content-type", "application/json")
            .json(event)
            .send()
            .await
            .map_err(|e| ExecutorError::Callback(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ExecutorError::Callback(format!(
                "{} responded with {}",
                url,
                response.status()
            )));
        }

        Ok(())
    }
}
