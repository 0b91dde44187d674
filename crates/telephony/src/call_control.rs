//! Outbound call control
//!
//! Hangups go through the provider's REST surface, keyed by call sid. A
//! failed hangup is logged by the caller and otherwise ignored: the session
//! ends when the provider closes the WebSocket anyway.

use async_trait::async_trait;

use switchboard_core::{CallControl, Error, Result};

/// Call control over the provider's HTTP API.
pub struct HttpCallControl {
    client: reqwest::Client,
    base_url: String,
}

impl HttpCallControl {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl CallControl for HttpCallControl {
    async fn end_call(&self, call_sid: &str) -> Result<()> {
        let url = format!("{}/calls/{}/end", self.base_url.trim_end_matches('/'), call_sid);
        self.client
            .post(&url)
            .send()
            .await
            .map_err(|e| Error::CallControl(e.to_string()))?
            .error_for_status()
            .map_err(|e| Error::CallControl(e.to_string()))?;

        tracing::info!(call_sid = %call_sid, "Hangup requested");
        Ok(())
    }
}

/// No-op call control for deployments without a hangup endpoint.
pub struct NullCallControl;

#[async_trait]
impl CallControl for NullCallControl {
    async fn end_call(&self, call_sid: &str) -> Result<()> {
        tracing::info!(call_sid = %call_sid, "Call control disabled, skipping hangup");
        Ok(())
    }
}
