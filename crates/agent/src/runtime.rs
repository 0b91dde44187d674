//! HTTP client for the external agent runtime
//!
//! The runtime keeps conversation memory per thread and executes the
//! tool-using agent; this client only creates threads and waits on runs.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use switchboard_core::{AgentMessage, AgentRuntime, Error, Result};

#[derive(Serialize)]
struct CreateThreadRequest {
    metadata: serde_json::Map<String, Value>,
}

#[derive(Deserialize)]
struct CreateThreadResponse {
    thread_id: String,
}

#[derive(Serialize)]
struct RunRequest<'a> {
    assistant_id: &'a str,
    input: RunInput<'a>,
    #[serde(skip_serializing_if = "Option::is_none")]
    config: Option<RunConfig>,
}

#[derive(Serialize)]
struct RunInput<'a> {
    messages: Vec<RunMessage<'a>>,
}

#[derive(Serialize)]
struct RunMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct RunConfig {
    configurable: serde_json::Map<String, Value>,
}

#[derive(Deserialize)]
struct RunResponse {
    #[serde(default)]
    messages: Vec<AgentMessage>,
}

/// Agent runtime over its REST surface.
pub struct HttpAgentRuntime {
    client: reqwest::Client,
    base_url: String,
}

impl HttpAgentRuntime {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl AgentRuntime for HttpAgentRuntime {
    async fn create_thread(&self, metadata: serde_json::Map<String, Value>) -> Result<String> {
        let response = self
            .client
            .post(format!("{}/threads", self.base_url))
            .json(&CreateThreadRequest { metadata })
            .send()
            .await
            .map_err(|e| Error::AgentRuntime(e.to_string()))?
            .error_for_status()
            .map_err(|e| Error::AgentRuntime(e.to_string()))?;

        let body: CreateThreadResponse = response
            .json()
            .await
            .map_err(|e| Error::AgentRuntime(e.to_string()))?;

        tracing::info!(thread_id = %body.thread_id, "Created runtime thread");
        Ok(body.thread_id)
    }

    async fn run(
        &self,
        thread_id: &str,
        agent_id: &str,
        user_text: &str,
        configurable: serde_json::Map<String, Value>,
    ) -> Result<Vec<AgentMessage>> {
        let request = RunRequest {
            assistant_id: agent_id,
            input: RunInput {
                messages: vec![RunMessage {
                    role: "human",
                    content: user_text,
                }],
            },
            config: if configurable.is_empty() {
                None
            } else {
                Some(RunConfig { configurable })
            },
        };

        let response = self
            .client
            .post(format!("{}/threads/{}/runs/wait", self.base_url, thread_id))
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::AgentRuntime(e.to_string()))?
            .error_for_status()
            .map_err(|e| Error::AgentRuntime(e.to_string()))?;

        let body: RunResponse = response
            .json()
            .await
            .map_err(|e| Error::AgentRuntime(e.to_string()))?;

        Ok(body.messages)
    }
}
