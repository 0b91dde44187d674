//! Engine traits for pluggable backends
//!
//! The per-call pipeline only depends on these interfaces; concrete STT,
//! TTS, classifier, and agent-runtime implementations are constructed once
//! at startup and handed to each session as read-only services.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::audio::SampleRate;
use crate::conversation::Turn;
use crate::error::Result;

/// Speech-to-text engine
///
/// Receives a complete buffered utterance (PCM16 at 16 kHz) and returns the
/// transcript. Segmentation, minimum-duration gating, and timeouts are the
/// caller's concern.
#[async_trait]
pub trait SpeechRecognizer: Send + Sync + 'static {
    /// Transcribe one utterance; an empty string means nothing was heard.
    async fn transcribe(&self, samples: &[i16], sample_rate: SampleRate) -> Result<String>;

    /// Engine name for logging
    fn name(&self) -> &str;
}

/// Text-to-speech engine
///
/// Synthesizes one text chunk to PCM16 at the engine's native rate. The
/// streaming wrapper in the pipeline crate handles queueing, re-chunking,
/// and clear-queue semantics.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync + 'static {
    /// Synthesize a chunk of text to PCM16 samples.
    async fn synthesize(&self, text: &str) -> Result<Vec<i16>>;

    /// Native output sample rate
    fn sample_rate(&self) -> SampleRate;

    /// Engine name for logging
    fn name(&self) -> &str;
}

/// End-of-turn classifier
///
/// Estimates the probability that the user has finished speaking, given the
/// recent conversation plus the candidate (still uncommitted) utterance as
/// the final user turn.
#[async_trait]
pub trait EotClassifier: Send + Sync + 'static {
    async fn predict(&self, turns: &[Turn]) -> Result<f32>;
}

/// A tool call observed in an agent run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,
    #[serde(default)]
    pub args: serde_json::Map<String, Value>,
}

/// Message content: either a plain string or a list of typed blocks
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentBlock {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub text: String,
}

impl MessageContent {
    /// Extract plain text, taking the first text block if block-structured.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            MessageContent::Text(s) if !s.trim().is_empty() => Some(s),
            MessageContent::Text(_) => None,
            MessageContent::Blocks(blocks) => blocks
                .iter()
                .find(|b| b.kind == "text" && !b.text.trim().is_empty())
                .map(|b| b.text.as_str()),
        }
    }
}

/// One message from a completed agent run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentMessage {
    /// Message type: "ai", "human", or "tool"
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub content: Option<MessageContent>,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
}

/// External agent runtime
///
/// The runtime keeps conversation memory keyed by thread id; the core only
/// consumes the returned message list.
#[async_trait]
pub trait AgentRuntime: Send + Sync + 'static {
    /// Create a new conversation thread; `metadata` is opaque to the core.
    async fn create_thread(&self, metadata: serde_json::Map<String, Value>) -> Result<String>;

    /// Run the agent on one user message and wait for completion.
    async fn run(
        &self,
        thread_id: &str,
        agent_id: &str,
        user_text: &str,
        configurable: serde_json::Map<String, Value>,
    ) -> Result<Vec<AgentMessage>>;
}

/// Outbound call-control surface (hangup)
#[async_trait]
pub trait CallControl: Send + Sync + 'static {
    /// End the call identified by the provider call sid.
    async fn end_call(&self, call_sid: &str) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_content_text() {
        let content = MessageContent::Text("hello".to_string());
        assert_eq!(content.as_text(), Some("hello"));

        let empty = MessageContent::Text("   ".to_string());
        assert_eq!(empty.as_text(), None);
    }

    #[test]
    fn test_message_content_blocks() {
        let content = MessageContent::Blocks(vec![
            ContentBlock {
                kind: "tool_use".to_string(),
                text: String::new(),
            },
            ContentBlock {
                kind: "text".to_string(),
                text: "See you tomorrow.".to_string(),
            },
        ]);
        assert_eq!(content.as_text(), Some("See you tomorrow."));
    }

    #[test]
    fn test_agent_message_deserializes_string_content() {
        let msg: AgentMessage = serde_json::from_str(
            r#"{"type": "ai", "content": "Sounds good!", "tool_calls": []}"#,
        )
        .unwrap();
        assert_eq!(msg.kind, "ai");
        assert_eq!(msg.content.unwrap().as_text(), Some("Sounds good!"));
    }

    #[test]
    fn test_agent_message_deserializes_block_content() {
        let msg: AgentMessage = serde_json::from_str(
            r#"{"type": "ai", "content": [{"type": "text", "text": "Booked."}],
                "tool_calls": [{"name": "end_call", "args": {"outcome": "meeting_booked"}}]}"#,
        )
        .unwrap();
        assert_eq!(msg.content.unwrap().as_text(), Some("Booked."));
        assert_eq!(msg.tool_calls[0].name, "end_call");
        assert_eq!(msg.tool_calls[0].args["outcome"], "meeting_booked");
    }
}
