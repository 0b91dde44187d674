//! Core traits and types for the switchboard voice agent
//!
//! This crate provides foundational types used across all other crates:
//! - Audio frame types, G.711 mu-law codec, and stateful resamplers
//! - Conversation turn types and end-of-turn text normalization
//! - Per-call context and metadata
//! - Engine traits for pluggable backends (STT, TTS, EOT, agent runtime)
//! - Error types

pub mod audio;
pub mod context;
pub mod conversation;
pub mod error;
pub mod mulaw;
pub mod resample;
pub mod traits;

pub use audio::{AudioFrame, SampleRate};
pub use context::{AgentMode, CallContext, CallMetadata, CallOutcome};
pub use conversation::{normalize_for_eot, Turn, TurnRole};
pub use error::{Error, Result};
pub use resample::{Downsampler, Upsampler2x};
pub use traits::{
    AgentMessage, AgentRuntime, CallControl, EotClassifier, MessageContent, SpeechRecognizer,
    SpeechSynthesizer, ToolCall,
};
