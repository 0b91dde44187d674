//! Shared error type for engine backends

use thiserror::Error;

/// Errors surfaced by the pluggable engine backends.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Speech recognition error: {0}")]
    Recognition(String),

    #[error("Speech synthesis error: {0}")]
    Synthesis(String),

    #[error("End-of-turn classifier error: {0}")]
    EotClassifier(String),

    #[error("Agent runtime error: {0}")]
    AgentRuntime(String),

    #[error("Call control error: {0}")]
    CallControl(String),

    #[error("Audio processing error: {0}")]
    Audio(String),

    #[error("Operation timed out after {0} seconds")]
    Timeout(u64),
}

pub type Result<T> = std::result::Result<T, Error>;
