//! Per-call voice pipeline
//!
//! Joins the media-facing subsystems of one telephone call: barge-in VAD,
//! utterance segmentation in front of the recognizer, end-of-turn
//! prediction, turn commitment with silence/age fallbacks, sentence-chunked
//! streaming synthesis, and the interrupt coordinator that ties them
//! together. The `CallPipeline` orchestrator owns the per-call tasks.

pub mod eot;
pub mod interrupt;
pub mod orchestrator;
pub mod output;
pub mod stt;
pub mod tts;
pub mod turn;
pub mod vad;

pub use eot::{NullEotClassifier, TurnPredictor};
pub use interrupt::{ControlSignal, InterruptCoordinator};
pub use orchestrator::{CallPipeline, PipelineEngines, PipelineEvent, TurnHandler};
pub use output::AudioOutputQueue;
pub use stt::{HttpRecognizer, UtteranceSegmenter};
pub use tts::{split_for_tts, split_sentences, HttpSynthesizer, SilenceSynthesizer, StreamingTts, TtsEvent};
pub use turn::{CommitReason, TurnController, TurnEvent, NO_INPUT_FOLLOWUP};
pub use vad::{AudioLevelWindow, BargeInDetector, VadState};

use thiserror::Error;

/// Pipeline errors
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Engine error: {0}")]
    Engine(#[from] switchboard_core::Error),

    #[error("Channel closed: {0}")]
    ChannelClosed(&'static str),

    #[error("Model error: {0}")]
    Model(String),
}
