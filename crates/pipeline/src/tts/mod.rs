//! Text-to-speech adapter
//!
//! Sentence-level chunking for first-audio latency, plus a streaming
//! wrapper that queues text, re-chunks synthesized audio into fixed-length
//! chunks, and supports clear-queue for barge-in.

mod splitter;
mod streaming;

pub use splitter::{split_for_tts, split_sentences};
pub use streaming::{HttpSynthesizer, SilenceSynthesizer, StreamingTts, TtsEvent};
