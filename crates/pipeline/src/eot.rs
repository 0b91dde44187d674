//! End-of-turn prediction
//!
//! A small transformer classifier estimates the probability that the user
//! has finished their turn, from the normalized recent conversation plus the
//! candidate utterance. `TurnPredictor` keeps the rolling history and
//! selects the threshold; the classifier itself is pluggable, with an
//! ONNX-backed head behind the `onnx` feature and a null fallback that
//! leaves commitment to the silence/age fallbacks.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use switchboard_config::TurnSettings;
use switchboard_core::{normalize_for_eot, EotClassifier, Result, Turn};

/// Rolling conversation history plus classifier access.
pub struct TurnPredictor {
    classifier: Arc<dyn EotClassifier>,
    history: Mutex<Vec<Turn>>,
    max_messages: usize,
}

impl TurnPredictor {
    pub fn new(classifier: Arc<dyn EotClassifier>) -> Self {
        Self {
            classifier,
            history: Mutex::new(Vec::new()),
            max_messages: switchboard_config::constants::turn::MAX_HISTORY_EXCHANGES * 2,
        }
    }

    /// Record a committed user turn.
    pub fn add_user_turn(&self, text: &str) {
        self.push(Turn::user(text));
    }

    /// Record an agent utterance (reply, greeting, or follow-up).
    pub fn add_agent_turn(&self, text: &str) {
        self.push(Turn::agent(text));
    }

    fn push(&self, turn: Turn) {
        let mut history = self.history.lock();
        history.push(turn);
        let max = self.max_messages;
        if history.len() > max {
            let excess = history.len() - max;
            history.drain(..excess);
        }
    }

    /// Probability that `candidate` completes the user's turn.
    ///
    /// Classifier failure degrades to 0.0 so the silence and age fallbacks
    /// carry the conversation.
    pub async fn predict(&self, candidate: &str) -> f32 {
        let mut turns = self.history.lock().clone();
        turns.push(Turn::user(candidate));

        match self.classifier.predict(&turns).await {
            Ok(p) => p.clamp(0.0, 1.0),
            Err(e) => {
                tracing::warn!(error = %e, "EOT classifier failed, treating as 0.0");
                0.0
            },
        }
    }

    /// Threshold for a candidate of `word_count` words.
    pub fn threshold_for(settings: &TurnSettings, word_count: usize) -> f32 {
        if word_count <= settings.short_word_cap {
            settings.eot_threshold_short
        } else {
            settings.eot_threshold_normal
        }
    }

    pub fn clear(&self) {
        self.history.lock().clear();
    }

    #[cfg(test)]
    pub(crate) fn history_len(&self) -> usize {
        self.history.lock().len()
    }
}

/// Classifier that always reports 0.0.
///
/// Used when no model is configured; turn commitment then rests entirely on
/// the silence and buffer-age fallbacks.
pub struct NullEotClassifier;

#[async_trait]
impl EotClassifier for NullEotClassifier {
    async fn predict(&self, _turns: &[Turn]) -> Result<f32> {
        Ok(0.0)
    }
}

#[cfg(feature = "onnx")]
pub use onnx::OnnxEotClassifier;

#[cfg(feature = "onnx")]
mod onnx {
    use super::*;

    use std::path::Path;

    use ndarray::Array2;
    use ort::{GraphOptimizationLevel, Session};
    use switchboard_core::Error;
    use tokenizers::Tokenizer;

    /// Token id of the end-of-utterance marker `<|im_end|>`
    const EOU_TOKEN_ID: usize = 2;

    /// Context cap in tokens
    const MAX_HISTORY_TOKENS: usize = 512;

    /// Transformer end-of-turn classifier over ONNX Runtime.
    ///
    /// Renders the normalized conversation with the model's chat template,
    /// drops the trailing end-of-utterance marker, and reads the marker's
    /// softmax weight at the last position.
    pub struct OnnxEotClassifier {
        session: Mutex<Session>,
        tokenizer: Tokenizer,
    }

    impl OnnxEotClassifier {
        pub fn new(
            model_path: impl AsRef<Path>,
            tokenizer_path: impl AsRef<Path>,
        ) -> std::result::Result<Self, crate::PipelineError> {
            let session = Session::builder()
                .map_err(|e| crate::PipelineError::Model(e.to_string()))?
                .with_optimization_level(GraphOptimizationLevel::Level3)
                .map_err(|e| crate::PipelineError::Model(e.to_string()))?
                .with_intra_threads(1)
                .map_err(|e| crate::PipelineError::Model(e.to_string()))?
                .commit_from_file(model_path)
                .map_err(|e| crate::PipelineError::Model(e.to_string()))?;

            let tokenizer = Tokenizer::from_file(tokenizer_path)
                .map_err(|e| crate::PipelineError::Model(e.to_string()))?;

            Ok(Self {
                session: Mutex::new(session),
                tokenizer,
            })
        }

        /// Render turns with the chat template, without the final marker.
        fn render_context(turns: &[Turn]) -> String {
            let mut text = String::new();
            for turn in turns {
                text.push_str("<|im_start|>");
                text.push_str(turn.role.as_chat_role());
                text.push('\n');
                text.push_str(&normalize_for_eot(&turn.text));
                text.push_str("<|im_end|>");
            }
            // The model predicts whether the marker belongs here.
            if let Some(ix) = text.rfind("<|im_end|>") {
                text.truncate(ix);
            }
            text
        }

        fn softmax(logits: &[f32]) -> Vec<f32> {
            let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
            let exps: Vec<f32> = logits.iter().map(|&l| (l - max).exp()).collect();
            let sum: f32 = exps.iter().sum();
            exps.iter().map(|&e| e / sum).collect()
        }
    }

    #[async_trait]
    impl EotClassifier for OnnxEotClassifier {
        async fn predict(&self, turns: &[Turn]) -> Result<f32> {
            let text = Self::render_context(turns);

            let encoding = self
                .tokenizer
                .encode(text, false)
                .map_err(|e| Error::EotClassifier(e.to_string()))?;

            let mut ids: Vec<i64> = encoding.get_ids().iter().map(|&id| id as i64).collect();
            if ids.len() > MAX_HISTORY_TOKENS {
                ids.drain(..ids.len() - MAX_HISTORY_TOKENS);
            }
            if ids.is_empty() {
                return Ok(0.0);
            }

            let seq_len = ids.len();
            let input = Array2::from_shape_vec((1, seq_len), ids)
                .map_err(|e| Error::EotClassifier(e.to_string()))?;

            let session = self.session.lock();
            let outputs = session
                .run(ort::inputs!["input_ids" => input.view()].map_err(|e| {
                    Error::EotClassifier(e.to_string())
                })?)
                .map_err(|e| Error::EotClassifier(e.to_string()))?;

            let logits = outputs[0]
                .try_extract_tensor::<f32>()
                .map_err(|e| Error::EotClassifier(e.to_string()))?;

            // [batch, sequence, vocab] -> logits at the last position
            let shape = logits.shape();
            let vocab = shape[shape.len() - 1];
            let flat: Vec<f32> = logits.iter().copied().collect();
            let last = &flat[flat.len() - vocab..];

            let probs = Self::softmax(last);
            Ok(probs.get(EOU_TOKEN_ID).copied().unwrap_or(0.0))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedClassifier(f32);

    #[async_trait]
    impl EotClassifier for FixedClassifier {
        async fn predict(&self, _turns: &[Turn]) -> Result<f32> {
            Ok(self.0)
        }
    }

    struct FailingClassifier;

    #[async_trait]
    impl EotClassifier for FailingClassifier {
        async fn predict(&self, _turns: &[Turn]) -> Result<f32> {
            Err(switchboard_core::Error::EotClassifier("offline".to_string()))
        }
    }

    #[tokio::test]
    async fn test_history_caps_at_four_exchanges() {
        let predictor = TurnPredictor::new(Arc::new(FixedClassifier(0.5)));
        for i in 0..10 {
            predictor.add_user_turn(&format!("user {}", i));
            predictor.add_agent_turn(&format!("agent {}", i));
        }
        assert_eq!(predictor.history_len(), 8);
    }

    #[tokio::test]
    async fn test_failure_degrades_to_zero() {
        let predictor = TurnPredictor::new(Arc::new(FailingClassifier));
        assert_eq!(predictor.predict("hello").await, 0.0);
    }

    #[tokio::test]
    async fn test_null_classifier_reports_zero() {
        let predictor = TurnPredictor::new(Arc::new(NullEotClassifier));
        assert_eq!(predictor.predict("are we done").await, 0.0);
    }

    #[test]
    fn test_threshold_selection() {
        let settings = TurnSettings::default();
        // "yeah tomorrow works" = 3 words <= 4
        assert_eq!(TurnPredictor::threshold_for(&settings, 3), 0.15);
        assert_eq!(TurnPredictor::threshold_for(&settings, 4), 0.15);
        assert_eq!(TurnPredictor::threshold_for(&settings, 5), 0.30);
    }
}
