//! Speech-to-text adapter
//!
//! The recognizer is an utterance-level black box; this module supplies the
//! streaming glue: silence-based segmentation of the inbound 16kHz frames,
//! minimum-duration gating, timeout-bounded recognition, and suppression of
//! silence-marker transcripts.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use switchboard_config::SttSettings;
use switchboard_core::{AudioFrame, Error, Result, SampleRate, SpeechRecognizer};

/// Transcripts that mean the recognizer heard nothing
const SILENCE_MARKERS: &[&str] = &[
    "[blank_audio]",
    "[blank audio]",
    "[silence]",
    "[ silence ]",
    "[pause]",
    "[ pause ]",
    "...",
    "(silence)",
    "(no speech)",
    "[inaudible]",
];

/// True when a final consists only of a silence marker.
pub fn is_silence_marker(transcript: &str) -> bool {
    let lower = transcript.trim().to_lowercase();
    SILENCE_MARKERS.iter().any(|m| lower.contains(m))
}

/// Buffers inbound frames and cuts utterances on silence.
///
/// Silence is measured in audio time (summed frame durations), so the
/// segmentation is deterministic for a given frame sequence.
pub struct UtteranceSegmenter {
    settings: SttSettings,
    buffer: Vec<i16>,
    has_speech: bool,
    silence_ms: f64,
}

impl UtteranceSegmenter {
    pub fn new(settings: SttSettings) -> Self {
        Self {
            settings,
            buffer: Vec::new(),
            has_speech: false,
            silence_ms: 0.0,
        }
    }

    /// Feed one 16kHz frame; returns a cut utterance when silence after
    /// speech exceeds the configured duration.
    pub fn push_frame(&mut self, frame: &AudioFrame) -> Option<Vec<i16>> {
        self.buffer.extend_from_slice(&frame.samples);

        if frame.rms < self.settings.silence_threshold_rms {
            if self.has_speech {
                self.silence_ms += frame.duration.as_secs_f64() * 1000.0;
                if self.silence_ms >= self.settings.silence_duration_s * 1000.0 {
                    return self.cut();
                }
            }
        } else {
            self.has_speech = true;
            self.silence_ms = 0.0;
        }

        None
    }

    /// Flush any buffered speech at end of stream.
    pub fn flush(&mut self) -> Option<Vec<i16>> {
        if self.has_speech {
            self.cut()
        } else {
            self.buffer.clear();
            None
        }
    }

    /// Discard the current buffer without emitting.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.has_speech = false;
        self.silence_ms = 0.0;
    }

    fn cut(&mut self) -> Option<Vec<i16>> {
        let utterance = std::mem::take(&mut self.buffer);
        self.has_speech = false;
        self.silence_ms = 0.0;

        let min_samples =
            (self.settings.min_audio_s * SampleRate::Hz16000.as_u32() as f64) as usize;
        if utterance.len() < min_samples {
            tracing::debug!(samples = utterance.len(), "Dropping sub-minimum utterance");
            return None;
        }

        Some(utterance)
    }
}

/// Runs cut utterances through the recognizer, in order, and emits finals.
///
/// One worker per session keeps transcript order aligned with arrival
/// order. Recognition errors and timeouts drop the utterance; the
/// conversation continues on the next one.
pub struct SttWorker {
    recognizer: Arc<dyn SpeechRecognizer>,
    timeout: Duration,
    utterance_rx: mpsc::Receiver<Vec<i16>>,
    transcript_tx: mpsc::Sender<String>,
}

impl SttWorker {
    pub fn new(
        recognizer: Arc<dyn SpeechRecognizer>,
        settings: &SttSettings,
        utterance_rx: mpsc::Receiver<Vec<i16>>,
        transcript_tx: mpsc::Sender<String>,
    ) -> Self {
        Self {
            recognizer,
            timeout: Duration::from_secs(settings.recognizer_timeout_s),
            utterance_rx,
            transcript_tx,
        }
    }

    pub async fn run(mut self) {
        while let Some(utterance) = self.utterance_rx.recv().await {
            let started = std::time::Instant::now();
            let result = tokio::time::timeout(
                self.timeout,
                self.recognizer.transcribe(&utterance, SampleRate::Hz16000),
            )
            .await;

            let transcript = match result {
                Ok(Ok(text)) => text,
                Ok(Err(e)) => {
                    tracing::warn!(error = %e, "Recognition failed, dropping utterance");
                    continue;
                },
                Err(_) => {
                    tracing::warn!(
                        timeout_s = self.timeout.as_secs(),
                        "Recognition timed out, dropping utterance"
                    );
                    continue;
                },
            };

            let transcript = transcript.trim().to_string();
            if transcript.is_empty() || is_silence_marker(&transcript) {
                continue;
            }

            tracing::debug!(
                latency_ms = started.elapsed().as_millis() as u64,
                text = %transcript,
                "Final transcript"
            );

            if self.transcript_tx.send(transcript).await.is_err() {
                break;
            }
        }
    }
}

#[derive(Serialize)]
struct TranscribeRequest<'a> {
    audio: &'a str,
    sample_rate: u32,
}

#[derive(Deserialize)]
struct TranscribeResponse {
    transcript: String,
}

/// Recognizer backed by an HTTP transcription service.
pub struct HttpRecognizer {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpRecognizer {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl SpeechRecognizer for HttpRecognizer {
    async fn transcribe(&self, samples: &[i16], sample_rate: SampleRate) -> Result<String> {
        use base64::engine::general_purpose::STANDARD as BASE64;
        use base64::Engine as _;

        let pcm_bytes: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        let request = TranscribeRequest {
            audio: &BASE64.encode(&pcm_bytes),
            sample_rate: sample_rate.as_u32(),
        };

        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Recognition(e.to_string()))?
            .error_for_status()
            .map_err(|e| Error::Recognition(e.to_string()))?;

        let body: TranscribeResponse = response
            .json()
            .await
            .map_err(|e| Error::Recognition(e.to_string()))?;

        Ok(body.transcript)
    }

    fn name(&self) -> &str {
        "http-recognizer"
    }
}
