//! Streaming TTS wrapper
//!
//! Queues text chunks for a synthesizer worker, re-chunks the synthesized
//! audio into fixed-duration chunks for smooth pacing, and supports
//! clear-queue on barge-in. Clearing bumps a generation counter so output
//! from a synthesis that was already in flight is discarded instead of
//! reaching the playback queue.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use switchboard_core::{AudioFrame, Error, Result, SampleRate, SpeechSynthesizer};

use crate::output::AudioOutputQueue;

/// Events published by the TTS worker
#[derive(Debug, Clone)]
pub enum TtsEvent {
    /// One text chunk was fully synthesized and queued
    ChunkSynthesized { text: String },
    /// A synthesis result was discarded by a clear
    ChunkDiscarded { text: String },
    /// Synthesis failed for one chunk
    Error(String),
}

struct TtsQueue {
    pending: VecDeque<(u64, String)>,
    in_flight: bool,
    closed: bool,
}

struct Shared {
    queue: Mutex<TtsQueue>,
    generation: AtomicU64,
    sequence: AtomicU64,
    notify: Notify,
}

/// Handle to the per-session TTS worker.
pub struct StreamingTts {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl StreamingTts {
    /// Spawn the worker; synthesized chunks land in `output` as fixed
    /// `chunk_ms` frames at the synthesizer's native rate.
    pub fn spawn(
        synthesizer: Arc<dyn SpeechSynthesizer>,
        chunk_ms: u64,
        output: Arc<AudioOutputQueue>,
        event_tx: tokio::sync::broadcast::Sender<TtsEvent>,
    ) -> Arc<Self> {
        let shared = Arc::new(Shared {
            queue: Mutex::new(TtsQueue {
                pending: VecDeque::new(),
                in_flight: false,
                closed: false,
            }),
            generation: AtomicU64::new(0),
            sequence: AtomicU64::new(0),
            notify: Notify::new(),
        });

        let handle = tokio::spawn(run_worker(
            shared.clone(),
            synthesizer,
            chunk_ms,
            output,
            event_tx,
        ));

        Arc::new(Self {
            shared,
            worker: Mutex::new(Some(handle)),
        })
    }

    /// Queue one text chunk for synthesis.
    pub fn send(&self, text: &str) {
        let text = text.trim();
        if text.is_empty() {
            return;
        }
        let generation = self.shared.generation.load(Ordering::Acquire);
        {
            let mut queue = self.shared.queue.lock();
            if queue.closed {
                return;
            }
            queue.pending.push_back((generation, text.to_string()));
        }
        self.shared.notify.notify_one();
    }

    /// Drop all pending text; in-flight synthesis finishes but its output
    /// is discarded. Idempotent. Returns how many chunks were dropped.
    pub fn clear_queue(&self) -> usize {
        self.shared.generation.fetch_add(1, Ordering::AcqRel);
        let mut queue = self.shared.queue.lock();
        let dropped = queue.pending.len();
        queue.pending.clear();
        dropped
    }

    /// Nothing queued and nothing being synthesized.
    pub fn is_idle(&self) -> bool {
        let queue = self.shared.queue.lock();
        queue.pending.is_empty() && !queue.in_flight
    }

    /// Stop accepting text; the worker exits once the queue drains.
    pub fn close(&self) {
        self.shared.queue.lock().closed = true;
        self.shared.notify.notify_waiters();
    }
}

impl Drop for StreamingTts {
    fn drop(&mut self) {
        if let Some(handle) = self.worker.lock().take() {
            handle.abort();
        }
    }
}

async fn run_worker(
    shared: Arc<Shared>,
    synthesizer: Arc<dyn SpeechSynthesizer>,
    chunk_ms: u64,
    output: Arc<AudioOutputQueue>,
    event_tx: tokio::sync::broadcast::Sender<TtsEvent>,
) {
    let chunk_samples = synthesizer.sample_rate().as_u32() as usize * chunk_ms as usize / 1000;

    loop {
        let next = {
            let mut queue = shared.queue.lock();
            match queue.pending.pop_front() {
                Some(item) => {
                    queue.in_flight = true;
                    Some(item)
                },
                None if queue.closed => break,
                None => None,
            }
        };

        let (generation, text) = match next {
            Some(item) => item,
            None => {
                shared.notify.notified().await;
                continue;
            },
        };

        match synthesizer.synthesize(&text).await {
            Ok(samples) => {
                // A clear while we were synthesizing supersedes this output;
                // it must never reach the playback queue.
                if shared.generation.load(Ordering::Acquire) == generation {
                    let frame = AudioFrame::new(
                        samples,
                        synthesizer.sample_rate(),
                        shared.sequence.fetch_add(1, Ordering::Relaxed),
                    );
                    for chunk in frame.split(chunk_samples) {
                        output.push(chunk);
                    }
                    let _ = event_tx.send(TtsEvent::ChunkSynthesized { text });
                } else {
                    tracing::debug!(text = %text, "Discarding superseded synthesis output");
                    let _ = event_tx.send(TtsEvent::ChunkDiscarded { text });
                }
            },
            Err(e) => {
                tracing::warn!(error = %e, text = %text, "Synthesis failed, dropping chunk");
                let _ = event_tx.send(TtsEvent::Error(e.to_string()));
            },
        }

        shared.queue.lock().in_flight = false;
    }
}

/// Synthesizer that produces silence sized to the text's spoken duration.
///
/// Stands in for a real engine in development and tests; downstream timing
/// behaves as if a voice were speaking.
pub struct SilenceSynthesizer {
    sample_rate: SampleRate,
}

impl SilenceSynthesizer {
    pub fn new() -> Self {
        Self {
            sample_rate: SampleRate::Hz24000,
        }
    }
}

impl Default for SilenceSynthesizer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SpeechSynthesizer for SilenceSynthesizer {
    async fn synthesize(&self, text: &str) -> Result<Vec<i16>> {
        let words = text.split_whitespace().count().max(1);
        let seconds = words as f64 / switchboard_config::constants::agent::WORDS_PER_SECOND;
        let samples = (seconds * self.sample_rate.as_u32() as f64) as usize;
        Ok(vec![0i16; samples])
    }

    fn sample_rate(&self) -> SampleRate {
        self.sample_rate
    }

    fn name(&self) -> &str {
        "silence"
    }
}

#[derive(Serialize)]
struct SynthesizeRequest<'a> {
    text: &'a str,
}

#[derive(Deserialize)]
struct SynthesizeResponse {
    audio: String,
}

/// Synthesizer backed by an HTTP synthesis service returning PCM16.
pub struct HttpSynthesizer {
    client: reqwest::Client,
    endpoint: String,
    sample_rate: SampleRate,
}

impl HttpSynthesizer {
    pub fn new(endpoint: impl Into<String>, sample_rate: SampleRate) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            sample_rate,
        }
    }
}

#[async_trait]
impl SpeechSynthesizer for HttpSynthesizer {
    async fn synthesize(&self, text: &str) -> Result<Vec<i16>> {
        use base64::engine::general_purpose::STANDARD as BASE64;
        use base64::Engine as _;

        let response = self
            .client
            .post(&self.endpoint)
            .json(&SynthesizeRequest { text })
            .send()
            .await
            .map_err(|e| Error::Synthesis(e.to_string()))?
            .error_for_status()
            .map_err(|e| Error::Synthesis(e.to_string()))?;

        let body: SynthesizeResponse = response
            .json()
            .await
            .map_err(|e| Error::Synthesis(e.to_string()))?;

        let pcm_bytes = BASE64
            .decode(body.audio.as_bytes())
            .map_err(|e| Error::Synthesis(e.to_string()))?;

        Ok(pcm_bytes
            .chunks_exact(2)
            .map(|chunk| i16::from_le_bytes([chunk[0], chunk[1]]))
            .collect())
    }

    fn sample_rate(&self) -> SampleRate {
        self.sample_rate
    }

    fn name(&self) -> &str {
        "http-synthesizer"
    }
}
