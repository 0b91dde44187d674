//! Call pipeline orchestrator
//!
//! Owns the per-call tasks and channels: frame intake (VAD + utterance
//! segmentation), the STT worker, the turn task with its 300ms ticker, the
//! serialized agent worker, and the TTS worker. The media transport feeds
//! inbound frames in and drains the outbound audio queue and control
//! channel on the other side.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use switchboard_config::Settings;
use switchboard_core::{AudioFrame, EotClassifier, SpeechRecognizer, SpeechSynthesizer};

use crate::eot::TurnPredictor;
use crate::interrupt::{ControlSignal, InterruptCoordinator};
use crate::output::AudioOutputQueue;
use crate::stt::{SttWorker, UtteranceSegmenter};
use crate::tts::{split_for_tts, StreamingTts, TtsEvent};
use crate::turn::{CommitReason, TurnController, TurnEvent, NO_INPUT_FOLLOWUP};
use crate::vad::BargeInDetector;

/// Handles a committed user turn and returns the agent's reply text.
///
/// Implementations own thread binding, timeouts, tool-effect extraction,
/// and hangup scheduling; `None` means nothing should be spoken.
#[async_trait]
pub trait TurnHandler: Send + Sync + 'static {
    async fn handle_turn(&self, text: &str) -> Option<String>;
}

/// Process-wide engine services injected into each session.
#[derive(Clone)]
pub struct PipelineEngines {
    pub recognizer: Arc<dyn SpeechRecognizer>,
    pub synthesizer: Arc<dyn SpeechSynthesizer>,
    pub eot: Arc<dyn EotClassifier>,
}

/// Pipeline events, broadcast for the transport layer, logging, and tests.
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    /// A finalized transcript fragment arrived from STT
    FinalTranscript(String),
    /// A full user turn was delivered to the agent
    TurnCommitted { text: String, reason: CommitReason },
    /// The agent's reply was queued for playback
    AgentReply(String),
    /// The greeting was queued for playback
    Greeting(String),
    /// The no-input follow-up was queued for playback
    Followup(String),
    /// Barge-in: playback was cleared
    Interrupted {
        dropped_text: usize,
        dropped_audio: usize,
    },
    /// Agent playback fully drained
    PlaybackDrained,
}

/// Per-call voice pipeline
pub struct CallPipeline {
    detector: BargeInDetector,
    segmenter: Mutex<UtteranceSegmenter>,
    predictor: Arc<TurnPredictor>,
    controller: Arc<TurnController>,
    coordinator: Arc<InterruptCoordinator>,
    tts: Arc<StreamingTts>,
    output: Arc<AudioOutputQueue>,
    speaking: Arc<AtomicBool>,
    interrupt_pending: Arc<AtomicBool>,
    cooldown_until: Mutex<Option<Instant>>,
    cooldown: Duration,
    min_sentence_chars: usize,
    max_sentence_chars: usize,
    utterance_tx: mpsc::Sender<Vec<i16>>,
    event_tx: broadcast::Sender<PipelineEvent>,
    control_rx: Mutex<Option<mpsc::UnboundedReceiver<ControlSignal>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl CallPipeline {
    /// Build and start the per-call tasks. For outbound calls, follow up
    /// with `send_greeting` once event subscribers are attached.
    pub fn start(
        engines: PipelineEngines,
        handler: Arc<dyn TurnHandler>,
        settings: &Settings,
    ) -> Arc<Self> {
        let (event_tx, _) = broadcast::channel(256);
        let (tts_event_tx, _) = broadcast::channel::<TtsEvent>(256);
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (utterance_tx, utterance_rx) = mpsc::channel(16);
        let (transcript_tx, transcript_rx) = mpsc::channel(32);
        let (turn_tx, turn_rx) = mpsc::channel::<String>(8);

        let output = AudioOutputQueue::new();
        let speaking = Arc::new(AtomicBool::new(false));
        let interrupt_pending = Arc::new(AtomicBool::new(false));
        let controller = Arc::new(TurnController::new(settings.turn.clone()));
        let predictor = Arc::new(TurnPredictor::new(engines.eot.clone()));

        let tts = StreamingTts::spawn(
            engines.synthesizer.clone(),
            settings.tts.chunk_ms,
            output.clone(),
            tts_event_tx,
        );

        let coordinator = Arc::new(InterruptCoordinator::new(
            tts.clone(),
            output.clone(),
            control_tx,
            speaking.clone(),
            interrupt_pending.clone(),
            controller.clone(),
        ));

        let pipeline = Arc::new(Self {
            detector: BargeInDetector::new(&settings.vad),
            segmenter: Mutex::new(UtteranceSegmenter::new(settings.stt.clone())),
            predictor: predictor.clone(),
            controller: controller.clone(),
            coordinator: coordinator.clone(),
            tts: tts.clone(),
            output,
            speaking: speaking.clone(),
            interrupt_pending: interrupt_pending.clone(),
            cooldown_until: Mutex::new(None),
            cooldown: Duration::from_secs_f64(settings.vad.greeting_echo_cooldown_s),
            min_sentence_chars: settings.tts.min_sentence_chars,
            max_sentence_chars: settings.tts.max_sentence_chars,
            utterance_tx,
            event_tx: event_tx.clone(),
            control_rx: Mutex::new(Some(control_rx)),
            tasks: Mutex::new(Vec::new()),
        });

        // STT worker: cut utterances -> final transcripts, in order.
        let stt_worker = SttWorker::new(
            engines.recognizer.clone(),
            &settings.stt,
            utterance_rx,
            transcript_tx,
        );
        let stt_handle = tokio::spawn(stt_worker.run());

        // Turn task: fragments + ticker -> committed turns.
        let turn_task = TurnTask {
            pipeline: pipeline.clone(),
            transcript_rx,
            turn_tx,
        };
        let turn_handle = tokio::spawn(turn_task.run());

        // Agent worker: one committed turn at a time.
        let agent_task = AgentTask {
            pipeline: pipeline.clone(),
            handler,
            turn_rx,
        };
        let agent_handle = tokio::spawn(agent_task.run());

        {
            let mut tasks = pipeline.tasks.lock();
            tasks.push(stt_handle);
            tasks.push(turn_handle);
            tasks.push(agent_handle);
        }

        pipeline
    }

    /// Feed one inbound 16kHz frame (already decoded and upsampled).
    pub async fn process_frame(&self, frame: AudioFrame) {
        let speaking = self.speaking.load(Ordering::Acquire);
        let in_cooldown = self.in_cooldown(Instant::now());

        if self
            .detector
            .process_frame(frame.rms, frame.duration_ms(), speaking, in_cooldown)
        {
            let (dropped_text, dropped_audio) = self.coordinator.fire();
            let _ = self.event_tx.send(PipelineEvent::Interrupted {
                dropped_text,
                dropped_audio,
            });
        }

        let utterance = self.segmenter.lock().push_frame(&frame);
        if let Some(utterance) = utterance {
            if self.utterance_tx.send(utterance).await.is_err() {
                tracing::debug!("STT worker gone, dropping utterance");
            }
        }
    }

    /// End of inbound audio: flush any buffered speech to the recognizer.
    pub async fn end_of_input(&self) {
        let flushed = self.segmenter.lock().flush();
        if let Some(utterance) = flushed {
            let _ = self.utterance_tx.send(utterance).await;
        }
    }

    /// Subscribe to pipeline events.
    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.event_tx.subscribe()
    }

    /// The queue the media sender drains.
    pub fn output_queue(&self) -> Arc<AudioOutputQueue> {
        self.output.clone()
    }

    /// Take the control-signal receiver (once) for the media sender.
    pub fn take_control_rx(&self) -> Option<mpsc::UnboundedReceiver<ControlSignal>> {
        self.control_rx.lock().take()
    }

    pub fn is_speaking(&self) -> bool {
        self.speaking.load(Ordering::Acquire)
    }

    /// Stop all per-call tasks and close the queues.
    pub fn shutdown(&self) {
        self.tts.close();
        self.output.close();
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
    }

    fn in_cooldown(&self, now: Instant) -> bool {
        self.cooldown_until
            .lock()
            .map_or(false, |until| now < until)
    }

    /// Dispatch the opening utterance before any user input arrives.
    pub fn send_greeting(&self, text: &str) {
        self.predictor.add_agent_turn(text);
        self.controller.on_agent_turn();
        // Cooldown stamps before any audio is queued so the echo of the
        // greeting's first syllables is already suppressed.
        *self.cooldown_until.lock() = Some(Instant::now() + self.cooldown);
        self.speak(text);
        let _ = self.event_tx.send(PipelineEvent::Greeting(text.to_string()));
        tracing::info!(cooldown_s = self.cooldown.as_secs_f64(), "Greeting dispatched");
    }

    /// Split and queue an agent utterance, marking the session speaking.
    fn speak(&self, text: &str) {
        let chunks = split_for_tts(text, self.min_sentence_chars, self.max_sentence_chars);
        for (i, chunk) in chunks.iter().enumerate() {
            self.tts.send(chunk);
            if i == 0 {
                // Flag raised only after the first chunk is queued so the
                // drain check cannot race playback to false.
                self.speaking.store(true, Ordering::Release);
            }
        }
    }
}

impl Drop for CallPipeline {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Turn task: consumes transcript fragments, runs EOT, applies fallbacks
/// and the watchdog on a ticker.
struct TurnTask {
    pipeline: Arc<CallPipeline>,
    transcript_rx: mpsc::Receiver<String>,
    turn_tx: mpsc::Sender<String>,
}

impl TurnTask {
    async fn run(mut self) {
        let mut ticker = tokio::time::interval(self.pipeline.controller.tick_interval());
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                fragment = self.transcript_rx.recv() => {
                    match fragment {
                        Some(text) => self.on_fragment(text).await,
                        None => break,
                    }
                }
                _ = ticker.tick() => {
                    self.on_tick().await;
                }
            }
        }
    }

    async fn on_fragment(&self, text: String) {
        let p = &self.pipeline;
        let now = Instant::now();

        if p.in_cooldown(now) {
            tracing::debug!(text = %text, "Ignoring echo during greeting cooldown");
            return;
        }

        let _ = p.event_tx.send(PipelineEvent::FinalTranscript(text.clone()));

        // Barge-in integration: an interrupt (fired here or earlier by VAD)
        // means this fragment replaces whatever was buffered before it.
        let replace = if p.speaking.load(Ordering::Acquire) {
            let (dropped_text, dropped_audio) = p.coordinator.fire();
            let _ = p.event_tx.send(PipelineEvent::Interrupted {
                dropped_text,
                dropped_audio,
            });
            p.interrupt_pending.store(false, Ordering::Release);
            true
        } else {
            p.interrupt_pending.swap(false, Ordering::AcqRel)
        };

        p.controller.push_fragment(&text, replace, now);

        let combined = p.controller.buffered_text();
        let word_count = p.controller.buffered_word_count();
        let probability = p.predictor.predict(&combined).await;
        let threshold = TurnPredictor::threshold_for(p.controller.settings(), word_count);

        tracing::debug!(
            probability = probability,
            threshold = threshold,
            words = word_count,
            "EOT check"
        );

        if probability >= threshold {
            self.commit(CommitReason::Confidence).await;
        }
    }

    async fn on_tick(&self) {
        let p = &self.pipeline;
        let now = Instant::now();

        // Playback drain: speaking clears once synthesis and the outbound
        // queue are both empty.
        if p.speaking.load(Ordering::Acquire) && p.tts.is_idle() && p.output.is_empty() {
            p.speaking.store(false, Ordering::Release);
            let _ = p.event_tx.send(PipelineEvent::PlaybackDrained);
        }

        if let Some(reason) = p.controller.check_fallbacks(now) {
            self.commit(reason).await;
        }

        let speaking = p.speaking.load(Ordering::Acquire);
        if let Some(TurnEvent::Followup) = p.controller.check_watchdog(now, speaking) {
            p.predictor.add_agent_turn(NO_INPUT_FOLLOWUP);
            p.controller.on_followup_sent();
            p.speak(NO_INPUT_FOLLOWUP);
            let _ = p
                .event_tx
                .send(PipelineEvent::Followup(NO_INPUT_FOLLOWUP.to_string()));
            tracing::info!("No-input follow-up dispatched");
        }
    }

    async fn commit(&self, reason: CommitReason) {
        let p = &self.pipeline;
        if let Some(TurnEvent::Commit { text, reason }) = p.controller.take_commit(reason) {
            p.predictor.add_user_turn(&text);
            let _ = p.event_tx.send(PipelineEvent::TurnCommitted {
                text: text.clone(),
                reason,
            });
            if self.turn_tx.send(text).await.is_err() {
                tracing::debug!("Agent worker gone, dropping committed turn");
            }
        }
    }
}

/// Agent worker: invokes the turn handler for one committed turn at a time.
struct AgentTask {
    pipeline: Arc<CallPipeline>,
    handler: Arc<dyn TurnHandler>,
    turn_rx: mpsc::Receiver<String>,
}

impl AgentTask {
    async fn run(mut self) {
        while let Some(text) = self.turn_rx.recv().await {
            let started = Instant::now();
            let reply = self.handler.handle_turn(&text).await;
            tracing::debug!(
                latency_ms = started.elapsed().as_millis() as u64,
                "Agent turn handled"
            );

            if let Some(reply) = reply {
                let p = &self.pipeline;
                p.predictor.add_agent_turn(&reply);
                p.controller.on_agent_turn();
                p.speak(&reply);
                let _ = p.event_tx.send(PipelineEvent::AgentReply(reply));
            }
        }
    }
}
