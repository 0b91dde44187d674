//! Call-flow scenarios for the per-call pipeline, driven with scripted
//! engines and shortened timing windows.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::broadcast::error::TryRecvError;

use switchboard_config::Settings;
use switchboard_core::{EotClassifier, Result, SampleRate, SpeechRecognizer, Turn};
use switchboard_pipeline::{
    AudioOutputQueue, CallPipeline, CommitReason, ControlSignal, PipelineEngines, PipelineEvent,
    SilenceSynthesizer, TurnHandler,
};

/// Settings with windows shrunk for fast tests.
fn test_settings() -> Settings {
    let mut s = Settings::default();
    s.turn.tick_ms = 25;
    s.turn.silence_fallback_s = 0.2;
    s.turn.max_buffer_age_s = 0.5;
    s.turn.no_input_timeout_s = 0.3;
    s.vad.greeting_echo_cooldown_s = 0.25;
    s.stt.silence_duration_s = 0.06;
    s.stt.min_audio_s = 0.02;
    s
}

struct ScriptedRecognizer {
    transcripts: Mutex<Vec<String>>,
}

impl ScriptedRecognizer {
    fn new(transcripts: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            transcripts: Mutex::new(transcripts.iter().map(|s| s.to_string()).collect()),
        })
    }
}

#[async_trait]
impl SpeechRecognizer for ScriptedRecognizer {
    async fn transcribe(&self, _samples: &[i16], _rate: SampleRate) -> Result<String> {
        let mut transcripts = self.transcripts.lock();
        if transcripts.is_empty() {
            Ok(String::new())
        } else {
            Ok(transcripts.remove(0))
        }
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

struct FixedEot(f32);

#[async_trait]
impl EotClassifier for FixedEot {
    async fn predict(&self, _turns: &[Turn]) -> Result<f32> {
        Ok(self.0)
    }
}

struct RecordingHandler {
    turns: Mutex<Vec<String>>,
    reply: String,
}

impl RecordingHandler {
    fn new(reply: &str) -> Arc<Self> {
        Arc::new(Self {
            turns: Mutex::new(Vec::new()),
            reply: reply.to_string(),
        })
    }

    fn turns(&self) -> Vec<String> {
        self.turns.lock().clone()
    }
}

#[async_trait]
impl TurnHandler for RecordingHandler {
    async fn handle_turn(&self, text: &str) -> Option<String> {
        self.turns.lock().push(text.to_string());
        Some(self.reply.clone())
    }
}

fn engines(recognizer: Arc<dyn SpeechRecognizer>, eot: f32) -> PipelineEngines {
    PipelineEngines {
        recognizer,
        synthesizer: Arc::new(SilenceSynthesizer::new()),
        eot: Arc::new(FixedEot(eot)),
    }
}

fn speech_frame() -> switchboard_core::AudioFrame {
    switchboard_core::AudioFrame::new(vec![3000i16; 320], SampleRate::Hz16000, 0)
}

fn silence_frame() -> switchboard_core::AudioFrame {
    switchboard_core::AudioFrame::new(vec![0i16; 320], SampleRate::Hz16000, 0)
}

/// Pop queued playback until the pipeline reports drained.
async fn drain_playback(pipeline: &CallPipeline, output: &AudioOutputQueue) {
    for _ in 0..400 {
        while output.try_pop().is_some() {}
        if !pipeline.is_speaking() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("playback never drained");
}

async fn wait_for<F: Fn() -> bool>(what: &str, cond: F) {
    for _ in 0..400 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {}", what);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn greeting_then_single_turn() {
    let recognizer = ScriptedRecognizer::new(&["Yes, this is a good time"]);
    let handler = RecordingHandler::new("Great! Let me tell you why I called today.");
    let pipeline = CallPipeline::start(engines(recognizer, 0.9), handler.clone(), &test_settings());
    let mut events = pipeline.subscribe();
    let output = pipeline.output_queue();

    // Greeting is queued before any input.
    pipeline.send_greeting("Hi there! This is Alex from Parallel Universe.");
    assert!(pipeline.is_speaking());
    drain_playback(&pipeline, &output).await;

    // Let the echo cooldown lapse while the caller is silent.
    tokio::time::sleep(Duration::from_millis(300)).await;

    // One utterance: 200ms of speech, then enough silence to cut it.
    for _ in 0..10 {
        pipeline.process_frame(speech_frame()).await;
    }
    for _ in 0..4 {
        pipeline.process_frame(silence_frame()).await;
    }

    wait_for("the turn to reach the agent", || !handler.turns().is_empty()).await;
    assert_eq!(handler.turns(), vec!["Yes, this is a good time"]);

    // The reply is queued for playback.
    wait_for("reply playback", || pipeline.is_speaking()).await;

    let mut saw_greeting = false;
    let mut commits = 0;
    loop {
        match events.try_recv() {
            Ok(PipelineEvent::Greeting(text)) => {
                assert!(text.starts_with("Hi there!"));
                saw_greeting = true;
            },
            Ok(PipelineEvent::TurnCommitted { text, reason }) => {
                assert_eq!(text, "Yes, this is a good time");
                assert_eq!(reason, CommitReason::Confidence);
                commits += 1;
            },
            Ok(_) => {},
            Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
            Err(TryRecvError::Lagged(_)) => {},
        }
    }
    assert!(saw_greeting);
    assert_eq!(commits, 1);

    pipeline.shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn barge_in_clears_playback() {
    let recognizer = ScriptedRecognizer::new(&["tell me about pricing", "actually hold on"]);
    // A long reply keeps the agent speaking while the caller barges in.
    let handler = RecordingHandler::new(
        "We offer a complete package that answers every call around the clock, \
         books appointments automatically, and follows up with every missed caller \
         so your front desk never loses a lead again.",
    );
    let pipeline = CallPipeline::start(engines(recognizer, 0.9), handler.clone(), &test_settings());
    let mut events = pipeline.subscribe();
    let output = pipeline.output_queue();
    let mut control_rx = pipeline.take_control_rx().expect("control channel");

    // First turn: commit and start the reply.
    for _ in 0..10 {
        pipeline.process_frame(speech_frame()).await;
    }
    for _ in 0..4 {
        pipeline.process_frame(silence_frame()).await;
    }
    wait_for("agent reply playback", || pipeline.is_speaking()).await;

    // Caller speaks over the agent: 200ms of sustained voice.
    let mut interrupted = false;
    for _ in 0..15 {
        pipeline.process_frame(speech_frame()).await;
        if !pipeline.is_speaking() {
            interrupted = true;
            break;
        }
    }
    assert!(interrupted, "barge-in did not stop playback");

    // Playback queue is empty and the provider got a clear.
    assert!(output.is_empty());
    assert_eq!(control_rx.try_recv().unwrap(), ControlSignal::Clear);

    let mut saw_interrupt = false;
    loop {
        match events.try_recv() {
            Ok(PipelineEvent::Interrupted { .. }) => saw_interrupt = true,
            Ok(_) => {},
            Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
            Err(TryRecvError::Lagged(_)) => {},
        }
    }
    assert!(saw_interrupt);

    pipeline.shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn silence_fallback_commits_low_confidence_turn() {
    let recognizer = ScriptedRecognizer::new(&["can you call me"]);
    let handler = RecordingHandler::new("Of course, when works best?");
    // EOT stays at zero: only the fallbacks can commit.
    let pipeline = CallPipeline::start(engines(recognizer, 0.0), handler.clone(), &test_settings());
    let mut events = pipeline.subscribe();

    for _ in 0..10 {
        pipeline.process_frame(speech_frame()).await;
    }
    for _ in 0..4 {
        pipeline.process_frame(silence_frame()).await;
    }

    wait_for("silence-fallback commit", || !handler.turns().is_empty()).await;
    assert_eq!(handler.turns(), vec!["can you call me"]);

    let mut reason = None;
    loop {
        match events.try_recv() {
            Ok(PipelineEvent::TurnCommitted { reason: r, .. }) => reason = Some(r),
            Ok(_) => {},
            Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
            Err(TryRecvError::Lagged(_)) => {},
        }
    }
    assert_eq!(reason, Some(CommitReason::SilenceFallback));

    pipeline.shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn no_input_followup_fires_once() {
    let recognizer = ScriptedRecognizer::new(&["hello"]);
    let handler = RecordingHandler::new("Hi! Can you hear me alright?");
    let pipeline = CallPipeline::start(engines(recognizer, 0.9), handler.clone(), &test_settings());
    let mut events = pipeline.subscribe();
    let output = pipeline.output_queue();

    // One committed turn so an agent reply exists.
    for _ in 0..10 {
        pipeline.process_frame(speech_frame()).await;
    }
    for _ in 0..4 {
        pipeline.process_frame(silence_frame()).await;
    }
    wait_for("agent reply playback", || pipeline.is_speaking()).await;

    // Let the reply drain, then go quiet past the no-input timeout.
    drain_playback(&pipeline, &output).await;
    tokio::time::sleep(Duration::from_millis(600)).await;

    let mut followups = 0;
    loop {
        match events.try_recv() {
            Ok(PipelineEvent::Followup(text)) => {
                assert_eq!(text, "Hey, are you still there?");
                followups += 1;
            },
            Ok(_) => {},
            Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
            Err(TryRecvError::Lagged(_)) => {},
        }
    }
    assert_eq!(followups, 1);

    // Drain the follow-up's own audio and keep waiting: it never repeats.
    drain_playback(&pipeline, &output).await;
    tokio::time::sleep(Duration::from_millis(600)).await;

    let mut more = 0;
    loop {
        match events.try_recv() {
            Ok(PipelineEvent::Followup(_)) => more += 1,
            Ok(_) => {},
            Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
            Err(TryRecvError::Lagged(_)) => {},
        }
    }
    assert_eq!(more, 0);

    pipeline.shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn fragments_concatenate_into_one_turn() {
    // Scenario: three finals, the last one confident.
    let recognizer =
        ScriptedRecognizer::new(&["Can you call me", "tomorrow", "at two p m"]);
    let handler = RecordingHandler::new("Tomorrow at two works.");

    // EOT of 0.2 stays below the 0.30 normal threshold while the buffer
    // grows past four words, so only the scripted flow commits.
    struct RisingEot {
        calls: Mutex<usize>,
    }

    #[async_trait]
    impl EotClassifier for RisingEot {
        async fn predict(&self, _turns: &[Turn]) -> Result<f32> {
            let mut calls = self.calls.lock();
            *calls += 1;
            // First two fragments: low confidence. Third: confident.
            Ok(if *calls < 3 { 0.05 } else { 0.55 })
        }
    }

    let engines = PipelineEngines {
        recognizer,
        synthesizer: Arc::new(SilenceSynthesizer::new()),
        eot: Arc::new(RisingEot {
            calls: Mutex::new(0),
        }),
    };

    let mut settings = test_settings();
    // Generous fallbacks so confidence is what commits.
    settings.turn.silence_fallback_s = 5.0;
    settings.turn.max_buffer_age_s = 10.0;

    let pipeline = CallPipeline::start(engines, handler.clone(), &settings);

    // Three bursts of speech, each cut by a short silence.
    for _ in 0..3 {
        for _ in 0..10 {
            pipeline.process_frame(speech_frame()).await;
        }
        for _ in 0..4 {
            pipeline.process_frame(silence_frame()).await;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    wait_for("the concatenated turn", || !handler.turns().is_empty()).await;
    assert_eq!(handler.turns(), vec!["Can you call me tomorrow at two p m"]);

    pipeline.shutdown();
}
