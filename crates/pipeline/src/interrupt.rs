//! Interrupt coordinator
//!
//! Executes the barge-in sequence: stop queuing synthesis, drop queued
//! playback, flush the provider's buffer, and mark the agent quiet. All
//! steps are idempotent so a VAD-triggered interrupt and a fragment-time
//! interrupt may both run without harm.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::output::AudioOutputQueue;
use crate::tts::StreamingTts;
use crate::turn::TurnController;

/// Control events the media transport forwards to the provider
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlSignal {
    /// Drop all provider-buffered playback
    Clear,
}

/// Per-session interrupt coordinator
pub struct InterruptCoordinator {
    tts: Arc<StreamingTts>,
    output: Arc<AudioOutputQueue>,
    control_tx: mpsc::UnboundedSender<ControlSignal>,
    speaking: Arc<AtomicBool>,
    /// Set on fire; the next fragment replaces the turn buffer
    interrupt_pending: Arc<AtomicBool>,
    controller: Arc<TurnController>,
}

impl InterruptCoordinator {
    pub fn new(
        tts: Arc<StreamingTts>,
        output: Arc<AudioOutputQueue>,
        control_tx: mpsc::UnboundedSender<ControlSignal>,
        speaking: Arc<AtomicBool>,
        interrupt_pending: Arc<AtomicBool>,
        controller: Arc<TurnController>,
    ) -> Self {
        Self {
            tts,
            output,
            control_tx,
            speaking,
            interrupt_pending,
            controller,
        }
    }

    /// Run the barge-in sequence. Returns (dropped text chunks, dropped
    /// audio chunks).
    pub fn fire(&self) -> (usize, usize) {
        let dropped_text = self.tts.clear_queue();
        let dropped_audio = self.output.clear();

        if self.control_tx.send(ControlSignal::Clear).is_err() {
            tracing::debug!("Control channel closed, provider clear not sent");
        }

        self.speaking.store(false, Ordering::Release);
        self.interrupt_pending.store(true, Ordering::Release);
        self.controller.on_interrupt();

        tracing::info!(
            dropped_text_chunks = dropped_text,
            dropped_audio_chunks = dropped_audio,
            "Interrupt: playback cleared"
        );

        (dropped_text, dropped_audio)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use switchboard_config::TurnSettings;
    use switchboard_core::{AudioFrame, SampleRate};

    fn build() -> (
        InterruptCoordinator,
        Arc<StreamingTts>,
        Arc<AudioOutputQueue>,
        mpsc::UnboundedReceiver<ControlSignal>,
        Arc<AtomicBool>,
        Arc<AtomicBool>,
    ) {
        let output = AudioOutputQueue::new();
        let (event_tx, _) = tokio::sync::broadcast::channel(16);
        let tts = StreamingTts::spawn(
            Arc::new(crate::tts::SilenceSynthesizer::new()),
            100,
            output.clone(),
            event_tx,
        );
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let speaking = Arc::new(AtomicBool::new(true));
        let pending = Arc::new(AtomicBool::new(false));
        let controller = Arc::new(TurnController::new(TurnSettings::default()));
        let coordinator = InterruptCoordinator::new(
            tts.clone(),
            output.clone(),
            control_tx,
            speaking.clone(),
            pending.clone(),
            controller,
        );
        (coordinator, tts, output, control_rx, speaking, pending)
    }

    #[tokio::test]
    async fn test_fire_clears_everything() {
        let (coordinator, tts, output, mut control_rx, speaking, pending) = build();

        tts.send("queued but never spoken");
        output.push(AudioFrame::new(vec![0i16; 2400], SampleRate::Hz24000, 0));
        output.push(AudioFrame::new(vec![0i16; 2400], SampleRate::Hz24000, 1));

        let (dropped_text, dropped_audio) = coordinator.fire();
        assert_eq!(dropped_text, 1);
        assert_eq!(dropped_audio, 2);

        assert!(output.is_empty());
        assert_eq!(control_rx.try_recv().unwrap(), ControlSignal::Clear);
        assert!(!speaking.load(Ordering::Acquire));
        assert!(pending.load(Ordering::Acquire));
    }

    #[tokio::test]
    async fn test_fire_is_idempotent() {
        let (coordinator, tts, output, mut control_rx, _, _) = build();

        tts.send("first");
        output.push(AudioFrame::new(vec![0i16; 2400], SampleRate::Hz24000, 0));

        coordinator.fire();
        let (dropped_text, dropped_audio) = coordinator.fire();
        assert_eq!(dropped_text, 0);
        assert_eq!(dropped_audio, 0);

        // Two clears were sent; the provider treats them as idempotent.
        assert!(control_rx.try_recv().is_ok());
        assert!(control_rx.try_recv().is_ok());
    }
}
