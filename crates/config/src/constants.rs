//! Centralized constants for the voice pipeline
//!
//! Single source of truth for timing and signal-processing defaults used
//! across the crates. Anything an operator may want to tune per deployment
//! also appears in `Settings` with these values as serde defaults.

/// Audio formats on the provider link and inside the pipeline
pub mod audio {
    /// Provider link sample rate (G.711 mu-law)
    pub const PROVIDER_SAMPLE_RATE: u32 = 8000;

    /// Recognition sample rate
    pub const PIPELINE_SAMPLE_RATE: u32 = 16000;

    /// Synthesis output sample rate
    pub const TTS_SAMPLE_RATE: u32 = 24000;

    /// Duration of one provider frame (ms)
    pub const FRAME_MS: u64 = 20;

    /// Bytes per mu-law provider frame (20ms at 8kHz)
    pub const FRAME_BYTES_MULAW: usize = 160;
}

/// Barge-in voice activity detection
pub mod vad {
    /// Continuous voice required to fire an interrupt (ms)
    pub const INTERRUPT_DURATION_MS: u64 = 200;

    /// RMS history depth (30s of 20ms frames)
    pub const WINDOW_SIZE_FRAMES: usize = 1500;

    /// Samples required before the adaptive threshold engages (~1s)
    pub const MIN_WINDOW_SAMPLES: usize = 50;

    /// Threshold while the window is warming up (PCM16 RMS)
    pub const DEFAULT_THRESHOLD: f32 = 500.0;

    /// Adaptive threshold lower clamp (PCM16 RMS)
    pub const THRESHOLD_MIN: f32 = 300.0;

    /// Adaptive threshold upper clamp (PCM16 RMS)
    pub const THRESHOLD_MAX: f32 = 2000.0;

    /// Percentile of the RMS window used as the baseline
    pub const PERCENTILE: f32 = 0.85;

    /// Baseline multiplier
    pub const MULTIPLIER: f32 = 1.5;
}

/// Utterance segmentation in front of the recognizer
pub mod stt {
    /// Fixed silence threshold (PCM16 RMS)
    pub const SILENCE_THRESHOLD_RMS: f32 = 500.0;

    /// Silence after speech that cuts an utterance (seconds)
    pub const SILENCE_DURATION_S: f64 = 1.0;

    /// Utterances shorter than this are dropped (seconds)
    pub const MIN_AUDIO_S: f64 = 0.3;

    /// Hard cap on one recognizer invocation (seconds)
    pub const RECOGNIZER_TIMEOUT_S: u64 = 30;
}

/// Turn commitment and the no-input watchdog
pub mod turn {
    /// End-of-turn probability threshold
    pub const EOT_THRESHOLD_NORMAL: f32 = 0.30;

    /// Lower threshold for short inputs (names, affirmations)
    pub const EOT_THRESHOLD_SHORT: f32 = 0.15;

    /// Word count at or below which the short-input threshold applies
    pub const SHORT_WORD_CAP: usize = 4;

    /// Commit after this much silence even with low EOT (seconds)
    pub const SILENCE_FALLBACK_S: f64 = 1.2;

    /// Absolute cap on buffer accumulation (seconds)
    pub const MAX_BUFFER_AGE_S: f64 = 2.5;

    /// Silence after agent playback ends before the follow-up fires (seconds)
    pub const NO_INPUT_TIMEOUT_S: f64 = 5.0;

    /// Ticker interval for the fallback/watchdog checks (ms)
    pub const TICK_MS: u64 = 300;

    /// Exchanges of history retained for the classifier
    pub const MAX_HISTORY_EXCHANGES: usize = 4;
}

/// Sentence chunking and audio re-chunking for synthesis
pub mod tts {
    /// Fixed output chunk duration (ms)
    pub const CHUNK_MS: u64 = 100;

    /// Sentences shorter than this merge with the next (chars)
    pub const MIN_SENTENCE_CHARS: usize = 15;

    /// Sentences longer than this split on clause boundaries (chars)
    pub const MAX_SENTENCE_CHARS: usize = 200;
}

/// Agent invocation and hangup timing
pub mod agent {
    /// Hard cap on one agent run (seconds)
    pub const TIMEOUT_S: u64 = 30;

    /// Speech-rate estimate used for the hangup delay (words per second)
    pub const WORDS_PER_SECOND: f64 = 2.5;

    /// Floor for the estimated playback duration (seconds)
    pub const MIN_SPEECH_ESTIMATE_S: f64 = 3.0;

    /// Grace added after the playback estimate before hangup (seconds)
    pub const HANGUP_GRACE_S: f64 = 1.0;
}

/// Greeting echo suppression
pub mod greeting {
    /// VAD and transcript suppression window after greeting dispatch (seconds)
    pub const ECHO_COOLDOWN_S: f64 = 3.0;
}

/// Disconnect recovery
pub mod retry {
    /// Calls shorter than this are never retried (seconds)
    pub const MIN_DURATION_S: u64 = 10;

    /// Delay before the scheduled retry attempt (seconds)
    pub const DELAY_S: u64 = 300;

    /// Per-lead retry cap
    pub const MAX_ATTEMPTS: u32 = 2;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vad_bounds_ordered() {
        assert!(vad::THRESHOLD_MIN < vad::DEFAULT_THRESHOLD);
        assert!(vad::DEFAULT_THRESHOLD < vad::THRESHOLD_MAX);
        assert!(vad::PERCENTILE > 0.0 && vad::PERCENTILE < 1.0);
    }

    #[test]
    fn test_turn_thresholds_ordered() {
        assert!(turn::EOT_THRESHOLD_SHORT < turn::EOT_THRESHOLD_NORMAL);
        assert!(turn::SILENCE_FALLBACK_S < turn::MAX_BUFFER_AGE_S);
    }

    #[test]
    fn test_frame_math() {
        assert_eq!(
            audio::FRAME_BYTES_MULAW,
            (audio::PROVIDER_SAMPLE_RATE as usize * audio::FRAME_MS as usize) / 1000
        );
    }
}
