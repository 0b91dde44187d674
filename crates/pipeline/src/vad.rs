//! Barge-in voice activity detection
//!
//! Energy-based VAD with an adaptive threshold derived from a rolling RMS
//! window. The detector only decides that an interrupt should fire; clearing
//! queues is the interrupt coordinator's job.

use parking_lot::Mutex;
use std::collections::VecDeque;

use switchboard_config::VadSettings;

/// Four-state voice machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VadState {
    /// No voice
    #[default]
    Silence,
    /// Voice onset, accumulating toward the interrupt duration
    Starting,
    /// Confirmed voice
    Speaking,
    /// Voice dropped below threshold, may resume
    Stopping,
}

/// Rolling window of per-frame RMS values for the adaptive threshold.
///
/// The threshold is the configured percentile of the window times the
/// multiplier, clamped to [min, max]. Until the window holds ~1s of audio
/// the default threshold applies.
#[derive(Debug)]
pub struct AudioLevelWindow {
    levels: VecDeque<f32>,
    capacity: usize,
    min_samples: usize,
    percentile: f32,
    multiplier: f32,
    clamp_min: f32,
    clamp_max: f32,
    default_threshold: f32,
}

impl AudioLevelWindow {
    pub fn new(settings: &VadSettings) -> Self {
        Self {
            levels: VecDeque::with_capacity(settings.window_size_frames),
            capacity: settings.window_size_frames,
            min_samples: switchboard_config::constants::vad::MIN_WINDOW_SAMPLES,
            percentile: settings.percentile,
            multiplier: settings.multiplier,
            clamp_min: settings.threshold_min,
            clamp_max: settings.threshold_max,
            default_threshold: switchboard_config::constants::vad::DEFAULT_THRESHOLD,
        }
    }

    /// Record one frame's RMS.
    pub fn push(&mut self, rms: f32) {
        if self.levels.len() == self.capacity {
            self.levels.pop_front();
        }
        self.levels.push_back(rms);
    }

    /// Current adaptive threshold.
    pub fn threshold(&self) -> f32 {
        if self.levels.len() < self.min_samples {
            return self.default_threshold;
        }

        let mut sorted: Vec<f32> = self.levels.iter().copied().collect();
        sorted.sort_by(|a, b| a.total_cmp(b));
        let idx = ((sorted.len() as f32 * self.percentile) as usize).min(sorted.len() - 1);
        let baseline = sorted[idx];

        (baseline * self.multiplier).clamp(self.clamp_min, self.clamp_max)
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }
}

struct DetectorState {
    window: AudioLevelWindow,
    state: VadState,
    /// Audio time above threshold since onset (ms)
    voiced_ms: u64,
    /// Interrupt already fired this speaking episode
    fired: bool,
}

/// Barge-in detector
///
/// Fed every inbound 20ms frame. RMS always lands in the window; the state
/// machine only advances while the agent is speaking and the greeting echo
/// cooldown has passed, since interrupts are meaningless otherwise.
pub struct BargeInDetector {
    interrupt_duration_ms: u64,
    state: Mutex<DetectorState>,
}

impl BargeInDetector {
    pub fn new(settings: &VadSettings) -> Self {
        Self {
            interrupt_duration_ms: settings.interrupt_duration_ms,
            state: Mutex::new(DetectorState {
                window: AudioLevelWindow::new(settings),
                state: VadState::Silence,
                voiced_ms: 0,
                fired: false,
            }),
        }
    }

    /// Process one frame.
    ///
    /// Returns `true` exactly once per speaking episode, at the moment voice
    /// has persisted for the interrupt duration while the agent is speaking.
    pub fn process_frame(&self, rms: f32, frame_ms: u64, speaking: bool, in_cooldown: bool) -> bool {
        let mut s = self.state.lock();
        s.window.push(rms);

        if !speaking || in_cooldown {
            s.state = VadState::Silence;
            s.voiced_ms = 0;
            s.fired = false;
            return false;
        }

        let threshold = s.window.threshold();
        let voiced = rms > threshold;

        match s.state {
            VadState::Silence => {
                if voiced {
                    s.state = VadState::Starting;
                    s.voiced_ms = frame_ms;
                }
                false
            },
            VadState::Starting => {
                if voiced {
                    s.voiced_ms += frame_ms;
                    if s.voiced_ms >= self.interrupt_duration_ms {
                        s.state = VadState::Speaking;
                        if !s.fired {
                            s.fired = true;
                            tracing::info!(
                                voiced_ms = s.voiced_ms,
                                threshold = threshold,
                                "Barge-in detected"
                            );
                            return true;
                        }
                    }
                } else {
                    // False start
                    s.state = VadState::Silence;
                    s.voiced_ms = 0;
                }
                false
            },
            VadState::Speaking => {
                if !voiced {
                    s.state = VadState::Stopping;
                }
                false
            },
            VadState::Stopping => {
                if voiced {
                    s.state = VadState::Speaking;
                } else {
                    s.state = VadState::Silence;
                    s.voiced_ms = 0;
                    s.fired = false;
                }
                false
            },
        }
    }

    /// Current adaptive threshold (for logs and tests).
    pub fn threshold(&self) -> f32 {
        self.state.lock().window.threshold()
    }

    pub fn state(&self) -> VadState {
        self.state.lock().state
    }

    pub fn reset(&self) {
        let mut s = self.state.lock();
        s.state = VadState::Silence;
        s.voiced_ms = 0;
        s.fired = false;
    }
}
