//! Turn controller
//!
//! Finalized transcripts are fragments, not turns; a reply may arrive as
//! several finals separated by short pauses. The controller accumulates
//! fragments and decides when the user is done, combining the classifier's
//! verdict (applied by the orchestrator) with silence and buffer-age
//! fallbacks checked on a ticker. It also owns the no-input watchdog.
//!
//! All time-dependent entry points take an explicit `now` so the state
//! machine is deterministic under test.

use parking_lot::Mutex;
use std::time::{Duration, Instant};

use switchboard_config::TurnSettings;

/// Why a turn was committed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitReason {
    /// Classifier probability cleared the threshold
    Confidence,
    /// Silence since the last fragment exceeded the fallback delay
    SilenceFallback,
    /// The buffer accumulated past the absolute age cap
    BufferAge,
}

/// Controller outputs consumed by the orchestrator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnEvent {
    /// A full user turn, ready for the agent
    Commit { text: String, reason: CommitReason },
    /// The no-input follow-up should be spoken
    Followup,
}

/// Follow-up line spoken when the user goes quiet after an agent turn
pub const NO_INPUT_FOLLOWUP: &str = "Hey, are you still there?";

struct ControllerState {
    fragments: Vec<String>,
    buffer_start: Option<Instant>,
    last_fragment: Option<Instant>,
    /// An agent turn happened and we are waiting on the user
    waiting_for_response: bool,
    /// The single follow-up was already sent for this wait
    watchdog_fired: bool,
    /// When the ticker first observed playback drained
    agent_stopped_at: Option<Instant>,
}

/// Fragment accumulation and watchdog state for one session
pub struct TurnController {
    settings: TurnSettings,
    state: Mutex<ControllerState>,
}

impl TurnController {
    pub fn new(settings: TurnSettings) -> Self {
        Self {
            settings,
            state: Mutex::new(ControllerState {
                fragments: Vec::new(),
                buffer_start: None,
                last_fragment: None,
                waiting_for_response: false,
                watchdog_fired: false,
                agent_stopped_at: None,
            }),
        }
    }

    /// Add a fragment. With `replace` set (barge-in), any buffered
    /// pre-interrupt content is dropped and the buffer restarts here.
    pub fn push_fragment(&self, text: &str, replace: bool, now: Instant) {
        let mut s = self.state.lock();
        if replace {
            s.fragments.clear();
            s.buffer_start = None;
        }
        if s.fragments.is_empty() {
            s.buffer_start = Some(now);
        }
        s.fragments.push(text.to_string());
        s.last_fragment = Some(now);

        // The user responded; any pending follow-up is off.
        s.waiting_for_response = false;
        s.watchdog_fired = false;
        s.agent_stopped_at = None;
    }

    /// Buffered fragments joined with single spaces.
    pub fn buffered_text(&self) -> String {
        self.state.lock().fragments.join(" ")
    }

    pub fn buffered_word_count(&self) -> usize {
        let s = self.state.lock();
        s.fragments
            .iter()
            .map(|f| f.split_whitespace().count())
            .sum()
    }

    pub fn has_buffer(&self) -> bool {
        !self.state.lock().fragments.is_empty()
    }

    /// Take the buffer as a committed turn.
    pub fn take_commit(&self, reason: CommitReason) -> Option<TurnEvent> {
        let mut s = self.state.lock();
        if s.fragments.is_empty() {
            return None;
        }
        let text = s.fragments.join(" ");
        s.fragments.clear();
        s.buffer_start = None;
        s.last_fragment = None;
        Some(TurnEvent::Commit { text, reason })
    }

    /// Fallback check, run on every ticker tick.
    pub fn check_fallbacks(&self, now: Instant) -> Option<CommitReason> {
        let s = self.state.lock();
        if s.fragments.is_empty() {
            return None;
        }

        if let Some(last) = s.last_fragment {
            if now.duration_since(last) >= secs(self.settings.silence_fallback_s) {
                return Some(CommitReason::SilenceFallback);
            }
        }
        if let Some(start) = s.buffer_start {
            if now.duration_since(start) >= secs(self.settings.max_buffer_age_s) {
                return Some(CommitReason::BufferAge);
            }
        }
        None
    }

    /// Record that an agent turn was queued for playback. Arms the watchdog
    /// for when playback drains.
    pub fn on_agent_turn(&self) {
        let mut s = self.state.lock();
        s.waiting_for_response = true;
        s.watchdog_fired = false;
        s.agent_stopped_at = None;
    }

    /// Record that the follow-up itself was sent; it fires at most once per
    /// wait.
    pub fn on_followup_sent(&self) {
        let mut s = self.state.lock();
        s.watchdog_fired = true;
        s.agent_stopped_at = None;
    }

    /// Barge-in: the user is clearly present, stand the watchdog down.
    pub fn on_interrupt(&self) {
        let mut s = self.state.lock();
        s.waiting_for_response = false;
        s.watchdog_fired = false;
        s.agent_stopped_at = None;
    }

    /// Watchdog check, run on every ticker tick with the current speaking
    /// flag. The timer only starts once playback has drained.
    pub fn check_watchdog(&self, now: Instant, speaking: bool) -> Option<TurnEvent> {
        let mut s = self.state.lock();

        if !s.waiting_for_response || s.watchdog_fired || !s.fragments.is_empty() {
            return None;
        }

        if speaking {
            // Still playing; the countdown starts after drain.
            s.agent_stopped_at = None;
            return None;
        }

        match s.agent_stopped_at {
            None => {
                s.agent_stopped_at = Some(now);
                None
            },
            Some(stopped) => {
                if now.duration_since(stopped) >= secs(self.settings.no_input_timeout_s) {
                    s.watchdog_fired = true;
                    s.agent_stopped_at = None;
                    Some(TurnEvent::Followup)
                } else {
                    None
                }
            },
        }
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.settings.tick_ms)
    }

    pub fn settings(&self) -> &TurnSettings {
        &self.settings
    }
}

fn secs(s: f64) -> Duration {
    Duration::from_secs_f64(s)
}
