//! Agent invoker
//!
//! Handles one committed user turn: runs the agent on the caller's thread
//! with a hard timeout, extracts the assistant's reply, records tool
//! effects into the call context, and schedules the hangup when the agent
//! decided the conversation is over.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use switchboard_config::constants::agent as agent_constants;
use switchboard_core::{
    AgentMessage, AgentMode, AgentRuntime, CallContext, CallControl, CallMetadata, CallOutcome,
    ToolCall,
};
use switchboard_pipeline::TurnHandler;

use crate::greeting::first_turn_context;

/// Spoken when the runtime misses the hard timeout.
pub const APOLOGY_TIMEOUT: &str = "I'm sorry, I had a brief hiccup. Could you say that again?";

/// Spoken when the runtime call itself fails.
pub const APOLOGY_ERROR: &str = "I'm having a bit of trouble. Could you repeat that?";

/// Phrase fallback for hanging up when the agent says goodbye without
/// calling the end_call tool. The tool always wins; this list only catches
/// runs where the model forgot the tool.
const GOODBYE_PHRASES: &[&str] = &[
    "take care",
    "have a great day",
    "goodbye",
    "bye bye",
    "bye!",
    "talk to you",
    "talk soon",
    "speak soon",
    "thanks for your time",
    "have a good one",
    "catch you later",
    "later!",
    "cheers!",
];

/// Per-session agent invoker; implements the pipeline's turn handler.
pub struct AgentInvoker {
    runtime: Arc<dyn AgentRuntime>,
    call_control: Arc<dyn CallControl>,
    metadata: CallMetadata,
    mode: AgentMode,
    thread_id: String,
    timeout: Duration,
    context: Arc<Mutex<CallContext>>,
    first_turn_done: AtomicBool,
    hangup_scheduled: AtomicBool,
}

impl AgentInvoker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        runtime: Arc<dyn AgentRuntime>,
        call_control: Arc<dyn CallControl>,
        metadata: CallMetadata,
        mode: AgentMode,
        thread_id: String,
        timeout_s: u64,
        context: Arc<Mutex<CallContext>>,
    ) -> Self {
        Self {
            runtime,
            call_control,
            metadata,
            mode,
            thread_id,
            timeout: Duration::from_secs(timeout_s),
            context,
            first_turn_done: AtomicBool::new(false),
            hangup_scheduled: AtomicBool::new(false),
        }
    }

    pub fn thread_id(&self) -> &str {
        &self.thread_id
    }

    /// Last assistant message with non-empty text.
    fn extract_reply(messages: &[AgentMessage]) -> Option<String> {
        messages
            .iter()
            .rev()
            .filter(|m| m.kind == "ai")
            .find_map(|m| m.content.as_ref().and_then(|c| c.as_text()))
            .map(|s| s.to_string())
    }

    /// Record the tool effects the core observes.
    fn apply_tool_effects(&self, messages: &[AgentMessage]) {
        let mut context = self.context.lock();
        for message in messages.iter().filter(|m| m.kind == "ai") {
            for call in &message.tool_calls {
                self.apply_tool_call(&mut context, call);
            }
        }
    }

    fn apply_tool_call(&self, context: &mut CallContext, call: &ToolCall) {
        let arg = |key: &str| {
            call.args
                .get(key)
                .and_then(|v| v.as_str())
                .map(String::from)
        };

        match call.name.as_str() {
            "end_call" => {
                let outcome = arg("outcome")
                    .map(|o| CallOutcome::parse(&o))
                    .unwrap_or(CallOutcome::Unknown);
                context.outcome = Some(outcome);
                context.ended = true;
                if let Some(notes) = arg("notes") {
                    context.add_note(notes);
                }
                tracing::info!(outcome = %outcome, "Agent called end_call");
            },
            "request_reschedule" => {
                context.outcome = Some(CallOutcome::RescheduleRequested);
                context.preferred_date = arg("preferred_date");
                context.preferred_time = arg("preferred_time");
                context.reschedule_reason = arg("reason");
                tracing::info!(
                    date = ?context.preferred_date,
                    time = ?context.preferred_time,
                    "Reschedule captured"
                );
            },
            "confirm_appointment" => {
                context.outcome = Some(CallOutcome::Confirmed);
                tracing::info!("Appointment confirmation captured");
            },
            "book_meeting" => {
                context.outcome = Some(CallOutcome::MeetingBooked);
                if let Some(name) = arg("contact_name") {
                    context.contact_name = Some(name);
                }
                if let Some(email) = arg("contact_email") {
                    context.contact_email = Some(email);
                }
                tracing::info!("Meeting booking captured");
            },
            "request_callback" => {
                context.outcome = Some(CallOutcome::CallbackRequested);
                context.callback_time = arg("callback_time");
                tracing::info!(time = ?context.callback_time, "Callback captured");
            },
            // Other tools are the runtime's business.
            _ => {},
        }
    }

    /// The explicit end_call tool wins; goodbye phrasing is the fallback.
    fn should_hang_up(&self, reply: &str) -> bool {
        if self.context.lock().ended {
            return true;
        }
        let lower = reply.to_lowercase();
        GOODBYE_PHRASES.iter().any(|phrase| lower.contains(phrase))
    }

    /// Hang up once the reply has had time to play out.
    fn schedule_hangup(&self, reply: &str) {
        if self.hangup_scheduled.swap(true, Ordering::AcqRel) {
            return;
        }

        let words = reply.split_whitespace().count();
        let playback_s = (words as f64 / agent_constants::WORDS_PER_SECOND)
            .max(agent_constants::MIN_SPEECH_ESTIMATE_S);
        let delay = Duration::from_secs_f64(playback_s + agent_constants::HANGUP_GRACE_S);

        tracing::info!(delay_s = delay.as_secs_f64(), "Hangup scheduled");

        let call_control = self.call_control.clone();
        let call_sid = self.metadata.call_sid.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(e) = call_control.end_call(&call_sid).await {
                // The provider will close the stream on its own eventually.
                tracing::warn!(error = %e, call_sid = %call_sid, "Hangup request failed");
            }
        });
    }

    fn compose_input(&self, text: &str) -> String {
        if !self.first_turn_done.swap(true, Ordering::AcqRel) {
            if let Some(context_line) = first_turn_context(self.mode, &self.metadata) {
                return format!("{} {}", context_line, text);
            }
        }
        text.to_string()
    }
}

#[async_trait]
impl TurnHandler for AgentInvoker {
    async fn handle_turn(&self, text: &str) -> Option<String> {
        let input = self.compose_input(text);
        let configurable = self.metadata.to_configurable(self.mode);

        let started = std::time::Instant::now();
        let run = self.runtime.run(
            &self.thread_id,
            self.mode.agent_id(),
            &input,
            configurable,
        );

        let messages = match tokio::time::timeout(self.timeout, run).await {
            Ok(Ok(messages)) => messages,
            Ok(Err(e)) => {
                tracing::error!(error = %e, "Agent runtime error");
                return Some(APOLOGY_ERROR.to_string());
            },
            Err(_) => {
                // No assistant turn was committed to the thread; the user
                // can simply repeat themselves.
                tracing::warn!(timeout_s = self.timeout.as_secs(), "Agent run timed out");
                return Some(APOLOGY_TIMEOUT.to_string());
            },
        };

        tracing::info!(
            latency_ms = started.elapsed().as_millis() as u64,
            messages = messages.len(),
            "Agent run complete"
        );

        self.apply_tool_effects(&messages);

        let reply = Self::extract_reply(&messages)?;

        if self.should_hang_up(&reply) {
            self.schedule_hangup(&reply);
        }

        Some(reply)
    }
}
