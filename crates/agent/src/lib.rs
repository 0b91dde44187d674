//! Agent invocation
//!
//! Bridges committed user turns to the external agent runtime: resolves the
//! caller's persistent thread, runs the agent under a hard timeout, extracts
//! the assistant's reply and the tool effects the core must observe
//! (end_call, reschedule/confirm, booking variants), and schedules the
//! hangup when the conversation is over.

pub mod binder;
pub mod greeting;
pub mod invoker;
pub mod runtime;

pub use binder::ThreadBinder;
pub use greeting::build_greeting;
pub use invoker::{AgentInvoker, APOLOGY_ERROR, APOLOGY_TIMEOUT};
pub use runtime::HttpAgentRuntime;

use thiserror::Error;

/// Agent-side errors
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Runtime error: {0}")]
    Runtime(#[from] switchboard_core::Error),

    #[error("Thread binding failed: {0}")]
    ThreadBinding(String),
}
