//! Telephony provider integration
//!
//! The provider speaks JSON-framed events over one WebSocket per call:
//! mu-law audio in 20ms frames, plus start/stop/mark control events. This
//! crate owns the wire protocol, the transcode paths in both directions,
//! outbound frame pacing, the call-control client, and classification and
//! recovery of unexpected disconnects.

pub mod call_control;
pub mod media;
pub mod protocol;
pub mod recovery;

pub use call_control::{HttpCallControl, NullCallControl};
pub use media::{FrameSender, InboundDecoder};
pub use protocol::{MarkInfo, MediaPayload, OutboundFrame, ProviderEvent, StartInfo};
pub use recovery::{
    CallSnapshot, DisconnectCause, RecoveryHandler, RecoveryStore, RetryDecision, RetryPolicy,
};

use thiserror::Error;

/// Telephony errors
#[derive(Error, Debug)]
pub enum TelephonyError {
    #[error("Malformed provider frame: {0}")]
    MalformedFrame(String),

    #[error("WebSocket error: {0}")]
    WebSocket(String),

    #[error("Recovery store error: {0}")]
    Store(String),
}
