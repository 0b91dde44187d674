//! Provider wire protocol
//!
//! JSON events on the media-stream WebSocket, tagged by an `event` field.
//! Inbound: connected, start (with stream metadata), media (base64 mu-law),
//! mark acknowledgements, stop. Outbound: media, clear, mark.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Events received from the provider
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum ProviderEvent {
    /// Handshake after the WebSocket upgrade
    Connected,
    /// Stream start with call metadata
    Start { start: StartInfo },
    /// One frame of caller audio
    Media { media: MediaPayload },
    /// Playback checkpoint acknowledgement
    Mark { mark: MarkInfo },
    /// End of stream
    Stop,
}

/// `start` event body
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StartInfo {
    #[serde(rename = "streamSid")]
    pub stream_sid: String,

    #[serde(rename = "callSid")]
    pub call_sid: String,

    #[serde(rename = "accountSid", default)]
    pub account_sid: String,

    /// Session metadata forwarded by the dialer
    #[serde(rename = "customParameters", default)]
    pub custom_parameters: HashMap<String, String>,
}

/// `media` event body: base64-encoded mu-law at 8kHz mono
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaPayload {
    pub payload: String,
}

/// `mark` event body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarkInfo {
    pub name: String,
}

/// Frames sent to the provider
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum OutboundFrame {
    /// One frame of agent audio
    Media {
        #[serde(rename = "streamSid")]
        stream_sid: String,
        media: MediaPayload,
    },
    /// Drop all provider-buffered playback
    Clear {
        #[serde(rename = "streamSid")]
        stream_sid: String,
    },
    /// Request a playback checkpoint acknowledgement
    Mark {
        #[serde(rename = "streamSid")]
        stream_sid: String,
        mark: MarkInfo,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_start_event() {
        let json = r#"{
            "event": "start",
            "start": {
                "streamSid": "MZ123",
                "callSid": "CA456",
                "accountSid": "AC789",
                "customParameters": {
                    "business_name": "Acme Dental",
                    "to_number": "+15551234567"
                }
            }
        }"#;

        let event: ProviderEvent = serde_json::from_str(json).unwrap();
        match event {
            ProviderEvent::Start { start } => {
                assert_eq!(start.stream_sid, "MZ123");
                assert_eq!(start.call_sid, "CA456");
                assert_eq!(
                    start.custom_parameters.get("business_name").unwrap(),
                    "Acme Dental"
                );
            },
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_parse_media_event() {
        let json = r#"{"event": "media", "media": {"payload": "//79/A=="}}"#;
        let event: ProviderEvent = serde_json::from_str(json).unwrap();
        assert!(matches!(event, ProviderEvent::Media { .. }));
    }

    #[test]
    fn test_parse_connected_and_stop() {
        assert!(matches!(
            serde_json::from_str::<ProviderEvent>(r#"{"event": "connected"}"#).unwrap(),
            ProviderEvent::Connected
        ));
        assert!(matches!(
            serde_json::from_str::<ProviderEvent>(r#"{"event": "stop"}"#).unwrap(),
            ProviderEvent::Stop
        ));
    }

    #[test]
    fn test_malformed_frame_is_an_error() {
        assert!(serde_json::from_str::<ProviderEvent>(r#"{"event": "bogus"}"#).is_err());
        assert!(serde_json::from_str::<ProviderEvent>("not json").is_err());
    }

    #[test]
    fn test_serialize_clear_frame() {
        let frame = OutboundFrame::Clear {
            stream_sid: "MZ123".to_string(),
        };
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["event"], "clear");
        assert_eq!(json["streamSid"], "MZ123");
    }

    #[test]
    fn test_serialize_media_frame() {
        let frame = OutboundFrame::Media {
            stream_sid: "MZ123".to_string(),
            media: MediaPayload {
                payload: "AAAA".to_string(),
            },
        };
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["event"], "media");
        assert_eq!(json["media"]["payload"], "AAAA");
    }

    #[test]
    fn test_serialize_mark_frame() {
        let frame = OutboundFrame::Mark {
            stream_sid: "MZ1".to_string(),
            mark: MarkInfo {
                name: "checkpoint-1".to_string(),
            },
        };
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["event"], "mark");
        assert_eq!(json["mark"]["name"], "checkpoint-1");
    }
}
