//! Per-call metadata and mutable call context

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which agent persona handles the call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AgentMode {
    #[default]
    Sales,
    Healthcare,
}

impl AgentMode {
    /// Agent id registered with the external runtime
    pub fn agent_id(&self) -> &'static str {
        match self {
            AgentMode::Sales => "sales_agent",
            AgentMode::Healthcare => "healthcare_agent",
        }
    }
}

/// Immutable call metadata delivered in the provider's `start` event.
///
/// The provider forwards a flat `customParameters` string map; the fields
/// here are the keys both agent modes consume. In healthcare mode the
/// business/owner fields carry the clinic and patient names.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CallMetadata {
    pub stream_sid: String,
    pub call_sid: String,
    /// Our number (E.164)
    pub from_number: Option<String>,
    /// The callee's number (E.164) - the key used for thread binding
    pub to_number: Option<String>,
    pub lead_id: Option<String>,
    pub campaign_id: Option<String>,
    pub business_name: Option<String>,
    pub owner_name: Option<String>,
    pub appointment_date: Option<String>,
    pub appointment_time: Option<String>,
    pub appointment_type: Option<String>,
    pub provider_name: Option<String>,
}

impl CallMetadata {
    /// Build from the `start` event's custom parameter map.
    pub fn from_custom_parameters(
        stream_sid: String,
        call_sid: String,
        params: &HashMap<String, String>,
    ) -> Self {
        let get = |key: &str| params.get(key).filter(|v| !v.is_empty()).cloned();
        Self {
            stream_sid,
            call_sid,
            from_number: get("from_number"),
            to_number: get("to_number"),
            lead_id: get("lead_id"),
            campaign_id: get("campaign_id"),
            business_name: get("business_name"),
            owner_name: get("owner_name"),
            appointment_date: get("appointment_date"),
            appointment_time: get("appointment_time"),
            appointment_type: get("appointment_type"),
            provider_name: get("provider_name"),
        }
    }

    /// The `configurable` map handed to the agent runtime so tools can read
    /// call state without process-wide globals.
    pub fn to_configurable(&self, mode: AgentMode) -> serde_json::Map<String, serde_json::Value> {
        let mut map = serde_json::Map::new();
        map.insert(
            "call_sid".to_string(),
            serde_json::Value::String(self.call_sid.clone()),
        );
        let mut put = |key: &str, value: &Option<String>| {
            if let Some(v) = value {
                map.insert(key.to_string(), serde_json::Value::String(v.clone()));
            }
        };
        put("phone_number", &self.to_number);
        match mode {
            AgentMode::Sales => {
                put("business_name", &self.business_name);
                put("owner_name", &self.owner_name);
                put("lead_id", &self.lead_id);
            },
            AgentMode::Healthcare => {
                put("patient_name", &self.owner_name);
                put("clinic_name", &self.business_name);
                put("appointment_date", &self.appointment_date);
                put("appointment_time", &self.appointment_time);
                put("appointment_type", &self.appointment_type);
                put("provider_name", &self.provider_name);
            },
        }
        map
    }
}

/// Outcome tags a call can end with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallOutcome {
    MeetingBooked,
    CallbackRequested,
    NotInterested,
    Hostile,
    DoNotCall,
    WrongNumber,
    Confirmed,
    RescheduleRequested,
    Voicemail,
    CallFailed,
    Unknown,
}

impl CallOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallOutcome::MeetingBooked => "meeting_booked",
            CallOutcome::CallbackRequested => "callback_requested",
            CallOutcome::NotInterested => "not_interested",
            CallOutcome::Hostile => "hostile",
            CallOutcome::DoNotCall => "do_not_call",
            CallOutcome::WrongNumber => "wrong_number",
            CallOutcome::Confirmed => "confirmed",
            CallOutcome::RescheduleRequested => "reschedule_requested",
            CallOutcome::Voicemail => "voicemail",
            CallOutcome::CallFailed => "call_failed",
            CallOutcome::Unknown => "unknown",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "meeting_booked" => CallOutcome::MeetingBooked,
            "callback_requested" => CallOutcome::CallbackRequested,
            "not_interested" => CallOutcome::NotInterested,
            "hostile" => CallOutcome::Hostile,
            "do_not_call" => CallOutcome::DoNotCall,
            "wrong_number" => CallOutcome::WrongNumber,
            "confirmed" => CallOutcome::Confirmed,
            "reschedule_requested" => CallOutcome::RescheduleRequested,
            "voicemail" => CallOutcome::Voicemail,
            "call_failed" => CallOutcome::CallFailed,
            _ => CallOutcome::Unknown,
        }
    }

    /// Outcomes that rule out a retry after an unexpected disconnect
    pub fn blocks_retry(&self) -> bool {
        matches!(
            self,
            CallOutcome::Hostile
                | CallOutcome::DoNotCall
                | CallOutcome::WrongNumber
                | CallOutcome::MeetingBooked
        )
    }
}

impl std::fmt::Display for CallOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mutable per-call state written by observed tool effects.
///
/// Created with the session and cleared when it ends; tools read it through
/// the `configurable` map, the core reads it for hangup and recovery.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CallContext {
    pub contact_name: Option<String>,
    pub contact_email: Option<String>,
    pub meeting_time: Option<DateTime<Utc>>,
    pub callback_time: Option<String>,
    pub outcome: Option<CallOutcome>,
    pub preferred_date: Option<String>,
    pub preferred_time: Option<String>,
    pub reschedule_reason: Option<String>,
    pub notes: Vec<String>,
    /// Set when the agent explicitly called `end_call`
    pub ended: bool,
}

impl CallContext {
    pub fn add_note(&mut self, note: impl Into<String>) {
        let note = note.into();
        if !note.is_empty() {
            self.notes.push(note);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_from_params() {
        let mut params = HashMap::new();
        params.insert("business_name".to_string(), "Acme Dental".to_string());
        params.insert("owner_name".to_string(), "".to_string());
        params.insert("to_number".to_string(), "+15551234567".to_string());

        let meta =
            CallMetadata::from_custom_parameters("MS1".to_string(), "CA1".to_string(), &params);
        assert_eq!(meta.business_name.as_deref(), Some("Acme Dental"));
        assert_eq!(meta.owner_name, None);
        assert_eq!(meta.to_number.as_deref(), Some("+15551234567"));
    }

    #[test]
    fn test_configurable_map_by_mode() {
        let meta = CallMetadata {
            call_sid: "CA1".to_string(),
            to_number: Some("+15551234567".to_string()),
            business_name: Some("Downtown Medical".to_string()),
            owner_name: Some("Jordan".to_string()),
            appointment_date: Some("March 3".to_string()),
            ..Default::default()
        };

        let sales = meta.to_configurable(AgentMode::Sales);
        assert_eq!(sales["business_name"], "Downtown Medical");
        assert!(!sales.contains_key("clinic_name"));

        let health = meta.to_configurable(AgentMode::Healthcare);
        assert_eq!(health["patient_name"], "Jordan");
        assert_eq!(health["clinic_name"], "Downtown Medical");
        assert_eq!(health["appointment_date"], "March 3");
    }

    #[test]
    fn test_outcome_roundtrip() {
        for outcome in [
            CallOutcome::MeetingBooked,
            CallOutcome::Hostile,
            CallOutcome::RescheduleRequested,
        ] {
            assert_eq!(CallOutcome::parse(outcome.as_str()), outcome);
        }
        assert_eq!(CallOutcome::parse("gibberish"), CallOutcome::Unknown);
    }

    #[test]
    fn test_retry_blocking_outcomes() {
        assert!(CallOutcome::DoNotCall.blocks_retry());
        assert!(CallOutcome::MeetingBooked.blocks_retry());
        assert!(!CallOutcome::CallbackRequested.blocks_retry());
    }
}
