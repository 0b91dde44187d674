//! Dynamic greeting builder
//!
//! The opening line is produced before any user input arrives. It addresses
//! the callee by name when the dialer knew one, and in healthcare mode
//! references the appointment being confirmed.

use switchboard_core::{AgentMode, CallMetadata};

/// Build the opening utterance for an outbound call.
pub fn build_greeting(mode: AgentMode, metadata: &CallMetadata) -> String {
    match mode {
        AgentMode::Healthcare => {
            let patient = metadata.owner_name.as_deref().unwrap_or("there");
            let clinic = metadata
                .business_name
                .as_deref()
                .unwrap_or("your healthcare provider");

            match (
                metadata.provider_name.as_deref(),
                metadata.appointment_date.as_deref(),
                metadata.appointment_time.as_deref(),
            ) {
                (Some(provider), Some(date), Some(time)) => format!(
                    "Hi {}, this is Sarah calling from {} about your upcoming appointment \
                     with {} on {} at {}. Is this a good time?",
                    patient, clinic, provider, date, time
                ),
                _ => format!(
                    "Hi {}, this is Sarah calling from {} about your upcoming appointment. \
                     Is this a good time?",
                    patient, clinic
                ),
            }
        },
        AgentMode::Sales => match metadata.owner_name.as_deref() {
            Some(owner) => format!(
                "Hi {}! This is Alex, an AI assistant from Parallel Universe. \
                 Is this a good time to talk? I just need about 3 minutes.",
                owner
            ),
            None => "Hi there! This is Alex, an AI assistant from Parallel Universe. \
                     Is this a good time to talk? I just need about 3 minutes."
                .to_string(),
        },
    }
}

/// Context line prefixed to the first user turn so the agent knows which
/// greeting already played.
pub fn first_turn_context(mode: AgentMode, metadata: &CallMetadata) -> Option<String> {
    if mode != AgentMode::Sales {
        return None;
    }
    Some(match metadata.owner_name.as_deref() {
        Some(owner) => format!(
            "[Context: You asked 'Is {} available?' - you already know their name, \
             use it directly]",
            owner
        ),
        None => "[Context: You asked 'Am I speaking with the owner or manager?' - \
                 you don't know their name yet]"
            .to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata(owner: Option<&str>) -> CallMetadata {
        CallMetadata {
            owner_name: owner.map(String::from),
            business_name: Some("Acme Dental".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_sales_greeting_with_name() {
        let greeting = build_greeting(AgentMode::Sales, &metadata(Some("Jordan")));
        assert!(greeting.starts_with("Hi Jordan!"));
    }

    #[test]
    fn test_sales_greeting_generic() {
        let greeting = build_greeting(AgentMode::Sales, &metadata(None));
        assert!(greeting.starts_with("Hi there!"));
    }

    #[test]
    fn test_healthcare_greeting_with_appointment() {
        let meta = CallMetadata {
            owner_name: Some("Sam".to_string()),
            business_name: Some("Downtown Medical Center".to_string()),
            provider_name: Some("Dr. Williams".to_string()),
            appointment_date: Some("January 17".to_string()),
            appointment_time: Some("2:30 PM".to_string()),
            ..Default::default()
        };
        let greeting = build_greeting(AgentMode::Healthcare, &meta);
        assert!(greeting.contains("Sam"));
        assert!(greeting.contains("Downtown Medical Center"));
        assert!(greeting.contains("Dr. Williams"));
        assert!(greeting.contains("January 17"));
    }

    #[test]
    fn test_healthcare_greeting_without_details() {
        let greeting = build_greeting(AgentMode::Healthcare, &metadata(None));
        assert!(greeting.contains("your upcoming appointment"));
    }

    #[test]
    fn test_first_turn_context() {
        assert!(first_turn_context(AgentMode::Sales, &metadata(Some("Jordan")))
            .unwrap()
            .contains("Jordan"));
        assert!(first_turn_context(AgentMode::Sales, &metadata(None))
            .unwrap()
            .contains("owner or manager"));
        assert!(first_turn_context(AgentMode::Healthcare, &metadata(None)).is_none());
    }
}
