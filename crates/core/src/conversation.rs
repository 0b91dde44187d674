//! Conversation turn types and end-of-turn text normalization

use serde::{Deserialize, Serialize};

/// Who produced a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Agent,
}

impl TurnRole {
    /// Role string expected by the end-of-turn classifier's chat template
    pub fn as_chat_role(&self) -> &'static str {
        match self {
            TurnRole::User => "user",
            TurnRole::Agent => "assistant",
        }
    }
}

/// One committed utterance in the conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub role: TurnRole,
    pub text: String,
}

impl Turn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: TurnRole::User,
            text: text.into(),
        }
    }

    pub fn agent(text: impl Into<String>) -> Self {
        Self {
            role: TurnRole::Agent,
            text: text.into(),
        }
    }
}

/// Normalize text for the end-of-turn classifier.
///
/// Lowercases, strips punctuation except apostrophes and hyphens, and
/// collapses whitespace runs to single spaces.
pub fn normalize_for_eot(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut last_was_space = true;
    for c in text.chars() {
        if c.is_alphanumeric() || c == '\'' || c == '-' {
            for lc in c.to_lowercase() {
                out.push(lc);
            }
            last_was_space = false;
        } else if c.is_whitespace() || c.is_ascii_punctuation() {
            if !last_was_space && c.is_whitespace() {
                out.push(' ');
                last_was_space = true;
            }
            // Punctuation is dropped without inserting a space.
        }
    }
    out.trim().to_string()
}
