//! Wire Protocol Types
//!
//! JSON frames exchanged with the companion backend over the session channel.
//! Inbound frames are decoded into [`InboundEvent`] at the boundary; nothing
//! untyped flows past [`decode`].

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// A typed inbound event. Fields that do not apply to a given `type` are
/// ignored when present on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundEvent {
    /// Partial token of the in-progress reply
    Stream {
        #[serde(default)]
        content: String,
    },
    /// Reply complete
    End {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        intent: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        emotion_color: Option<String>,
    },
    Greeting {
        #[serde(default)]
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        intent: Option<String>,
    },
    NamingPrompt {
        #[serde(default)]
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        intent: Option<String>,
    },
    Announcement {
        #[serde(default)]
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        intent: Option<String>,
    },
    /// The companion has been given a new display name
    NameReveal { content: String },
    /// The backend extracted the user's name from free text
    UserNameSet { content: String },
}

impl InboundEvent {
    /// Wire name of the event kind.
    pub fn kind(&self) -> &'static str {
        match self {
            InboundEvent::Stream { .. } => "stream",
            InboundEvent::End { .. } => "end",
            InboundEvent::Greeting { .. } => "greeting",
            InboundEvent::NamingPrompt { .. } => "naming_prompt",
            InboundEvent::Announcement { .. } => "announcement",
            InboundEvent::NameReveal { .. } => "name_reveal",
            InboundEvent::UserNameSet { .. } => "user_name_set",
        }
    }

    pub fn to_frame(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Frame sent for every accepted user submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundFrame {
    pub message: String,
    pub user_name: String,
}

impl OutboundFrame {
    pub fn to_frame(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Decode one raw text frame. Malformed frames, unknown kinds and backend
/// error frames yield `None` and are logged; none of them touch session state.
pub fn decode(raw: &str) -> Option<InboundEvent> {
    match serde_json::from_str::<InboundEvent>(raw) {
        Ok(event) => Some(event),
        Err(err) => {
            match serde_json::from_str::<serde_json::Value>(raw) {
                Ok(value) => {
                    if let Some(message) = value.get("error").and_then(|v| v.as_str()) {
                        warn!(error = %message, "Backend sent an error frame, dropping");
                    } else {
                        debug!(
                            kind = ?value.get("type"),
                            error = %err,
                            "Dropping unrecognized frame"
                        );
                    }
                }
                Err(_) => warn!(error = %err, "Dropping malformed frame"),
            }
            None
        }
    }
}
