//! Outbound message composition: input validation and frame encoding.

use crate::error::SubmitRejected;
use crate::protocol::OutboundFrame;

/// Text the user is currently typing. Cleared only when a submission is
/// accepted.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct InputBuffer {
    text: String,
}

impl InputBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, text: impl Into<String>) {
        self.text = text.into();
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn clear(&mut self) {
        self.text.clear();
    }

    /// Whether the send affordance should be enabled (ignoring connectivity).
    pub fn has_content(&self) -> bool {
        !self.text.trim().is_empty()
    }
}

/// Validate raw input and build the outbound frame carrying the current user
/// display name.
pub fn compose(raw: &str, user_name: &str) -> Result<OutboundFrame, SubmitRejected> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(SubmitRejected::Empty);
    }
    Ok(OutboundFrame {
        message: trimmed.to_string(),
        user_name: user_name.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compose_trims_message() {
        let frame = compose("  hello there \n", "Mina").unwrap();
        assert_eq!(frame.message, "hello there");
        assert_eq!(frame.user_name, "Mina");
    }

    #[test]
    fn compose_rejects_blank_input() {
        assert!(matches!(compose("", ""), Err(SubmitRejected::Empty)));
        assert!(matches!(compose("  ", "Mina"), Err(SubmitRejected::Empty)));
        assert!(matches!(compose("\t\n ", "Mina"), Err(SubmitRejected::Empty)));
    }

    #[test]
    fn compose_allows_empty_user_name() {
        let frame = compose("hi", "").unwrap();
        assert_eq!(frame.user_name, "");
    }

    #[test]
    fn input_buffer_content() {
        let mut input = InputBuffer::new();
        assert!(!input.has_content());
        input.set("   ");
        assert!(!input.has_content());
        input.set(" hi ");
        assert!(input.has_content());
        assert_eq!(input.as_str(), " hi ");
        input.clear();
        assert_eq!(input.as_str(), "");
    }
}
