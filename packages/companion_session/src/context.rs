use serde::{Deserialize, Serialize};

/// Companion identity shared with the views around the chat: which session
/// to open and what to call both parties. Owned by one controller for the
/// lifetime of a session and cleared when the session ends.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompanionContext {
    session_id: String,
    companion_name: String,
    user_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    background_image: Option<String>,
    #[serde(default)]
    cleared: bool,
}

impl CompanionContext {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            ..Default::default()
        }
    }

    pub fn with_companion_name(mut self, name: impl Into<String>) -> Self {
        self.companion_name = name.into();
        self
    }

    pub fn with_user_name(mut self, name: impl Into<String>) -> Self {
        self.user_name = name.into();
        self
    }

    pub fn with_background_image(mut self, url: impl Into<String>) -> Self {
        self.background_image = Some(url.into());
        self
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn companion_name(&self) -> &str {
        &self.companion_name
    }

    pub fn user_name(&self) -> &str {
        &self.user_name
    }

    pub fn background_image(&self) -> Option<&str> {
        self.background_image.as_deref()
    }

    pub(crate) fn set_companion_name(&mut self, name: &str) {
        self.companion_name = name.to_string();
    }

    pub(crate) fn set_user_name(&mut self, name: &str) {
        self.user_name = name.to_string();
    }

    /// Forget everything. A cleared context no longer names a session.
    pub fn clear(&mut self) {
        *self = Self {
            cleared: true,
            ..Self::default()
        };
    }

    /// True only after [`CompanionContext::clear`]. Session ids are opaque, so
    /// an empty one still names a session.
    pub fn is_cleared(&self) -> bool {
        self.cleared
    }
}
