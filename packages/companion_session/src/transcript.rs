//! Transcript Reducer
//!
//! Folds decoded [`InboundEvent`]s into an append-only list of [`Message`]s
//! plus the auxiliary display state (connectivity, names, naming animation).
//!
//! ## Streaming rules
//!
//! - At most one message is streaming at any time; its id is the active stream.
//! - `stream` appends to the active message, or opens one if none is active.
//! - `end` finalizes the active message. With no active message, a full-text
//!   `end` becomes a standalone finalized reply so dropped chunks never lose it.
//! - Finalized messages are never touched again.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use crate::protocol::InboundEvent;

/// Unique, creation-ordered message identifier
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub struct MessageId(pub u64);

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "msg-{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Sender {
    #[serde(rename = "USER")]
    User,
    #[serde(rename = "AI")]
    Ai,
}

/// A transcript entry. Mutation goes through [`Transcript`] only.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    id: MessageId,
    sender: Sender,
    text: String,
    streaming: bool,
    intent: Option<String>,
    emotion_color: Option<String>,
    /// Finalized by the stall policy rather than by an `end` event
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    stalled: bool,
    created_at: DateTime<Utc>,
}

impl Message {
    fn finalized(
        id: MessageId,
        sender: Sender,
        text: String,
        intent: Option<String>,
        emotion_color: Option<String>,
    ) -> Self {
        Self {
            id,
            sender,
            text,
            streaming: false,
            intent,
            emotion_color,
            stalled: false,
            created_at: Utc::now(),
        }
    }

    pub fn id(&self) -> MessageId {
        self.id
    }

    pub fn sender(&self) -> Sender {
        self.sender
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming
    }

    pub fn intent(&self) -> Option<&str> {
        self.intent.as_deref()
    }

    pub fn emotion_color(&self) -> Option<&str> {
        self.emotion_color.as_deref()
    }

    pub fn is_stalled(&self) -> bool {
        self.stalled
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

/// Display state derived from the event stream.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayState {
    pub connected: bool,
    pub companion_display_name: String,
    pub user_display_name: String,
    pub naming_animation_active: bool,
}

/// What a single reducer step did to the transcript.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Applied {
    /// A new message was appended (streaming or already final)
    Appended(MessageId),
    /// A token was appended to the active streaming message
    Extended(MessageId),
    /// The active streaming message was finalized
    Finalized(MessageId),
    CompanionRenamed,
    UserRenamed,
    /// Nothing changed
    Ignored,
}

impl Applied {
    pub fn changed(&self) -> bool {
        !matches!(self, Applied::Ignored)
    }
}

/// The per-session protocol state machine.
pub struct Transcript {
    messages: Vec<Message>,
    active_stream: Option<MessageId>,
    next_id: u64,
    display: DisplayState,
    naming_window: Duration,
    naming_until: Option<Instant>,
    /// Arrival time of the latest token on the active stream
    last_token_at: Option<Instant>,
}

impl Transcript {
    pub fn new(
        companion_display_name: impl Into<String>,
        user_display_name: impl Into<String>,
        naming_window: Duration,
    ) -> Self {
        Self {
            messages: Vec::new(),
            active_stream: None,
            next_id: 1,
            display: DisplayState {
                connected: false,
                companion_display_name: companion_display_name.into(),
                user_display_name: user_display_name.into(),
                naming_animation_active: false,
            },
            naming_window,
            naming_until: None,
            last_token_at: None,
        }
    }

    fn allocate_id(&mut self) -> MessageId {
        let id = MessageId(self.next_id);
        self.next_id += 1;
        id
    }

    fn position(&self, id: MessageId) -> Option<usize> {
        // Ids are assigned in append order, so the list is sorted by id.
        self.messages.binary_search_by_key(&id, |m| m.id).ok()
    }

    /// Apply one inbound event. Runs to completion; events are applied in the
    /// order this is called.
    pub fn apply(&mut self, event: InboundEvent, now: Instant) -> Applied {
        let kind = event.kind();
        let applied = match event {
            InboundEvent::Stream { content } => self.apply_stream(content, now),
            InboundEvent::End {
                content,
                intent,
                emotion_color,
            } => self.apply_end(content, intent, emotion_color),
            InboundEvent::Greeting { content, intent } => {
                self.append_reply(content, intent.or_else(|| Some("greeting".to_string())))
            }
            InboundEvent::NamingPrompt { content, intent } => {
                self.append_reply(content, intent.or_else(|| Some("naming_prompt".to_string())))
            }
            InboundEvent::Announcement { content, intent } => {
                self.append_reply(content, intent.or_else(|| Some("announcement".to_string())))
            }
            InboundEvent::NameReveal { content } => {
                self.display.companion_display_name = content;
                self.display.naming_animation_active = true;
                self.naming_until = Some(now + self.naming_window);
                Applied::CompanionRenamed
            }
            InboundEvent::UserNameSet { content } => {
                self.display.user_display_name = content;
                Applied::UserRenamed
            }
        };
        debug!(kind, ?applied, "Applied inbound event");
        applied
    }

    fn apply_stream(&mut self, token: String, now: Instant) -> Applied {
        if let Some(active) = self.active_stream {
            return match self.position(active) {
                Some(idx) => {
                    self.messages[idx].text.push_str(&token);
                    self.last_token_at = Some(now);
                    Applied::Extended(active)
                }
                None => {
                    debug!(%active, "Active stream points at a missing message");
                    Applied::Ignored
                }
            };
        }

        let id = self.allocate_id();
        let mut message = Message::finalized(id, Sender::Ai, token, None, None);
        message.streaming = true;
        self.messages.push(message);
        self.active_stream = Some(id);
        self.last_token_at = Some(now);
        Applied::Appended(id)
    }

    fn apply_end(
        &mut self,
        content: Option<String>,
        intent: Option<String>,
        emotion_color: Option<String>,
    ) -> Applied {
        match self.active_stream.take() {
            Some(active) => {
                self.last_token_at = None;
                let Some(idx) = self.position(active) else {
                    debug!(%active, "End for a missing stream message");
                    return Applied::Ignored;
                };
                let message = &mut self.messages[idx];
                message.streaming = false;
                message.intent = intent;
                message.emotion_color = emotion_color;
                if let Some(full) = content.filter(|c| !c.is_empty()) {
                    message.text = full;
                }
                Applied::Finalized(active)
            }
            None => match content.filter(|c| !c.is_empty()) {
                Some(full) => {
                    let id = self.allocate_id();
                    self.messages.push(Message::finalized(
                        id,
                        Sender::Ai,
                        full,
                        intent,
                        emotion_color,
                    ));
                    Applied::Appended(id)
                }
                None => Applied::Ignored,
            },
        }
    }

    fn append_reply(&mut self, text: String, intent: Option<String>) -> Applied {
        // Like a text-less `end`, a standalone reply without text has nothing to show
        if text.is_empty() {
            return Applied::Ignored;
        }
        let id = self.allocate_id();
        self.messages
            .push(Message::finalized(id, Sender::Ai, text, intent, None));
        Applied::Appended(id)
    }

    /// Append a finalized user message.
    pub fn push_user(&mut self, text: impl Into<String>) -> MessageId {
        let id = self.allocate_id();
        self.messages
            .push(Message::finalized(id, Sender::User, text.into(), None, None));
        id
    }

    /// Record a channel open/close. Returns true if the flag changed.
    /// Closing never finalizes the active stream.
    pub fn set_connected(&mut self, connected: bool) -> bool {
        let changed = self.display.connected != connected;
        self.display.connected = connected;
        changed
    }

    /// Expire timed state: the naming animation window and, when a stall
    /// timeout is configured, an active stream that stopped receiving tokens.
    /// Returns true if anything changed.
    pub fn tick(&mut self, now: Instant, stall_timeout: Option<Duration>) -> bool {
        let mut changed = false;

        if self.naming_until.is_some_and(|until| now >= until) {
            self.naming_until = None;
            self.display.naming_animation_active = false;
            changed = true;
        }

        if let (Some(timeout), Some(last)) = (stall_timeout, self.last_token_at) {
            if now.duration_since(last) >= timeout {
                if let Some(active) = self.active_stream.take() {
                    if let Some(idx) = self.position(active) {
                        debug!(%active, "Finalizing stalled stream");
                        let message = &mut self.messages[idx];
                        message.streaming = false;
                        message.stalled = true;
                    }
                }
                self.last_token_at = None;
                changed = true;
            }
        }

        changed
    }

    /// Earliest instant at which [`Transcript::tick`] has work to do.
    pub fn next_deadline(&self, stall_timeout: Option<Duration>) -> Option<Instant> {
        let stall = stall_timeout.zip(self.last_token_at).map(|(t, last)| last + t);
        match (self.naming_until, stall) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Stop timed display state at session end. Messages are left as they are.
    pub fn end_session(&mut self) {
        self.naming_until = None;
        self.last_token_at = None;
        self.display.naming_animation_active = false;
        self.display.connected = false;
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn get(&self, id: MessageId) -> Option<&Message> {
        self.position(id).map(|idx| &self.messages[idx])
    }

    pub fn active_stream(&self) -> Option<MessageId> {
        self.active_stream
    }

    pub fn display(&self) -> &DisplayState {
        &self.display
    }

    /// True while a reply is mid-stream but the channel is down.
    pub fn stream_stalled(&self) -> bool {
        self.active_stream.is_some() && !self.display.connected
    }
}
