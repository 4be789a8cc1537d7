//! Streaming Session Controller
//!
//! Owns one session: its context, its current channel, the transcript reducer
//! and the input buffer. Every trigger (channel event, user submission, timer)
//! is handled by a single synchronous call that runs to completion, so the
//! transcript needs no locking and events land in wire order.

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::channel::{ChannelEvent, ChannelHandle, ChannelState, Connector};
use crate::composer::{InputBuffer, compose};
use crate::config::SessionConfig;
use crate::context::CompanionContext;
use crate::error::SubmitRejected;
use crate::protocol::decode;
use crate::transcript::{Applied, DisplayState, Message, MessageId, Transcript};

/// Everything a view needs to render the session.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub session_id: String,
    pub messages: Vec<Message>,
    pub display: DisplayState,
    pub channel: ChannelState,
    pub input: String,
    /// A reply is mid-stream but the channel is down
    pub stream_stalled: bool,
}

pub struct SessionController {
    context: CompanionContext,
    config: SessionConfig,
    transcript: Transcript,
    input: InputBuffer,
    channel: Option<ChannelHandle>,
}

impl SessionController {
    pub fn new(context: CompanionContext, config: SessionConfig) -> Self {
        let transcript = Transcript::new(
            context.companion_name(),
            context.user_name(),
            config.naming_animation,
        );
        Self {
            context,
            config,
            transcript,
            input: InputBuffer::new(),
            channel: None,
        }
    }

    pub fn session_id(&self) -> &str {
        self.context.session_id()
    }

    /// Open a fresh channel for this session. Any existing channel is torn
    /// down first; the transcript is kept.
    pub fn connect(&mut self, connector: &dyn Connector) {
        if self.context.is_cleared() {
            warn!("Refusing to connect a session that has ended");
            return;
        }
        self.disconnect();
        info!(session_id = %self.context.session_id(), "Connecting session");
        self.channel = Some(connector.connect(self.context.session_id()));
    }

    /// Close the current channel, if any. Synchronous: nothing from the old
    /// channel is applied after this returns. An in-progress stream stays
    /// streaming.
    pub fn disconnect(&mut self) {
        if let Some(mut channel) = self.channel.take() {
            debug!(session_id = %channel.session_id(), "Closing session channel");
            channel.close();
        }
        self.transcript.set_connected(false);
    }

    /// End the session: close the channel, stop timers, clear the context.
    pub fn end(&mut self) {
        self.disconnect();
        self.transcript.end_session();
        self.context.clear();
        info!("Session ended");
    }

    /// Wait for the next channel event. Never resolves while there is no
    /// live channel.
    pub async fn next_event(&mut self) -> ChannelEvent {
        match self.channel.as_mut() {
            Some(channel) => channel.recv().await,
            None => std::future::pending().await,
        }
    }

    /// Apply every channel event that is already queued. Returns true if the
    /// visible state changed.
    pub fn pump(&mut self, now: Instant) -> bool {
        let mut changed = false;
        while let Some(event) = self.channel.as_mut().and_then(ChannelHandle::try_recv) {
            changed |= self.handle_channel_event(event, now);
        }
        changed
    }

    /// Apply one channel event. Returns true if the visible state changed.
    pub fn handle_channel_event(&mut self, event: ChannelEvent, now: Instant) -> bool {
        match event {
            ChannelEvent::Opened => {
                info!(session_id = %self.context.session_id(), "Session connected");
                self.transcript.set_connected(true);
                // channel state moved even if the flag did not
                true
            }
            ChannelEvent::Closed { reason } => {
                info!(session_id = %self.context.session_id(), ?reason, "Session disconnected");
                self.transcript.set_connected(false);
                true
            }
            ChannelEvent::Frame(raw) => {
                let Some(event) = decode(&raw) else {
                    return false;
                };
                let applied = self.transcript.apply(event, now);
                match applied {
                    Applied::CompanionRenamed => {
                        let name = self.transcript.display().companion_display_name.clone();
                        info!(%name, "Companion renamed");
                        self.context.set_companion_name(&name);
                    }
                    Applied::UserRenamed => {
                        let name = self.transcript.display().user_display_name.clone();
                        info!(%name, "User name set");
                        self.context.set_user_name(&name);
                    }
                    _ => {}
                }
                applied.changed()
            }
        }
    }

    /// Submit user text. Rejected without side effects when the trimmed text
    /// is empty or no channel is open.
    pub fn submit(&mut self, raw: &str) -> Result<MessageId, SubmitRejected> {
        let frame = compose(raw, &self.transcript.display().user_display_name)?;
        let Some(channel) = self.channel.as_ref().filter(|c| c.is_open()) else {
            return Err(SubmitRejected::NotConnected);
        };
        let encoded = frame.to_frame()?;

        let id = self.transcript.push_user(frame.message);
        if !channel.send(encoded) {
            warn!(%id, "Session transport went away while sending");
            self.transcript.set_connected(false);
        }
        debug!(%id, "Submitted user message");
        Ok(id)
    }

    pub fn set_input(&mut self, text: impl Into<String>) {
        self.input.set(text);
    }

    pub fn input(&self) -> &str {
        self.input.as_str()
    }

    /// Submit the input buffer, clearing it only if accepted.
    pub fn submit_input(&mut self) -> Result<MessageId, SubmitRejected> {
        let raw = self.input.as_str().to_string();
        let id = self.submit(&raw)?;
        self.input.clear();
        Ok(id)
    }

    /// Whether the send affordance should be enabled.
    pub fn can_send(&self) -> bool {
        self.input.has_content() && self.channel.as_ref().is_some_and(ChannelHandle::is_open)
    }

    /// Run timed transitions due at `now`. Returns true if anything changed.
    pub fn tick(&mut self, now: Instant) -> bool {
        self.transcript.tick(now, self.config.stall_timeout)
    }

    /// When [`SessionController::tick`] next has work to do.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.transcript.next_deadline(self.config.stall_timeout)
    }

    pub fn channel_state(&self) -> ChannelState {
        self.channel
            .as_ref()
            .map_or(ChannelState::Closed, ChannelHandle::state)
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn display(&self) -> &DisplayState {
        self.transcript.display()
    }

    pub fn context(&self) -> &CompanionContext {
        &self.context
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            session_id: self.context.session_id().to_string(),
            messages: self.transcript.messages().to_vec(),
            display: self.transcript.display().clone(),
            channel: self.channel_state(),
            input: self.input.as_str().to_string(),
            stream_stalled: self.transcript.stream_stalled(),
        }
    }
}
