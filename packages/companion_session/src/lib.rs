//! Companion Session - streaming session controller for AI companion chat
//!
//! Owns the lifecycle of one companion conversation: opens a channel for a
//! session id, decodes the backend's event stream into a typed
//! [`InboundEvent`], folds events into an append-only [`Transcript`], and
//! validates outbound user messages before they are sent.
//!
//! Everything that mutates the transcript runs through one synchronous
//! reducer call per trigger, so the visible order always matches wire order
//! and at most one reply is streaming at a time.
//!
//! # Example
//!
//! ```no_run
//! use companion_session::{
//!     CompanionContext, Endpoint, SessionConfig, SessionController, WsConnector, spawn_session,
//! };
//!
//! #[tokio::main]
//! async fn main() {
//!     let context = CompanionContext::new("3f2a9c1e").with_companion_name("???");
//!     let controller = SessionController::new(context, SessionConfig::default());
//!     let connector = WsConnector::new(Endpoint::new("ws://localhost:8000/api/v1"), 256);
//!
//!     let (handle, _task) = spawn_session(controller, connector);
//!     let mut updates = handle.subscribe();
//!
//!     handle.submit("hi!").await.ok();
//!     while updates.changed().await.is_ok() {
//!         let snapshot = updates.borrow().clone();
//!         if let Some(last) = snapshot.messages.last() {
//!             println!("{:?}: {}", last.sender(), last.text());
//!         }
//!     }
//! }
//! ```

mod actor;
pub mod channel;
mod composer;
pub mod config;
mod context;
mod controller;
mod error;
pub mod protocol;
pub mod transcript;

pub use actor::{SessionCommand, SessionHandle, spawn_session};
pub use channel::{
    ChannelEvent, ChannelHandle, ChannelState, Connector, Endpoint, MemoryConnector, MemoryRemote,
    WsConnector,
};
pub use composer::{InputBuffer, compose};
pub use config::SessionConfig;
pub use context::CompanionContext;
pub use controller::{SessionController, SessionSnapshot};
pub use error::{PushError, SessionError, SubmitRejected};
pub use protocol::{InboundEvent, OutboundFrame, decode};
pub use transcript::{Applied, DisplayState, Message, MessageId, Sender, Transcript};
