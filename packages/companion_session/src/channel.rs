//! Session Channel Adapter
//!
//! A [`ChannelHandle`] is the controller's view of one bidirectional transport
//! bound to a session. The transport itself runs elsewhere (a websocket task,
//! or an in-memory peer) and reports lifecycle changes as [`ChannelEvent`]s:
//!
//! ```text
//! connect() ──► Connecting ──Opened──► Open ──Closed──► Closed
//!                    └────────────Closed─────────────────┘
//! ```
//!
//! Closing is final. Reconnecting means building a new handle.

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{PushError, SessionError};
use crate::protocol::{InboundEvent, OutboundFrame};

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelState {
    Connecting,
    Open,
    Closed,
}

/// Lifecycle and data events reported by a transport.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChannelEvent {
    Opened,
    /// One raw inbound text frame
    Frame(String),
    /// The channel is gone, from either end or through a network failure
    Closed { reason: Option<String> },
}

/// Controller-side end of a session channel.
pub struct ChannelHandle {
    session_id: String,
    state: ChannelState,
    outbound: mpsc::UnboundedSender<String>,
    events: mpsc::Receiver<ChannelEvent>,
    cancel: CancellationToken,
}

impl ChannelHandle {
    pub fn new(
        session_id: impl Into<String>,
        outbound: mpsc::UnboundedSender<String>,
        events: mpsc::Receiver<ChannelEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            state: ChannelState::Connecting,
            outbound,
            events,
            cancel,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == ChannelState::Open && !self.outbound.is_closed()
    }

    /// Queue one text frame for the transport. Returns false if the transport
    /// has already gone away.
    pub fn send(&self, frame: String) -> bool {
        self.outbound.send(frame).is_ok()
    }

    /// Wait for the next event. Once the channel is closed this never
    /// resolves, so it can sit in a `select!` without spinning.
    pub async fn recv(&mut self) -> ChannelEvent {
        if self.state == ChannelState::Closed {
            return std::future::pending().await;
        }
        let event = match self.events.recv().await {
            Some(event) => event,
            None => ChannelEvent::Closed {
                reason: Some("transport ended".to_string()),
            },
        };
        self.observe(&event);
        event
    }

    /// Non-blocking variant of [`ChannelHandle::recv`].
    pub fn try_recv(&mut self) -> Option<ChannelEvent> {
        if self.state == ChannelState::Closed {
            return None;
        }
        let event = match self.events.try_recv() {
            Ok(event) => event,
            Err(mpsc::error::TryRecvError::Empty) => return None,
            Err(mpsc::error::TryRecvError::Disconnected) => ChannelEvent::Closed {
                reason: Some("transport ended".to_string()),
            },
        };
        self.observe(&event);
        Some(event)
    }

    fn observe(&mut self, event: &ChannelEvent) {
        match event {
            ChannelEvent::Opened => self.state = ChannelState::Open,
            ChannelEvent::Closed { .. } => self.state = ChannelState::Closed,
            ChannelEvent::Frame(_) => {}
        }
    }

    /// Tear the channel down. No event is delivered through this handle
    /// after this returns.
    pub fn close(&mut self) {
        self.cancel.cancel();
        self.events.close();
        self.state = ChannelState::Closed;
    }
}

impl Drop for ChannelHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Turns a session identifier into a live channel.
pub trait Connector: Send + Sync {
    /// Start connecting. Returns immediately in the `Connecting` state;
    /// the outcome arrives as an `Opened` or `Closed` event.
    fn connect(&self, session_id: &str) -> ChannelHandle;
}

/// Websocket address layout: `{base_url}/ws/{session_id}`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Endpoint {
    base_url: String,
}

impl Endpoint {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn for_session(&self, session_id: &str) -> String {
        format!("{}/ws/{}", self.base_url.trim_end_matches('/'), session_id)
    }
}

/// Connector backed by tokio-tungstenite. Must be used inside a tokio runtime.
#[derive(Clone, Debug)]
pub struct WsConnector {
    endpoint: Endpoint,
    event_buffer: usize,
}

impl WsConnector {
    pub fn new(endpoint: Endpoint, event_buffer: usize) -> Self {
        Self {
            endpoint,
            event_buffer: event_buffer.max(1),
        }
    }
}

impl Connector for WsConnector {
    fn connect(&self, session_id: &str) -> ChannelHandle {
        let (event_tx, event_rx) = mpsc::channel(self.event_buffer);
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let url = self.endpoint.for_session(session_id);

        tokio::spawn(run_ws_channel(url, event_tx, outbound_rx, cancel.clone()));

        ChannelHandle::new(session_id, outbound_tx, event_rx, cancel)
    }
}

/// Drive one websocket connection until either side closes or the handle is
/// torn down. Always ends by reporting `Closed` (ignored if nobody listens).
async fn run_ws_channel(
    url: String,
    event_tx: mpsc::Sender<ChannelEvent>,
    mut outbound_rx: mpsc::UnboundedReceiver<String>,
    cancel: CancellationToken,
) {
    debug!(%url, "Connecting session channel");
    let connected = tokio::select! {
        _ = cancel.cancelled() => return,
        result = tokio_tungstenite::connect_async(url.as_str()) => result,
    };

    let ws_stream = match connected {
        Ok((ws_stream, _)) => ws_stream,
        Err(err) => {
            let err = SessionError::from_tungstenite(err);
            warn!(%url, error = %err, "Session channel failed to open");
            let _ = event_tx
                .send(ChannelEvent::Closed {
                    reason: Some(err.to_string()),
                })
                .await;
            return;
        }
    };

    info!(%url, "Session channel open");
    if event_tx.send(ChannelEvent::Opened).await.is_err() {
        return;
    }

    let (mut ws_write, mut ws_read) = ws_stream.split();
    let reason = loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = ws_write.send(tungstenite::Message::Close(None)).await;
                break None;
            }

            Some(frame) = outbound_rx.recv() => {
                if let Err(err) = ws_write.send(tungstenite::Message::Text(frame.into())).await {
                    break Some(SessionError::from_tungstenite(err).to_string());
                }
            }

            msg = ws_read.next() => {
                match msg {
                    Some(Ok(tungstenite::Message::Text(text))) => {
                        let event = ChannelEvent::Frame(text.as_str().to_owned());
                        if event_tx.send(event).await.is_err() {
                            break None;
                        }
                    }
                    Some(Ok(tungstenite::Message::Close(frame))) => {
                        break frame.map(|f| f.reason.as_str().to_owned());
                    }
                    Some(Ok(tungstenite::Message::Binary(_))) => {
                        debug!("Ignoring binary frame on session channel");
                    }
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        break Some(SessionError::from_tungstenite(err).to_string());
                    }
                    None => break None,
                }
            }
        }
    };

    info!(%url, ?reason, "Session channel closed");
    let _ = event_tx.send(ChannelEvent::Closed { reason }).await;
}

/// Connector with an in-process peer, for embedding and tests. Every
/// `connect` hands the peer side out through the receiver returned by
/// [`MemoryConnector::new`].
pub struct MemoryConnector {
    event_buffer: usize,
    remotes: mpsc::UnboundedSender<MemoryRemote>,
}

impl MemoryConnector {
    pub fn new(event_buffer: usize) -> (Self, mpsc::UnboundedReceiver<MemoryRemote>) {
        let (remotes, remote_rx) = mpsc::unbounded_channel();
        (
            Self {
                event_buffer: event_buffer.max(1),
                remotes,
            },
            remote_rx,
        )
    }
}

impl Connector for MemoryConnector {
    fn connect(&self, session_id: &str) -> ChannelHandle {
        let (event_tx, event_rx) = mpsc::channel(self.event_buffer);
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let remote = MemoryRemote {
            session_id: session_id.to_string(),
            events: event_tx,
            outbound: outbound_rx,
            cancel: cancel.clone(),
        };
        if self.remotes.send(remote).is_err() {
            debug!(session_id, "No one is listening for memory channels");
        }

        ChannelHandle::new(session_id, outbound_tx, event_rx, cancel)
    }
}

/// Peer side of an in-memory channel: plays the backend.
pub struct MemoryRemote {
    session_id: String,
    events: mpsc::Sender<ChannelEvent>,
    outbound: mpsc::UnboundedReceiver<String>,
    cancel: CancellationToken,
}

impl MemoryRemote {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Queue an event without waiting. Fails with [`PushError::Full`] when
    /// the controller has not drained the buffer yet, and with
    /// [`PushError::Closed`] once the controller side has gone away.
    pub fn push(&self, event: ChannelEvent) -> Result<(), PushError> {
        self.events.try_send(event).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => PushError::Full,
            mpsc::error::TrySendError::Closed(_) => PushError::Closed,
        })
    }

    /// Queue an event, waiting for buffer space like the websocket task does.
    pub async fn deliver(&self, event: ChannelEvent) -> Result<(), PushError> {
        self.events
            .send(event)
            .await
            .map_err(|_| PushError::Closed)
    }

    pub fn open(&self) -> Result<(), PushError> {
        self.push(ChannelEvent::Opened)
    }

    pub fn send_event(&self, event: &InboundEvent) -> Result<(), PushError> {
        self.push(ChannelEvent::Frame(event.to_frame()?))
    }

    pub fn send_raw(&self, raw: impl Into<String>) -> Result<(), PushError> {
        self.push(ChannelEvent::Frame(raw.into()))
    }

    pub fn close(&self, reason: Option<&str>) -> Result<(), PushError> {
        self.push(ChannelEvent::Closed {
            reason: reason.map(str::to_string),
        })
    }

    /// Next frame the controller sent, if any is queued.
    pub fn try_recv_frame(&mut self) -> Option<OutboundFrame> {
        let raw = self.outbound.try_recv().ok()?;
        serde_json::from_str(&raw).ok()
    }

    pub async fn recv_frame(&mut self) -> Option<OutboundFrame> {
        let raw = self.outbound.recv().await?;
        serde_json::from_str(&raw).ok()
    }

    /// True once the controller tore the channel down.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}
