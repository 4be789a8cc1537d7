use tokio_tungstenite::tungstenite;

/// Errors surfaced at the session boundary.
///
/// None of these are fatal to the process: transport failures only flip the
/// connectivity flag, and a rejected submission leaves the transcript untouched.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("companion server is unavailable")]
    Unavailable,

    /// The server answered the upgrade request with a plain HTTP status,
    /// typically 403/404 for a companion id it does not know.
    #[error("companion server refused the session (HTTP {status})")]
    Handshake { status: u16 },

    #[error("invalid session endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("session actor is gone")]
    ActorGone,

    #[error(transparent)]
    Rejected(#[from] SubmitRejected),
}

impl SessionError {
    /// Classify a websocket failure from opening or driving a session channel.
    pub fn from_tungstenite(err: tungstenite::Error) -> Self {
        match &err {
            tungstenite::Error::Io(io_err)
                if matches!(
                    io_err.kind(),
                    std::io::ErrorKind::ConnectionRefused
                        | std::io::ErrorKind::ConnectionReset
                        | std::io::ErrorKind::ConnectionAborted
                ) =>
            {
                Self::Unavailable
            }
            tungstenite::Error::Http(response) => Self::Handshake {
                status: response.status().as_u16(),
            },
            tungstenite::Error::Url(url_err) => Self::InvalidEndpoint(url_err.to_string()),
            _ => Self::Transport(err.to_string()),
        }
    }
}

/// Why an outbound submission was refused.
#[derive(Debug, thiserror::Error)]
pub enum SubmitRejected {
    #[error("message is empty")]
    Empty,

    #[error("no open channel")]
    NotConnected,

    #[error("failed to encode outbound frame: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Why an in-memory peer could not hand an event to its controller.
#[derive(Debug, thiserror::Error)]
pub enum PushError {
    #[error("event queue is full")]
    Full,

    #[error("controller side has closed the channel")]
    Closed,

    #[error("failed to encode inbound event: {0}")]
    Encode(#[from] serde_json::Error),
}
