use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tracing::debug;

use crate::channel::{ChannelEvent, Connector};
use crate::controller::{SessionController, SessionSnapshot};
use crate::error::{SessionError, SubmitRejected};
use crate::transcript::MessageId;

/// Commands that can be sent to a session actor
#[derive(Debug)]
pub enum SessionCommand {
    Submit {
        text: String,
        respond_to: oneshot::Sender<Result<MessageId, SubmitRejected>>,
    },
    SetInput {
        text: String,
    },
    SubmitInput {
        respond_to: oneshot::Sender<Result<MessageId, SubmitRejected>>,
    },
    Reconnect {
        respond_to: oneshot::Sender<()>,
    },
    Disconnect {
        respond_to: oneshot::Sender<()>,
    },
    End {
        respond_to: oneshot::Sender<()>,
    },
}

/// Handle to communicate with a session actor
#[derive(Clone)]
pub struct SessionHandle {
    sender: mpsc::Sender<SessionCommand>,
    snapshots: watch::Receiver<SessionSnapshot>,
}

impl SessionHandle {
    pub async fn submit(&self, text: impl Into<String>) -> Result<MessageId, SessionError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(SessionCommand::Submit {
                text: text.into(),
                respond_to: tx,
            })
            .await
            .map_err(|_| SessionError::ActorGone)?;
        Ok(rx.await.map_err(|_| SessionError::ActorGone)??)
    }

    pub async fn set_input(&self, text: impl Into<String>) -> Result<(), SessionError> {
        self.sender
            .send(SessionCommand::SetInput { text: text.into() })
            .await
            .map_err(|_| SessionError::ActorGone)
    }

    pub async fn submit_input(&self) -> Result<MessageId, SessionError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(SessionCommand::SubmitInput { respond_to: tx })
            .await
            .map_err(|_| SessionError::ActorGone)?;
        Ok(rx.await.map_err(|_| SessionError::ActorGone)??)
    }

    /// Tear down the channel and open a new one. The transcript is kept.
    pub async fn reconnect(&self) -> Result<(), SessionError> {
        self.request(|respond_to| SessionCommand::Reconnect { respond_to })
            .await
    }

    /// Close the channel. Once this returns no further inbound event is applied.
    pub async fn disconnect(&self) -> Result<(), SessionError> {
        self.request(|respond_to| SessionCommand::Disconnect { respond_to })
            .await
    }

    /// End the session and stop the actor.
    pub async fn end(&self) -> Result<(), SessionError> {
        self.request(|respond_to| SessionCommand::End { respond_to })
            .await
    }

    async fn request(
        &self,
        command: impl FnOnce(oneshot::Sender<()>) -> SessionCommand,
    ) -> Result<(), SessionError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(command(tx))
            .await
            .map_err(|_| SessionError::ActorGone)?;
        rx.await.map_err(|_| SessionError::ActorGone)
    }

    /// Latest published state.
    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshots.borrow().clone()
    }

    /// Receiver that is notified on every visible change.
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshots.clone()
    }
}

enum Trigger {
    Command(Option<SessionCommand>),
    Channel(ChannelEvent),
    Timer,
}

/// Spawn a task that owns `controller`, connects it through `connector`, and
/// applies channel events, commands and timers one at a time. The task
/// returns the controller when the session ends or every handle is dropped.
pub fn spawn_session<C>(
    mut controller: SessionController,
    connector: C,
) -> (SessionHandle, tokio::task::JoinHandle<SessionController>)
where
    C: Connector + 'static,
{
    let (command_tx, mut command_rx) = mpsc::channel(32);
    // Connect first so the very first snapshot already says `connecting`
    controller.connect(&connector);
    let (snapshot_tx, snapshot_rx) = watch::channel(controller.snapshot());

    let task = tokio::spawn(async move {
        loop {
            let deadline = controller.next_deadline();
            let timer = async move {
                match deadline {
                    Some(deadline) => tokio::time::sleep_until(deadline).await,
                    None => std::future::pending().await,
                }
            };

            let trigger = tokio::select! {
                command = command_rx.recv() => Trigger::Command(command),
                event = controller.next_event() => Trigger::Channel(event),
                () = timer => Trigger::Timer,
            };

            let changed = match trigger {
                Trigger::Channel(event) => controller.handle_channel_event(event, Instant::now()),
                Trigger::Timer => controller.tick(Instant::now()),
                Trigger::Command(None) => {
                    debug!("All session handles dropped");
                    controller.end();
                    break;
                }
                Trigger::Command(Some(command)) => match command {
                    SessionCommand::Submit { text, respond_to } => {
                        let result = controller.submit(&text);
                        let changed = result.is_ok();
                        let _ = respond_to.send(result);
                        changed
                    }
                    SessionCommand::SetInput { text } => {
                        controller.set_input(text);
                        true
                    }
                    SessionCommand::SubmitInput { respond_to } => {
                        let result = controller.submit_input();
                        let changed = result.is_ok();
                        let _ = respond_to.send(result);
                        changed
                    }
                    SessionCommand::Reconnect { respond_to } => {
                        controller.connect(&connector);
                        let _ = respond_to.send(());
                        true
                    }
                    SessionCommand::Disconnect { respond_to } => {
                        controller.disconnect();
                        let _ = respond_to.send(());
                        true
                    }
                    SessionCommand::End { respond_to } => {
                        controller.end();
                        snapshot_tx.send_replace(controller.snapshot());
                        let _ = respond_to.send(());
                        break;
                    }
                },
            };

            if changed {
                snapshot_tx.send_replace(controller.snapshot());
            }
        }

        controller
    });

    (
        SessionHandle {
            sender: command_tx,
            snapshots: snapshot_rx,
        },
        task,
    )
}
