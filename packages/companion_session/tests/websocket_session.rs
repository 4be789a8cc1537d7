//! End-to-end session tests against a real websocket server on localhost.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::Message as WsMessage;

use companion_session::{
    ChannelState, CompanionContext, Endpoint, Sender, SessionConfig, SessionController,
    SessionSnapshot, WsConnector, spawn_session,
};

const WAIT: Duration = Duration::from_secs(5);

async fn wait_for(
    updates: &mut watch::Receiver<SessionSnapshot>,
    what: &str,
    pred: impl Fn(&SessionSnapshot) -> bool,
) -> SessionSnapshot {
    let result = tokio::time::timeout(WAIT, async {
        loop {
            {
                let snapshot = updates.borrow_and_update();
                if pred(&snapshot) {
                    return snapshot.clone();
                }
            }
            updates.changed().await.expect("session actor stopped");
        }
    })
    .await;
    match result {
        Ok(snapshot) => snapshot,
        Err(_) => panic!("timed out waiting for {}: {:?}", what, updates.borrow()),
    }
}

async fn bind() -> (TcpListener, Endpoint) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    (listener, Endpoint::new(format!("ws://{}", addr)))
}

fn frame(value: serde_json::Value) -> WsMessage {
    WsMessage::Text(value.to_string().into())
}

fn controller(session_id: &str) -> SessionController {
    let context = CompanionContext::new(session_id)
        .with_companion_name("???")
        .with_user_name("Sam");
    SessionController::new(context, SessionConfig::default())
}

#[tokio::test]
async fn test_greeting_then_streamed_reply() {
    let (listener, endpoint) = bind().await;

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();

        ws.send(frame(json!({"type": "greeting", "content": "Hello there!"})))
            .await
            .unwrap();

        let outbound = loop {
            match ws.next().await {
                Some(Ok(WsMessage::Text(text))) => break text.as_str().to_owned(),
                Some(Ok(_)) => continue,
                other => panic!("expected a user frame, got {:?}", other),
            }
        };

        ws.send(frame(json!({"type": "stream", "content": "Hi "})))
            .await
            .unwrap();
        ws.send(frame(json!({"type": "stream", "content": "Sam"})))
            .await
            .unwrap();
        ws.send(frame(
            json!({"type": "end", "content": "Hi Sam!", "intent": "chat", "emotion_color": "#ffcc00"}),
        ))
        .await
        .unwrap();

        // Hold the socket until the client goes away
        while let Some(Ok(_)) = ws.next().await {}
        outbound
    });

    let (handle, task) = spawn_session(controller("s-e2e"), WsConnector::new(endpoint, 64));
    let mut updates = handle.subscribe();

    let snapshot = wait_for(&mut updates, "greeting", |s| s.messages.len() == 1).await;
    assert!(snapshot.display.connected);
    assert_eq!(snapshot.messages[0].text(), "Hello there!");
    assert_eq!(snapshot.messages[0].intent(), Some("greeting"));
    assert!(!snapshot.messages[0].is_streaming());

    handle.submit("  how are you?  ").await.unwrap();

    let snapshot = wait_for(&mut updates, "finished reply", |s| {
        s.messages.len() == 3 && !s.messages[2].is_streaming()
    })
    .await;
    assert_eq!(snapshot.messages[1].sender(), Sender::User);
    assert_eq!(snapshot.messages[1].text(), "how are you?");
    let reply = &snapshot.messages[2];
    assert_eq!(reply.sender(), Sender::Ai);
    assert_eq!(reply.text(), "Hi Sam!");
    assert_eq!(reply.intent(), Some("chat"));
    assert_eq!(reply.emotion_color(), Some("#ffcc00"));

    handle.end().await.unwrap();
    let controller = task.await.unwrap();
    assert!(controller.context().is_cleared());

    let outbound: serde_json::Value = serde_json::from_str(&server.await.unwrap()).unwrap();
    assert_eq!(outbound, json!({"message": "how are you?", "user_name": "Sam"}));
}

#[tokio::test]
async fn test_server_close_mid_stream_keeps_partial_reply() {
    let (listener, endpoint) = bind().await;

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        ws.send(frame(json!({"type": "stream", "content": "Let me th"})))
            .await
            .unwrap();
        ws.close(None).await.unwrap();
    });

    let (handle, _task) = spawn_session(controller("s-drop"), WsConnector::new(endpoint, 64));
    let mut updates = handle.subscribe();

    wait_for(&mut updates, "partial token", |s| s.messages.len() == 1).await;
    let snapshot = wait_for(&mut updates, "disconnect", |s| !s.display.connected).await;
    assert_eq!(snapshot.messages.len(), 1);
    assert_eq!(snapshot.messages[0].text(), "Let me th");
    assert!(snapshot.messages[0].is_streaming());
    assert!(snapshot.stream_stalled);

    server.await.unwrap();
}

#[tokio::test]
async fn test_error_frame_is_not_rendered() {
    let (listener, endpoint) = bind().await;

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        ws.send(frame(json!({"error": "Companion not found"})))
            .await
            .unwrap();
        ws.send(frame(json!({"type": "announcement", "content": "still here"})))
            .await
            .unwrap();
        while let Some(Ok(_)) = ws.next().await {}
    });

    let (handle, task) = spawn_session(controller("s-err"), WsConnector::new(endpoint, 64));
    let mut updates = handle.subscribe();

    let snapshot = wait_for(&mut updates, "announcement", |s| !s.messages.is_empty()).await;
    assert_eq!(snapshot.messages.len(), 1);
    assert_eq!(snapshot.messages[0].text(), "still here");

    handle.end().await.unwrap();
    task.await.unwrap();
    server.await.unwrap();
}

#[tokio::test]
async fn test_unreachable_backend_rejects_submit() {
    // Grab a free port, then release it so nothing is listening
    let (listener, endpoint) = bind().await;
    drop(listener);

    let (handle, task) = spawn_session(controller("s-down"), WsConnector::new(endpoint, 8));
    let mut updates = handle.subscribe();
    assert_eq!(updates.borrow().channel, ChannelState::Connecting);

    let snapshot = wait_for(&mut updates, "closed channel", |s| {
        s.channel == ChannelState::Closed
    })
    .await;
    assert!(!snapshot.display.connected);
    assert!(snapshot.messages.is_empty());

    let err = handle.submit("anyone?").await.unwrap_err();
    assert!(matches!(
        err,
        companion_session::SessionError::Rejected(companion_session::SubmitRejected::NotConnected)
    ));

    handle.end().await.unwrap();
    task.await.unwrap();
}
