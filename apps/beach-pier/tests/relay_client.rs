use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use beach_pier::config::Config;
use beach_pier::protocol::{ClientMessage, Participant, ServerMessage};
use beach_pier::relay::{RelayClient, RelayError, RelayEvent, RetentionPolicy};
use beach_pier::session::SessionError;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(2);

#[derive(Clone)]
struct RelayScript {
    frames: Arc<Vec<String>>,
    close_after_script: bool,
    inbound: mpsc::UnboundedSender<String>,
}

async fn ws_handler(ws: WebSocketUpgrade, State(script): State<RelayScript>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| serve_socket(socket, script))
}

async fn serve_socket(mut socket: WebSocket, script: RelayScript) {
    for frame in script.frames.iter() {
        if socket.send(Message::Text(frame.clone())).await.is_err() {
            return;
        }
    }
    if script.close_after_script {
        let _ = socket.send(Message::Close(None)).await;
        return;
    }
    while let Some(Ok(message)) = socket.recv().await {
        if let Message::Text(text) = message {
            let _ = script.inbound.send(text);
        }
    }
}

/// Starts a relay that plays `frames` to each client and reports what clients send.
async fn spawn_relay(
    frames: &[&str],
    close_after_script: bool,
) -> (String, mpsc::UnboundedReceiver<String>) {
    let (inbound, inbound_rx) = mpsc::unbounded_channel();
    let script = RelayScript {
        frames: Arc::new(frames.iter().map(|frame| frame.to_string()).collect()),
        close_after_script,
        inbound,
    };
    let app = Router::new().route("/ws", get(ws_handler)).with_state(script);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("ws://{addr}/ws"), inbound_rx)
}

async fn connect(
    url: &str,
    retention: RetentionPolicy,
) -> (RelayClient, mpsc::UnboundedReceiver<RelayEvent>) {
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let client = RelayClient::connect(
        url,
        move |event| {
            let _ = events_tx.send(event);
        },
        retention,
    )
    .await
    .unwrap();
    (client, events_rx)
}

async fn next_event(events: &mut mpsc::UnboundedReceiver<RelayEvent>) -> RelayEvent {
    timeout(WAIT, events.recv())
        .await
        .expect("relay event")
        .expect("relay handler alive")
}

#[test_timeout::tokio_timeout_test]
async fn malformed_frame_does_not_stop_the_read_loop() {
    let (url, _inbound) = spawn_relay(
        &[
            r#"{"type":"connect"}"#,
            "definitely not json",
            r#"{"type":"updateUsers","user":{"userName":"bob"}}"#,
            r#"{"type":"somethingNew"}"#,
        ],
        false,
    )
    .await;
    let (client, mut events) = connect(&url, RetentionPolicy::Unbounded).await;

    assert_eq!(next_event(&mut events).await, RelayEvent::Opened);
    assert_eq!(
        next_event(&mut events).await,
        RelayEvent::Message(ServerMessage::Connect)
    );
    assert!(matches!(
        next_event(&mut events).await,
        RelayEvent::ProtocolError(RelayError::Protocol { .. })
    ));
    assert_eq!(
        next_event(&mut events).await,
        RelayEvent::Message(ServerMessage::UpdateUsers {
            user: Some(Participant::new("bob"))
        })
    );
    assert_eq!(
        next_event(&mut events).await,
        RelayEvent::Message(ServerMessage::Unknown)
    );

    assert!(client.is_open());
    assert_eq!(client.received().len(), 3);
}

#[test_timeout::tokio_timeout_test]
async fn retention_cap_keeps_the_latest_messages() {
    let (url, _inbound) = spawn_relay(
        &[
            r#"{"type":"updateUsers","user":{"userName":"a"}}"#,
            r#"{"type":"updateUsers","user":{"userName":"b"}}"#,
            r#"{"type":"updateUsers","user":{"userName":"c"}}"#,
        ],
        false,
    )
    .await;
    let (client, mut events) = connect(&url, RetentionPolicy::Latest(2)).await;
    for _ in 0..4 {
        next_event(&mut events).await;
    }

    assert_eq!(
        client.received(),
        vec![
            ServerMessage::UpdateUsers {
                user: Some(Participant::new("b"))
            },
            ServerMessage::UpdateUsers {
                user: Some(Participant::new("c"))
            },
        ]
    );
}

#[test_timeout::tokio_timeout_test]
async fn outbound_messages_reach_the_relay() {
    let (url, mut inbound) = spawn_relay(&[], false).await;
    let (client, _events) = connect(&url, RetentionPolicy::Unbounded).await;

    client
        .send(&ClientMessage::Login {
            name: "alice".into(),
        })
        .unwrap();
    client.send_raw(r#"{"type":"ping"}"#).unwrap();

    let first = timeout(WAIT, inbound.recv()).await.unwrap().unwrap();
    let value: serde_json::Value = serde_json::from_str(&first).unwrap();
    assert_eq!(value, serde_json::json!({ "type": "login", "name": "alice" }));
    let second = timeout(WAIT, inbound.recv()).await.unwrap().unwrap();
    assert_eq!(second, r#"{"type":"ping"}"#);
}

#[test_timeout::tokio_timeout_test]
async fn remote_close_is_reported_once_and_sends_fail() {
    let (url, _inbound) = spawn_relay(&[r#"{"type":"connect"}"#], true).await;
    let (client, mut events) = connect(&url, RetentionPolicy::Unbounded).await;

    assert_eq!(next_event(&mut events).await, RelayEvent::Opened);
    assert_eq!(
        next_event(&mut events).await,
        RelayEvent::Message(ServerMessage::Connect)
    );
    assert_eq!(next_event(&mut events).await, RelayEvent::Closed);

    assert!(!client.is_open());
    assert_eq!(
        client.send(&ClientMessage::Login {
            name: "late".into()
        }),
        Err(RelayError::NotConnected)
    );
    client.close();
    assert!(
        timeout(Duration::from_millis(200), events.recv())
            .await
            .is_err()
    );
}

#[test_timeout::tokio_timeout_test]
async fn local_close_is_idempotent() {
    let (url, _inbound) = spawn_relay(&[], false).await;
    let (client, mut events) = connect(&url, RetentionPolicy::Unbounded).await;
    assert_eq!(next_event(&mut events).await, RelayEvent::Opened);

    client.close();
    client.close();
    assert_eq!(next_event(&mut events).await, RelayEvent::Closed);
    assert_eq!(client.send_raw("{}"), Err(RelayError::NotConnected));
    assert!(
        timeout(Duration::from_millis(200), events.recv())
            .await
            .is_err()
    );
}

#[test_timeout::tokio_timeout_test]
async fn unreachable_relay_is_a_setup_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let result = RelayClient::connect(&format!("ws://{addr}/ws"), |_| {}, RetentionPolicy::default()).await;
    assert!(matches!(result, Err(RelayError::Setup(_))));

    let result = RelayClient::connect("not a url", |_| {}, RetentionPolicy::default()).await;
    assert!(matches!(result, Err(RelayError::Setup(_))));
}

#[test_timeout::tokio_timeout_test]
async fn connected_client_drives_the_relay() {
    let (url, mut inbound) = spawn_relay(&[r#"{"type":"connect"}"#], false).await;
    let config = Config::default().with_relay_url(&url).unwrap();
    let client = beach_pier::connect(&config).await.unwrap();
    let session = client.session();

    session.login("alice").await.unwrap();
    let sent = timeout(WAIT, inbound.recv()).await.unwrap().unwrap();
    let value: serde_json::Value = serde_json::from_str(&sent).unwrap();
    assert_eq!(value, serde_json::json!({ "type": "login", "name": "alice" }));

    let snapshot = session.snapshot().await.unwrap();
    assert!(snapshot.state.socket_open);
    assert!(snapshot.state.logging_in);

    timeout(WAIT, async {
        while client.relay_log().is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    assert_eq!(client.relay_log(), vec![ServerMessage::Connect]);

    client.shutdown().await;
    assert!(matches!(session.snapshot().await, Err(SessionError::Shutdown)));
}
