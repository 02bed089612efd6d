//! WebSocket client for the rendezvous relay.
//!
//! The client owns one duplex connection. Outbound messages are queued to a writer task;
//! inbound frames are decoded on a reader task and handed to a single handler in arrival order.
//! There is no reconnect: once the socket closes every send fails with
//! [`RelayError::NotConnected`].

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{Error as WsError, Message, error::ProtocolError as WsProtocolError},
};
use url::Url;

use crate::protocol::{ClientMessage, ServerMessage};

const PAYLOAD_PREVIEW_LEN: usize = 120;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RelayError {
    #[error("relay setup failed: {0}")]
    Setup(String),
    #[error("malformed relay payload: {detail}")]
    Protocol { detail: String, payload: String },
    #[error("relay transmission failed: {0}")]
    Transmission(String),
    #[error("relay connection is closed")]
    NotConnected,
}

/// Everything the relay reports to its handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayEvent {
    Opened,
    Message(ServerMessage),
    ProtocolError(RelayError),
    Closed,
}

/// How many decoded messages the client keeps for diagnostic replay.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RetentionPolicy {
    #[default]
    Unbounded,
    /// Keep the most recent `n` messages, evicting the oldest first.
    Latest(usize),
}

/// The outbound half of the relay, as seen by the session manager.
pub trait SignalSink: Send + Sync {
    fn send(&self, message: ClientMessage) -> Result<(), RelayError>;
}

type Handler = Box<dyn Fn(RelayEvent) + Send + Sync>;

struct RelayShared {
    open: AtomicBool,
    closed_reported: AtomicBool,
    received: Mutex<VecDeque<ServerMessage>>,
    retention: RetentionPolicy,
    handler: Handler,
}

impl RelayShared {
    fn new(handler: Handler, retention: RetentionPolicy) -> Self {
        Self {
            open: AtomicBool::new(false),
            closed_reported: AtomicBool::new(false),
            received: Mutex::new(VecDeque::new()),
            retention,
            handler,
        }
    }

    fn mark_open(&self) {
        self.open.store(true, Ordering::SeqCst);
        (self.handler)(RelayEvent::Opened);
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn mark_closed(&self) {
        self.open.store(false, Ordering::SeqCst);
        if !self.closed_reported.swap(true, Ordering::SeqCst) {
            tracing::info!(target: "pier::relay", "relay connection closed");
            (self.handler)(RelayEvent::Closed);
        }
    }

    fn dispatch_text(&self, text: &str) {
        match serde_json::from_str::<ServerMessage>(text) {
            Ok(message) => {
                tracing::trace!(
                    target: "pier::relay",
                    kind = message.kind(),
                    len = text.len(),
                    "relay message received"
                );
                self.retain(message.clone());
                (self.handler)(RelayEvent::Message(message));
            }
            Err(err) => {
                let payload: String = text.chars().take(PAYLOAD_PREVIEW_LEN).collect();
                tracing::warn!(
                    target: "pier::relay",
                    error = %err,
                    payload = %payload,
                    "dropping undecodable relay payload"
                );
                (self.handler)(RelayEvent::ProtocolError(RelayError::Protocol {
                    detail: err.to_string(),
                    payload,
                }));
            }
        }
    }

    fn retain(&self, message: ServerMessage) {
        let mut received = self.received.lock();
        received.push_back(message);
        if let RetentionPolicy::Latest(limit) = self.retention {
            while received.len() > limit {
                received.pop_front();
            }
        }
    }
}

pub struct RelayClient {
    url: Url,
    outbound: mpsc::UnboundedSender<Message>,
    shared: Arc<RelayShared>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl RelayClient {
    /// Opens the relay connection. `handler` receives [`RelayEvent::Opened`] before this returns
    /// and every later event on the reader task.
    pub async fn connect<F>(
        url: &str,
        handler: F,
        retention: RetentionPolicy,
    ) -> Result<Self, RelayError>
    where
        F: Fn(RelayEvent) + Send + Sync + 'static,
    {
        let url = Url::parse(url)
            .map_err(|err| RelayError::Setup(format!("invalid relay url {url}: {err}")))?;
        let (ws_stream, _) = connect_async(url.as_str())
            .await
            .map_err(|err| RelayError::Setup(format!("websocket connect failed: {err}")))?;
        tracing::debug!(target: "pier::relay", url = %url, "relay websocket connected");
        let (mut ws_write, mut ws_read) = ws_stream.split();

        let shared = Arc::new(RelayShared::new(Box::new(handler), retention));
        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<Message>();

        shared.mark_open();

        let writer_shared = Arc::clone(&shared);
        let writer = tokio::spawn(async move {
            while let Some(message) = outbound_rx.recv().await {
                let closing = matches!(message, Message::Close(_));
                if let Err(err) = ws_write.send(message).await {
                    tracing::debug!(target: "pier::relay", error = %err, "relay write failed");
                    writer_shared.mark_closed();
                    break;
                }
                if closing {
                    break;
                }
            }
        });

        let reader_shared = Arc::clone(&shared);
        let reader = tokio::spawn(async move {
            while let Some(frame) = ws_read.next().await {
                match frame {
                    Ok(Message::Text(text)) => reader_shared.dispatch_text(&text),
                    Ok(Message::Binary(data)) => match String::from_utf8(data) {
                        Ok(text) => reader_shared.dispatch_text(&text),
                        Err(err) => {
                            tracing::warn!(
                                target: "pier::relay",
                                error = %err,
                                "dropping non-utf8 relay frame"
                            );
                            (reader_shared.handler)(RelayEvent::ProtocolError(
                                RelayError::Protocol {
                                    detail: err.to_string(),
                                    payload: String::new(),
                                },
                            ));
                        }
                    },
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(err) => {
                        match &err {
                            WsError::ConnectionClosed
                            | WsError::AlreadyClosed
                            | WsError::Protocol(WsProtocolError::ResetWithoutClosingHandshake) => {
                                tracing::debug!(target: "pier::relay", "relay websocket closed: {err}");
                            }
                            _ => {
                                tracing::warn!(target: "pier::relay", "relay websocket error: {err}");
                            }
                        }
                        break;
                    }
                }
            }
            reader_shared.mark_closed();
        });

        Ok(Self {
            url,
            outbound,
            shared,
            tasks: Mutex::new(vec![writer, reader]),
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn is_open(&self) -> bool {
        self.shared.is_open()
    }

    pub fn send(&self, message: &ClientMessage) -> Result<(), RelayError> {
        let text = message
            .to_json()
            .map_err(|err| RelayError::Transmission(format!("encode {}: {err}", message.kind())))?;
        tracing::debug!(target: "pier::relay", kind = message.kind(), "sending relay message");
        self.send_raw(text)
    }

    /// Sends pre-serialized text as-is.
    pub fn send_raw(&self, text: impl Into<String>) -> Result<(), RelayError> {
        if !self.shared.is_open() {
            return Err(RelayError::NotConnected);
        }
        self.outbound
            .send(Message::Text(text.into()))
            .map_err(|_| RelayError::Transmission("relay writer stopped".into()))
    }

    /// Snapshot of every retained message, oldest first.
    pub fn received(&self) -> Vec<ServerMessage> {
        self.shared.received.lock().iter().cloned().collect()
    }

    pub fn close(&self) {
        if !self.shared.is_open() {
            return;
        }
        let _ = self.outbound.send(Message::Close(None));
        self.shared.mark_closed();
    }
}

impl SignalSink for RelayClient {
    fn send(&self, message: ClientMessage) -> Result<(), RelayError> {
        RelayClient::send(self, &message)
    }
}

impl Drop for RelayClient {
    fn drop(&mut self) {
        for handle in self.tasks.lock().drain(..) {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Participant;

    fn recording_shared(retention: RetentionPolicy) -> (Arc<RelayShared>, Arc<Mutex<Vec<RelayEvent>>>) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        let shared = Arc::new(RelayShared::new(
            Box::new(move |event: RelayEvent| sink.lock().push(event)),
            retention,
        ));
        (shared, events)
    }

    #[test]
    fn malformed_payload_is_reported_and_later_messages_still_dispatch() {
        let (shared, events) = recording_shared(RetentionPolicy::Unbounded);
        shared.dispatch_text("{not json");
        shared.dispatch_text(r#"{"type":"updateUsers","user":{"userName":"bob"}}"#);

        let events = events.lock();
        assert_eq!(events.len(), 2);
        assert!(matches!(
            &events[0],
            RelayEvent::ProtocolError(RelayError::Protocol { payload, .. }) if payload == "{not json"
        ));
        assert_eq!(
            events[1],
            RelayEvent::Message(ServerMessage::UpdateUsers {
                user: Some(Participant::new("bob"))
            })
        );
        assert_eq!(shared.received.lock().len(), 1);
    }

    #[test]
    fn bounded_retention_evicts_oldest() {
        let (shared, _) = recording_shared(RetentionPolicy::Latest(2));
        for name in ["a", "b", "c"] {
            shared.dispatch_text(&format!(
                r#"{{"type":"updateUsers","user":{{"userName":"{name}"}}}}"#
            ));
        }
        let kept: Vec<_> = shared
            .received
            .lock()
            .iter()
            .map(|message| match message {
                ServerMessage::UpdateUsers { user: Some(user) } => user.user_name.clone(),
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(kept, vec!["b".to_string(), "c".to_string()]);
    }

    #[test]
    fn closed_is_reported_once() {
        let (shared, events) = recording_shared(RetentionPolicy::Unbounded);
        shared.mark_open();
        shared.mark_closed();
        shared.mark_closed();
        assert!(!shared.is_open());
        assert_eq!(*events.lock(), vec![RelayEvent::Opened, RelayEvent::Closed]);
    }
}
