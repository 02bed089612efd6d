//! Point-to-point transport seam.
//!
//! The session manager only negotiates through these traits. `webrtc` carries the production
//! implementation on top of webrtc-rs; `mock` is an in-memory stand-in used by tests.

pub mod mock;
pub mod webrtc;

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;

use crate::protocol::{IceCandidate, SessionDescription};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("transport setup failed: {0}")]
    Setup(String),
    #[error("negotiation failed: {0}")]
    Negotiation(String),
    #[error("data channel closed")]
    ChannelClosed,
}

/// Lifecycle and payload notifications for one data channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    Open,
    Message(String),
    Error(String),
    Closed,
}

pub type CandidateHandler = Arc<dyn Fn(IceCandidate) + Send + Sync>;
pub type IncomingChannelHandler = Arc<dyn Fn(Arc<dyn DataChannel>) + Send + Sync>;
pub type ChannelHandler = Arc<dyn Fn(ChannelEvent) + Send + Sync>;

#[async_trait]
pub trait TransportFactory: Send + Sync {
    async fn create_session(&self) -> Result<Arc<dyn TransportSession>, TransportError>;
}

/// One negotiated peer connection.
#[async_trait]
pub trait TransportSession: Send + Sync {
    async fn create_offer(&self) -> Result<SessionDescription, TransportError>;
    async fn create_answer(&self) -> Result<SessionDescription, TransportError>;
    async fn set_local_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), TransportError>;
    /// The local description as finalized by the transport, once one has been applied.
    async fn local_description(&self) -> Option<SessionDescription>;
    async fn set_remote_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), TransportError>;
    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), TransportError>;
    async fn create_data_channel(&self, label: &str)
    -> Result<Arc<dyn DataChannel>, TransportError>;
    fn on_ice_candidate(&self, handler: CandidateHandler);
    fn on_data_channel(&self, handler: IncomingChannelHandler);
    async fn close(&self);
}

pub trait DataChannel: Send + Sync {
    fn label(&self) -> String;
    fn is_open(&self) -> bool;
    /// Queues `text` for delivery. Fails with [`TransportError::ChannelClosed`] once the channel
    /// can no longer carry data.
    fn send_text(&self, text: String) -> Result<(), TransportError>;
    /// Installs the event handler. Events raised before a handler exists are buffered and
    /// replayed on installation.
    fn set_handler(&self, handler: ChannelHandler);
}

/// Handler slot with replay of events that fired before anyone listened. Events emitted while
/// a replay is running join the backlog, so the handler always sees them in emission order.
#[derive(Default)]
pub(crate) struct ChannelEvents {
    inner: Mutex<ChannelEventsInner>,
}

#[derive(Default)]
struct ChannelEventsInner {
    handler: Option<ChannelHandler>,
    replaying: bool,
    pending: Vec<ChannelEvent>,
}

impl ChannelEvents {
    pub(crate) fn set_handler(&self, handler: ChannelHandler) {
        let mut backlog = {
            let mut inner = self.inner.lock();
            inner.handler = Some(Arc::clone(&handler));
            inner.replaying = true;
            std::mem::take(&mut inner.pending)
        };
        loop {
            for event in backlog {
                handler(event);
            }
            let mut inner = self.inner.lock();
            if inner.pending.is_empty() {
                inner.replaying = false;
                return;
            }
            backlog = std::mem::take(&mut inner.pending);
        }
    }

    pub(crate) fn emit(&self, event: ChannelEvent) {
        let handler = {
            let mut inner = self.inner.lock();
            let ready = if inner.replaying {
                None
            } else {
                inner.handler.clone()
            };
            match ready {
                Some(handler) => handler,
                None => {
                    inner.pending.push(event);
                    return;
                }
            }
        };
        handler(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_before_handler_are_replayed_in_order() {
        let events = ChannelEvents::default();
        events.emit(ChannelEvent::Open);
        events.emit(ChannelEvent::Message("early".into()));

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        events.set_handler(Arc::new(move |event: ChannelEvent| sink.lock().push(event)));
        events.emit(ChannelEvent::Closed);

        assert_eq!(
            *seen.lock(),
            vec![
                ChannelEvent::Open,
                ChannelEvent::Message("early".into()),
                ChannelEvent::Closed
            ]
        );
    }

    #[test]
    fn emits_during_replay_wait_for_the_backlog() {
        let events = Arc::new(ChannelEvents::default());
        events.emit(ChannelEvent::Open);
        events.emit(ChannelEvent::Message("early".into()));

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let source = Arc::clone(&events);
        events.set_handler(Arc::new(move |event: ChannelEvent| {
            let first = event == ChannelEvent::Open;
            sink.lock().push(event);
            if first {
                source.emit(ChannelEvent::Message("during replay".into()));
            }
        }));
        events.emit(ChannelEvent::Closed);

        assert_eq!(
            *seen.lock(),
            vec![
                ChannelEvent::Open,
                ChannelEvent::Message("early".into()),
                ChannelEvent::Message("during replay".into()),
                ChannelEvent::Closed
            ]
        );
    }
}
