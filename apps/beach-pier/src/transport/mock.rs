//! In-memory transport used by tests.
//!
//! Descriptions are opaque strings (`mock-offer-<id>`, `mock-answer-<id>`). Applying a remote
//! answer opens every locally created channel, standing in for the DTLS/SCTP handshake.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{
    CandidateHandler, ChannelEvent, ChannelEvents, ChannelHandler, DataChannel,
    IncomingChannelHandler, TransportError, TransportFactory, TransportSession,
};
use crate::protocol::{IceCandidate, SdpKind, SessionDescription};

#[derive(Default)]
pub struct MockTransportFactory {
    next_id: AtomicU64,
    fail_offers: AtomicBool,
    gather_on_local: AtomicBool,
    sessions: Mutex<Vec<Arc<MockSession>>>,
}

impl MockTransportFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Sessions created from now on fail every `create_offer`.
    pub fn fail_offers(&self, fail: bool) {
        self.fail_offers.store(fail, Ordering::SeqCst);
    }

    /// Sessions created from now on discover a host candidate while a local description is
    /// being applied, the way a real ICE agent starts gathering.
    pub fn gather_on_local_description(&self, gather: bool) {
        self.gather_on_local.store(gather, Ordering::SeqCst);
    }

    pub fn sessions(&self) -> Vec<Arc<MockSession>> {
        self.sessions.lock().clone()
    }

    pub fn latest(&self) -> Option<Arc<MockSession>> {
        self.sessions.lock().last().cloned()
    }
}

#[async_trait]
impl TransportFactory for MockTransportFactory {
    async fn create_session(&self) -> Result<Arc<dyn TransportSession>, TransportError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let session = Arc::new(MockSession::new(
            id,
            self.fail_offers.load(Ordering::SeqCst),
            self.gather_on_local.load(Ordering::SeqCst),
        ));
        self.sessions.lock().push(Arc::clone(&session));
        Ok(session)
    }
}

#[derive(Default)]
struct MockSessionState {
    local: Option<SessionDescription>,
    remote: Option<SessionDescription>,
    candidates: Vec<IceCandidate>,
    channels: Vec<Arc<MockDataChannel>>,
    closed: bool,
}

pub struct MockSession {
    id: u64,
    fail_offers: bool,
    gather_on_local: bool,
    state: Mutex<MockSessionState>,
    candidate_handler: Mutex<Option<CandidateHandler>>,
    channel_handler: Mutex<Option<IncomingChannelHandler>>,
}

impl MockSession {
    fn new(id: u64, fail_offers: bool, gather_on_local: bool) -> Self {
        Self {
            id,
            fail_offers,
            gather_on_local,
            state: Mutex::new(MockSessionState::default()),
            candidate_handler: Mutex::new(None),
            channel_handler: Mutex::new(None),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    pub fn remote(&self) -> Option<SessionDescription> {
        self.state.lock().remote.clone()
    }

    pub fn local(&self) -> Option<SessionDescription> {
        self.state.lock().local.clone()
    }

    pub fn candidates(&self) -> Vec<IceCandidate> {
        self.state.lock().candidates.clone()
    }

    /// Channels created locally through [`TransportSession::create_data_channel`].
    pub fn channels(&self) -> Vec<Arc<MockDataChannel>> {
        self.state.lock().channels.clone()
    }

    /// Simulates ICE gathering discovering a local candidate.
    pub fn emit_local_candidate(&self, candidate: IceCandidate) {
        let handler = self.candidate_handler.lock().clone();
        if let Some(handler) = handler {
            handler(candidate);
        }
    }

    /// Simulates the remote side opening a channel. The returned channel is already open.
    pub fn announce_remote_channel(&self, label: &str) -> Arc<MockDataChannel> {
        let channel = Arc::new(MockDataChannel::new(label));
        channel.set_open();
        let handler = self.channel_handler.lock().clone();
        if let Some(handler) = handler {
            handler(Arc::clone(&channel) as Arc<dyn DataChannel>);
        }
        channel
    }

    fn ensure_live(&self) -> Result<(), TransportError> {
        if self.state.lock().closed {
            return Err(TransportError::Negotiation(format!(
                "mock session {} is closed",
                self.id
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl TransportSession for MockSession {
    async fn create_offer(&self) -> Result<SessionDescription, TransportError> {
        self.ensure_live()?;
        if self.fail_offers {
            return Err(TransportError::Negotiation("offer rejected".into()));
        }
        Ok(SessionDescription::offer(format!("mock-offer-{}", self.id)))
    }

    async fn create_answer(&self) -> Result<SessionDescription, TransportError> {
        self.ensure_live()?;
        match self.state.lock().remote.as_ref() {
            Some(remote) if remote.kind == SdpKind::Offer => {}
            _ => {
                return Err(TransportError::Negotiation(
                    "create_answer without a remote offer".into(),
                ));
            }
        }
        Ok(SessionDescription::answer(format!("mock-answer-{}", self.id)))
    }

    async fn set_local_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), TransportError> {
        self.ensure_live()?;
        self.state.lock().local = Some(description);
        if self.gather_on_local {
            self.emit_local_candidate(IceCandidate {
                candidate: format!("candidate:mock-{}", self.id),
                ..Default::default()
            });
        }
        Ok(())
    }

    async fn local_description(&self) -> Option<SessionDescription> {
        self.state.lock().local.clone()
    }

    async fn set_remote_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), TransportError> {
        self.ensure_live()?;
        let opened = {
            let mut state = self.state.lock();
            let is_answer = description.kind == SdpKind::Answer;
            state.remote = Some(description);
            if is_answer {
                state.channels.clone()
            } else {
                Vec::new()
            }
        };
        for channel in opened {
            channel.set_open();
        }
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), TransportError> {
        self.ensure_live()?;
        let mut state = self.state.lock();
        if state.remote.is_none() {
            return Err(TransportError::Negotiation(
                "candidate before remote description".into(),
            ));
        }
        state.candidates.push(candidate);
        Ok(())
    }

    async fn create_data_channel(
        &self,
        label: &str,
    ) -> Result<Arc<dyn DataChannel>, TransportError> {
        self.ensure_live()?;
        let channel = Arc::new(MockDataChannel::new(label));
        self.state.lock().channels.push(Arc::clone(&channel));
        Ok(channel)
    }

    fn on_ice_candidate(&self, handler: CandidateHandler) {
        *self.candidate_handler.lock() = Some(handler);
    }

    fn on_data_channel(&self, handler: IncomingChannelHandler) {
        *self.channel_handler.lock() = Some(handler);
    }

    async fn close(&self) {
        let channels = {
            let mut state = self.state.lock();
            state.closed = true;
            state.channels.clone()
        };
        for channel in channels {
            channel.close();
        }
    }
}

pub struct MockDataChannel {
    label: String,
    open: AtomicBool,
    closed: AtomicBool,
    sent: Mutex<Vec<String>>,
    events: ChannelEvents,
}

impl MockDataChannel {
    fn new(label: &str) -> Self {
        Self {
            label: label.to_string(),
            open: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            sent: Mutex::new(Vec::new()),
            events: ChannelEvents::default(),
        }
    }

    pub fn set_open(&self) {
        if !self.open.swap(true, Ordering::SeqCst) {
            self.events.emit(ChannelEvent::Open);
        }
    }

    pub fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.events.emit(ChannelEvent::Closed);
        }
    }

    /// Payloads accepted by [`DataChannel::send_text`], in order.
    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().clone()
    }

    /// Delivers `text` as if it arrived from the remote peer.
    pub fn deliver(&self, text: impl Into<String>) {
        self.events.emit(ChannelEvent::Message(text.into()));
    }
}

impl DataChannel for MockDataChannel {
    fn label(&self) -> String {
        self.label.clone()
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn send_text(&self, text: String) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::ChannelClosed);
        }
        self.sent.lock().push(text);
        Ok(())
    }

    fn set_handler(&self, handler: ChannelHandler) {
        self.events.set_handler(handler);
    }
}
