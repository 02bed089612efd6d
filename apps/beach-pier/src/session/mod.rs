//! Signaling state machine.
//!
//! `SessionManager` owns every piece of client state and mutates it from one place: relay
//! events, negotiation results and caller commands are all processed one at a time. Transport
//! work runs on a per-generation [`negotiation`] worker whose results come back as
//! [`SessionEvent`]s; results from a torn-down generation are dropped.

mod negotiation;
mod state;

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::protocol::{
    ChatMessage, ClientMessage, IceCandidate, Participant, ServerMessage, SessionDescription,
};
use crate::relay::{RelayError, RelayEvent, SignalSink};
use crate::transport::{ChannelEvent, DataChannel, TransportError, TransportFactory};

pub use negotiation::{NegotiationEvent, NegotiationStage};
pub use state::{
    ConnectionPhase, Listener, MessageLog, Roster, SessionChange, SessionPhase, SessionSnapshot,
    SessionState,
};

use negotiation::{NegotiationStep, Negotiator};
use state::Publisher;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("not connected")]
    NotConnected,
    #[error("no open data channel")]
    NoChannel,
    #[error("no local user")]
    NoUser,
    #[error("invalid user {0:?}")]
    InvalidUser(String),
    #[error("login already in progress")]
    AlreadyLoggingIn,
    #[error(transparent)]
    Relay(#[from] RelayError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("failed to encode chat message: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("session manager has shut down")]
    Shutdown,
}

/// Everything that can wake the manager besides a caller command.
pub enum SessionEvent {
    Relay(RelayEvent),
    Negotiation(NegotiationEvent),
}

/// The manager's inbound event queue. The sender half is handed to the relay handler before the
/// manager exists so that no relay event is lost.
pub struct SessionEvents {
    tx: mpsc::UnboundedSender<SessionEvent>,
    rx: mpsc::UnboundedReceiver<SessionEvent>,
}

impl SessionEvents {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self { tx, rx }
    }

    pub fn sender(&self) -> mpsc::UnboundedSender<SessionEvent> {
        self.tx.clone()
    }
}

impl Default for SessionEvents {
    fn default() -> Self {
        Self::new()
    }
}

struct ActiveChannel {
    channel_id: u64,
    channel: Arc<dyn DataChannel>,
    open: bool,
}

/// Candidates held back until the description they belong to has gone out (local) or has been
/// queued on the transport (remote). Reset with every transport generation.
#[derive(Default)]
struct CandidateQueues {
    local_description_sent: bool,
    remote_description_queued: bool,
    local: Vec<IceCandidate>,
    remote: Vec<IceCandidate>,
}

pub struct SessionManager {
    relay: Arc<dyn SignalSink>,
    factory: Arc<dyn TransportFactory>,
    channel_label: String,
    events_tx: mpsc::UnboundedSender<SessionEvent>,
    events_rx: Option<mpsc::UnboundedReceiver<SessionEvent>>,
    state: SessionState,
    relay_closed: bool,
    roster: Roster,
    messages: MessageLog,
    generation: u64,
    negotiator: Option<Negotiator>,
    channel: Option<ActiveChannel>,
    pending_offer_to: Option<String>,
    candidates: CandidateQueues,
    publisher: Publisher,
}

impl SessionManager {
    pub fn new(
        relay: Arc<dyn SignalSink>,
        factory: Arc<dyn TransportFactory>,
        channel_label: impl Into<String>,
        events: SessionEvents,
    ) -> Self {
        Self {
            relay,
            factory,
            channel_label: channel_label.into(),
            events_tx: events.tx,
            events_rx: Some(events.rx),
            state: SessionState::default(),
            relay_closed: false,
            roster: Roster::default(),
            messages: MessageLog::new(),
            generation: 0,
            negotiator: None,
            channel: None,
            pending_offer_to: None,
            candidates: CandidateQueues::default(),
            publisher: Publisher::default(),
        }
    }

    pub fn subscribe(&mut self, listener: Listener) {
        self.publisher.subscribe(listener);
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn roster(&self) -> &Roster {
        &self.roster
    }

    pub fn messages(&self) -> &MessageLog {
        &self.messages
    }

    /// Generation of the live transport session.
    pub fn transport_generation(&self) -> Option<u64> {
        self.negotiator.as_ref().map(Negotiator::generation)
    }

    pub fn channel_open(&self) -> bool {
        self.channel.as_ref().is_some_and(|active| active.open)
    }

    pub fn phase(&self) -> SessionPhase {
        SessionPhase::derive(&self.state, self.relay_closed, self.channel_open())
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            state: self.state.clone(),
            phase: self.phase(),
            roster: self.roster.participants().to_vec(),
            messages: self.messages.clone(),
            transport: self.transport_generation(),
            channel_open: self.channel_open(),
        }
    }

    /// Sends a login request. The outcome arrives later as a relay `login` message.
    pub fn login(&mut self, name: &str) -> Result<(), SessionError> {
        if self.state.logging_in {
            return Err(SessionError::AlreadyLoggingIn);
        }
        let name = name.trim();
        if name.is_empty() {
            return Err(SessionError::InvalidUser(name.to_string()));
        }

        let previous = self.state.local_user_name.replace(name.to_string());
        self.state.logging_in = true;
        if let Err(err) = self.relay.send(ClientMessage::Login {
            name: name.to_string(),
        }) {
            self.state.logging_in = false;
            self.state.local_user_name = previous;
            return Err(err.into());
        }
        tracing::info!(target: "pier::session", user = name, "login requested");
        self.publish(SessionChange::LocalUser(self.state.local_user_name.clone()));
        Ok(())
    }

    /// Selects `name` as the active peer, or deselects it when it already is. Any live transport
    /// session is replaced; with a peer selected an offer is queued on the fresh session.
    pub fn select_peer(&mut self, name: &str) -> Result<(), SessionError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(SessionError::InvalidUser(name.to_string()));
        }
        if self.state.active_peer_name.as_deref() == Some(name) {
            tracing::info!(target: "pier::session", peer = name, "peer deselected");
            self.state.active_peer_name = None;
        } else {
            tracing::info!(target: "pier::session", peer = name, "peer selected");
            self.state.active_peer_name = Some(name.to_string());
        }
        self.restart_transport();
        self.publish(SessionChange::ActivePeer(self.state.active_peer_name.clone()));
        self.start_outbound_negotiation();
        Ok(())
    }

    /// Sends `text` to the active peer and records the local echo under that peer.
    pub fn send_message(&mut self, text: &str) -> Result<ChatMessage, SessionError> {
        if self.relay_closed {
            return Err(SessionError::NotConnected);
        }
        let Some(peer) = self.state.active_peer_name.clone() else {
            return Err(SessionError::NotConnected);
        };
        let channel = match self.channel.as_ref() {
            Some(active) if active.open => Arc::clone(&active.channel),
            _ => return Err(SessionError::NoChannel),
        };
        let Some(local) = self.state.local_user_name.clone() else {
            return Err(SessionError::NoUser);
        };

        let message = ChatMessage::now(local, text);
        channel.send_text(message.to_json()?)?;
        self.messages
            .entry(peer)
            .or_default()
            .push(message.clone());
        self.publish(SessionChange::Messages(self.messages.clone()));
        Ok(message)
    }

    pub fn handle_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Relay(event) => self.handle_relay_event(event),
            SessionEvent::Negotiation(event) => self.handle_negotiation_event(event),
        }
    }

    pub fn handle_relay_event(&mut self, event: RelayEvent) {
        match event {
            RelayEvent::Opened => self.mark_socket_open(),
            RelayEvent::Message(message) => {
                if let Err(err) = self.handle_server_message(message) {
                    self.diagnostic(format!("relay message rejected: {err}"));
                }
            }
            RelayEvent::ProtocolError(err) => self.diagnostic(err.to_string()),
            RelayEvent::Closed => {
                self.relay_closed = true;
                self.state.socket_open = false;
                self.state.logging_in = false;
                self.teardown();
                self.publish(SessionChange::SocketOpen(false));
            }
        }
    }

    pub fn handle_server_message(&mut self, message: ServerMessage) -> Result<(), SessionError> {
        tracing::debug!(target: "pier::session", kind = message.kind(), "relay message");
        match message {
            ServerMessage::Connect => {
                self.mark_socket_open();
                Ok(())
            }
            ServerMessage::Login { success, users } => {
                self.handle_login_result(success, users);
                Ok(())
            }
            ServerMessage::UpdateUsers { user } => {
                let user = require_participant(user)?;
                if self.roster.insert(user) {
                    self.publish(SessionChange::Roster(self.roster.participants().to_vec()));
                }
                Ok(())
            }
            ServerMessage::Leave { user } | ServerMessage::RemoveUser { user } => {
                let user = require_participant(user)?;
                self.handle_departure(user.name());
                Ok(())
            }
            ServerMessage::Offer { name, offer } => {
                let sender = require_name(name)?;
                self.handle_offer(sender, offer)
            }
            ServerMessage::Answer { name, answer } => {
                if self.negotiator.is_none() {
                    return Err(SessionError::NotConnected);
                }
                if self.pending_offer_to.is_none()
                    || (name.is_some() && name != self.pending_offer_to)
                {
                    tracing::warn!(
                        target: "pier::session",
                        sender = ?name,
                        expected = ?self.pending_offer_to,
                        "ignoring unexpected answer"
                    );
                    return Ok(());
                }
                self.submit_remote_description(NegotiationStep::ApplyAnswer { answer })?;
                self.pending_offer_to = None;
                Ok(())
            }
            ServerMessage::Candidate { name, candidate } => {
                if self.negotiator.is_none() {
                    return Err(SessionError::NotConnected);
                }
                if name.is_some() && name != self.state.active_peer_name {
                    tracing::debug!(
                        target: "pier::session",
                        sender = ?name,
                        "dropping candidate from inactive peer"
                    );
                    return Ok(());
                }
                if !self.candidates.remote_description_queued {
                    tracing::debug!(
                        target: "pier::session",
                        sender = ?name,
                        "holding remote candidate until a remote description is queued"
                    );
                    self.candidates.remote.push(candidate);
                    return Ok(());
                }
                let negotiator = self.negotiator.as_mut().ok_or(SessionError::NotConnected)?;
                negotiator.submit(NegotiationStep::AddCandidate { candidate });
                Ok(())
            }
            ServerMessage::Unknown => {
                tracing::debug!(target: "pier::session", "ignoring unknown relay message type");
                Ok(())
            }
        }
    }

    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        self.events_rx.as_mut()?.recv().await
    }

    /// Handles queued events until none arrives for `quiet`.
    pub async fn process_until_idle(&mut self, quiet: Duration) {
        loop {
            let Some(events) = self.events_rx.as_mut() else {
                return;
            };
            match tokio::time::timeout(quiet, events.recv()).await {
                Ok(Some(event)) => self.handle_event(event),
                Ok(None) | Err(_) => return,
            }
        }
    }

    /// Moves the manager onto its own task.
    pub fn spawn(mut self) -> (SessionHandle, JoinHandle<()>) {
        let (commands_tx, mut commands_rx) = mpsc::unbounded_channel::<Command>();
        let mut events = self.events_rx.take();
        let task = tokio::spawn(async move {
            let Some(mut events_rx) = events.take() else {
                tracing::error!(target: "pier::session", "session events already consumed");
                return;
            };
            loop {
                tokio::select! {
                    // Pending events first, so command replies observe them.
                    biased;
                    Some(event) = events_rx.recv() => self.handle_event(event),
                    command = commands_rx.recv() => match command {
                        Some(Command::Shutdown { reply }) => {
                            self.teardown();
                            let _ = reply.send(());
                            break;
                        }
                        Some(command) => self.handle_command(command),
                        None => break,
                    },
                }
            }
            tracing::debug!(target: "pier::session", "session manager stopped");
        });
        (
            SessionHandle {
                commands: commands_tx,
            },
            task,
        )
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Login { name, reply } => {
                let _ = reply.send(self.login(&name));
            }
            Command::SelectPeer { name, reply } => {
                let _ = reply.send(self.select_peer(&name));
            }
            Command::SendMessage { text, reply } => {
                let _ = reply.send(self.send_message(&text));
            }
            Command::Snapshot { reply } => {
                let _ = reply.send(self.snapshot());
            }
            Command::Phase { reply } => {
                let _ = reply.send(self.phase());
            }
            Command::Subscribe { listener, reply } => {
                self.subscribe(listener);
                let _ = reply.send(());
            }
            Command::Shutdown { reply } => {
                self.teardown();
                let _ = reply.send(());
            }
        }
    }

    fn mark_socket_open(&mut self) {
        if self.state.socket_open {
            return;
        }
        self.state.socket_open = true;
        tracing::info!(target: "pier::session", "relay socket open");
        self.publish(SessionChange::SocketOpen(true));
    }

    fn handle_login_result(&mut self, success: bool, users: Vec<Participant>) {
        if !self.state.logging_in {
            tracing::warn!(target: "pier::session", success, "ignoring unsolicited login result");
            return;
        }
        self.state.logging_in = false;
        if !success {
            tracing::warn!(
                target: "pier::session",
                user = ?self.state.local_user_name,
                "login rejected by relay"
            );
            self.state.is_logged_in = false;
            self.state.local_user_name = None;
            self.publish(SessionChange::LocalUser(None));
            self.publish(SessionChange::LoginFailed);
            return;
        }

        self.state.is_logged_in = true;
        self.roster = Roster::from_participants(users);
        tracing::info!(
            target: "pier::session",
            user = ?self.state.local_user_name,
            roster = self.roster.len(),
            "logged in"
        );
        self.publish(SessionChange::Roster(self.roster.participants().to_vec()));
        self.restart_transport();
        self.start_outbound_negotiation();
    }

    fn handle_departure(&mut self, name: &str) {
        if !self.roster.remove(name) {
            tracing::debug!(target: "pier::session", user = name, "departure of unknown user");
        } else {
            self.publish(SessionChange::Roster(self.roster.participants().to_vec()));
        }
        if self.state.active_peer_name.as_deref() == Some(name) {
            tracing::info!(target: "pier::session", peer = name, "active peer left");
            self.state.active_peer_name = None;
            self.restart_transport();
            self.publish(SessionChange::ActivePeer(None));
        }
    }

    fn handle_offer(
        &mut self,
        sender: String,
        offer: SessionDescription,
    ) -> Result<(), SessionError> {
        if !self.state.is_logged_in || self.negotiator.is_none() {
            return Err(SessionError::NotConnected);
        }

        let glare = self.pending_offer_to.as_deref() == Some(sender.as_str());
        if glare {
            let local = self.state.local_user_name.as_deref().unwrap_or_default();
            if local < sender.as_str() {
                tracing::info!(
                    target: "pier::session",
                    peer = %sender,
                    "offer collision: keeping offerer role"
                );
                return Ok(());
            }
            tracing::info!(
                target: "pier::session",
                peer = %sender,
                "offer collision: yielding to remote offer"
            );
        }

        let switching = self.state.active_peer_name.as_deref() != Some(sender.as_str());
        let reusable = self
            .negotiator
            .as_ref()
            .is_some_and(Negotiator::is_pristine);
        if glare || (switching && !reusable) {
            self.restart_transport();
        }
        if switching {
            self.candidates.remote.clear();
            self.state.active_peer_name = Some(sender.clone());
            self.publish(SessionChange::ActivePeer(Some(sender.clone())));
        }

        tracing::debug!(
            target: "pier::session",
            peer = %sender,
            generation = ?self.transport_generation(),
            "answering offer"
        );
        self.submit_remote_description(NegotiationStep::Answer {
            peer: sender,
            offer,
        })
    }

    fn handle_negotiation_event(&mut self, event: NegotiationEvent) {
        let generation = event.generation();
        if self.transport_generation() != Some(generation) {
            tracing::debug!(
                target: "pier::session",
                generation,
                current = ?self.transport_generation(),
                kind = event.kind(),
                "discarding stale negotiation event"
            );
            return;
        }

        match event {
            NegotiationEvent::TransportReady { .. } => {
                tracing::debug!(target: "pier::session", generation, "transport ready");
            }
            NegotiationEvent::LocalCandidate { candidate, .. } => {
                let Some(peer) = self.state.active_peer_name.clone() else {
                    tracing::trace!(target: "pier::session", "dropping candidate with no active peer");
                    return;
                };
                if !self.candidates.local_description_sent {
                    self.candidates.local.push(candidate);
                    return;
                }
                self.send_to_relay(ClientMessage::Candidate {
                    name: peer,
                    candidate,
                });
            }
            NegotiationEvent::LocalChannel {
                channel_id,
                channel,
                ..
            }
            | NegotiationEvent::RemoteChannel {
                channel_id,
                channel,
                ..
            } => self.adopt_channel(channel_id, channel),
            NegotiationEvent::Channel {
                channel_id, event, ..
            } => self.handle_channel_event(channel_id, event),
            NegotiationEvent::OfferReady { peer, offer, .. } => {
                if self.state.active_peer_name.as_deref() != Some(peer.as_str()) {
                    tracing::debug!(target: "pier::session", peer = %peer, "offer for inactive peer dropped");
                    return;
                }
                self.send_to_relay(ClientMessage::Offer {
                    name: peer.clone(),
                    offer,
                });
                self.flush_local_candidates(peer);
            }
            NegotiationEvent::AnswerReady { peer, answer, .. } => {
                if self.state.active_peer_name.as_deref() != Some(peer.as_str()) {
                    tracing::debug!(target: "pier::session", peer = %peer, "answer for inactive peer dropped");
                    return;
                }
                self.send_to_relay(ClientMessage::Answer {
                    name: peer.clone(),
                    answer,
                });
                self.flush_local_candidates(peer);
            }
            NegotiationEvent::AnswerApplied { .. } => {
                tracing::debug!(target: "pier::session", generation, "remote answer applied");
            }
            NegotiationEvent::Failed { stage, error, .. } => {
                self.diagnostic(format!("negotiation failed during {stage}: {error}"));
            }
        }
    }

    fn adopt_channel(&mut self, channel_id: u64, channel: Arc<dyn DataChannel>) {
        if let Some(active) = self.channel.as_ref() {
            tracing::info!(
                target: "pier::session",
                active = active.channel_id,
                ignored = channel_id,
                label = %channel.label(),
                "ignoring additional data channel"
            );
            return;
        }
        let open = channel.is_open();
        self.channel = Some(ActiveChannel {
            channel_id,
            channel,
            open,
        });
        if open {
            self.publish(SessionChange::ChannelOpen(true));
        }
    }

    fn handle_channel_event(&mut self, channel_id: u64, event: ChannelEvent) {
        let Some(active) = self.channel.as_mut() else {
            return;
        };
        if active.channel_id != channel_id {
            tracing::trace!(target: "pier::session", channel_id, "event from ignored channel");
            return;
        }
        match event {
            ChannelEvent::Open => {
                if !active.open {
                    active.open = true;
                    tracing::info!(target: "pier::session", peer = ?self.state.active_peer_name, "data channel open");
                    self.publish(SessionChange::ChannelOpen(true));
                }
            }
            ChannelEvent::Message(text) => match ChatMessage::from_json(&text) {
                Ok(message) => {
                    self.messages
                        .entry(message.name.clone())
                        .or_default()
                        .push(message);
                    self.publish(SessionChange::Messages(self.messages.clone()));
                }
                Err(err) => self.diagnostic(format!("undecodable chat payload: {err}")),
            },
            ChannelEvent::Error(err) => self.diagnostic(format!("data channel error: {err}")),
            ChannelEvent::Closed => {
                let was_open = active.open;
                self.channel = None;
                tracing::info!(target: "pier::session", "data channel closed");
                if was_open {
                    self.publish(SessionChange::ChannelOpen(false));
                }
            }
        }
    }

    fn start_outbound_negotiation(&mut self) {
        let Some(peer) = self.state.active_peer_name.clone() else {
            return;
        };
        let Some(negotiator) = self.negotiator.as_mut() else {
            return;
        };
        negotiator.submit(NegotiationStep::Offer { peer: peer.clone() });
        self.pending_offer_to = Some(peer);
    }

    /// Queues a step that applies a remote description, followed by any remote candidates that
    /// arrived ahead of it.
    fn submit_remote_description(&mut self, step: NegotiationStep) -> Result<(), SessionError> {
        let negotiator = self.negotiator.as_mut().ok_or(SessionError::NotConnected)?;
        negotiator.submit(step);
        self.candidates.remote_description_queued = true;
        for candidate in self.candidates.remote.drain(..) {
            negotiator.submit(NegotiationStep::AddCandidate { candidate });
        }
        Ok(())
    }

    fn flush_local_candidates(&mut self, peer: String) {
        self.candidates.local_description_sent = true;
        let held = std::mem::take(&mut self.candidates.local);
        if !held.is_empty() {
            tracing::debug!(target: "pier::session", peer = %peer, count = held.len(), "sending held local candidates");
        }
        for candidate in held {
            self.send_to_relay(ClientMessage::Candidate {
                name: peer.clone(),
                candidate,
            });
        }
    }

    /// Replaces the live transport session, if any, with a fresh generation when logged in.
    fn restart_transport(&mut self) {
        self.teardown();
        if !self.state.is_logged_in || self.relay_closed {
            return;
        }
        self.generation += 1;
        self.negotiator = Some(Negotiator::spawn(
            self.generation,
            Arc::clone(&self.factory),
            self.channel_label.clone(),
            self.events_tx.clone(),
        ));
        tracing::debug!(target: "pier::session", generation = self.generation, "transport session started");
        self.publish(SessionChange::Transport(Some(self.generation)));
    }

    fn teardown(&mut self) {
        self.pending_offer_to = None;
        self.candidates = CandidateQueues::default();
        if let Some(active) = self.channel.take() {
            if active.open {
                self.publish(SessionChange::ChannelOpen(false));
            }
        }
        if let Some(negotiator) = self.negotiator.take() {
            tracing::debug!(
                target: "pier::session",
                generation = negotiator.generation(),
                "transport session torn down"
            );
            drop(negotiator);
            self.publish(SessionChange::Transport(None));
        }
    }

    fn send_to_relay(&mut self, message: ClientMessage) {
        let kind = message.kind();
        if let Err(err) = self.relay.send(message) {
            self.diagnostic(format!("failed to send {kind}: {err}"));
        }
    }

    fn diagnostic(&self, message: String) {
        tracing::warn!(target: "pier::session", "{message}");
        self.publish(SessionChange::Diagnostic(message));
    }

    fn publish(&self, change: SessionChange) {
        self.publisher.publish(change);
    }
}

fn require_participant(user: Option<Participant>) -> Result<Participant, SessionError> {
    match user {
        Some(user) if user.has_name() => Ok(user),
        Some(user) => Err(SessionError::InvalidUser(user.user_name)),
        None => Err(SessionError::InvalidUser(String::new())),
    }
}

fn require_name(name: Option<String>) -> Result<String, SessionError> {
    match name {
        Some(name) if !name.trim().is_empty() => Ok(name),
        other => Err(SessionError::InvalidUser(other.unwrap_or_default())),
    }
}

enum Command {
    Login {
        name: String,
        reply: oneshot::Sender<Result<(), SessionError>>,
    },
    SelectPeer {
        name: String,
        reply: oneshot::Sender<Result<(), SessionError>>,
    },
    SendMessage {
        text: String,
        reply: oneshot::Sender<Result<ChatMessage, SessionError>>,
    },
    Snapshot {
        reply: oneshot::Sender<SessionSnapshot>,
    },
    Phase {
        reply: oneshot::Sender<SessionPhase>,
    },
    Subscribe {
        listener: Listener,
        reply: oneshot::Sender<()>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Cloneable front door to a spawned [`SessionManager`].
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::UnboundedSender<Command>,
}

impl SessionHandle {
    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, SessionError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(build(reply))
            .map_err(|_| SessionError::Shutdown)?;
        response.await.map_err(|_| SessionError::Shutdown)
    }

    pub async fn login(&self, name: impl Into<String>) -> Result<(), SessionError> {
        let name = name.into();
        self.request(|reply| Command::Login { name, reply }).await?
    }

    pub async fn select_peer(&self, name: impl Into<String>) -> Result<(), SessionError> {
        let name = name.into();
        self.request(|reply| Command::SelectPeer { name, reply })
            .await?
    }

    pub async fn send_message(&self, text: impl Into<String>) -> Result<ChatMessage, SessionError> {
        let text = text.into();
        self.request(|reply| Command::SendMessage { text, reply })
            .await?
    }

    pub async fn snapshot(&self) -> Result<SessionSnapshot, SessionError> {
        self.request(|reply| Command::Snapshot { reply }).await
    }

    pub async fn phase(&self) -> Result<SessionPhase, SessionError> {
        self.request(|reply| Command::Phase { reply }).await
    }

    pub async fn subscribe(
        &self,
        listener: impl Fn(&SessionChange) + Send + 'static,
    ) -> Result<(), SessionError> {
        let listener: Listener = Box::new(listener);
        self.request(|reply| Command::Subscribe { listener, reply })
            .await
    }

    pub async fn shutdown(&self) -> Result<(), SessionError> {
        self.request(|reply| Command::Shutdown { reply }).await
    }
}
