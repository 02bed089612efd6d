use std::collections::BTreeMap;

use crate::protocol::{ChatMessage, Participant};

/// Participants known to the relay, in arrival order, unique by name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Roster {
    participants: Vec<Participant>,
}

impl Roster {
    pub fn from_participants(participants: impl IntoIterator<Item = Participant>) -> Self {
        let mut roster = Self::default();
        for participant in participants {
            roster.insert(participant);
        }
        roster
    }

    /// Returns false when a participant with the same name is already present.
    pub fn insert(&mut self, participant: Participant) -> bool {
        if self.contains(participant.name()) {
            return false;
        }
        self.participants.push(participant);
        true
    }

    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.participants.len();
        self.participants.retain(|participant| participant.name() != name);
        before != self.participants.len()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.participants
            .iter()
            .any(|participant| participant.name() == name)
    }

    pub fn participants(&self) -> &[Participant] {
        &self.participants
    }

    pub fn names(&self) -> Vec<String> {
        self.participants
            .iter()
            .map(|participant| participant.user_name.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.participants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }
}

/// Chat history keyed by the remote participant, whichever side wrote each line.
pub type MessageLog = BTreeMap<String, Vec<ChatMessage>>;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionState {
    pub socket_open: bool,
    pub logging_in: bool,
    pub is_logged_in: bool,
    pub local_user_name: Option<String>,
    pub active_peer_name: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionPhase {
    Idle,
    Negotiating,
    Connected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// The relay has not reported open yet.
    Connecting,
    Disconnected,
    LoggingIn,
    LoggedIn(ConnectionPhase),
}

impl SessionPhase {
    pub fn derive(state: &SessionState, relay_closed: bool, channel_open: bool) -> Self {
        if relay_closed {
            return SessionPhase::Disconnected;
        }
        if !state.socket_open {
            return SessionPhase::Connecting;
        }
        if state.logging_in {
            return SessionPhase::LoggingIn;
        }
        if !state.is_logged_in {
            // Relay open but nobody logged in yet; nothing can be negotiated.
            return SessionPhase::Connecting;
        }
        let connection = match (&state.active_peer_name, channel_open) {
            (None, _) => ConnectionPhase::Idle,
            (Some(_), false) => ConnectionPhase::Negotiating,
            (Some(_), true) => ConnectionPhase::Connected,
        };
        SessionPhase::LoggedIn(connection)
    }
}

/// Point-in-time copy of everything a presentation layer renders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub phase: SessionPhase,
    pub roster: Vec<Participant>,
    pub messages: MessageLog,
    /// Generation of the live transport session, if one exists.
    pub transport: Option<u64>,
    pub channel_open: bool,
}

/// Notifications published to listeners right after the matching mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionChange {
    SocketOpen(bool),
    LocalUser(Option<String>),
    LoginFailed,
    Roster(Vec<Participant>),
    ActivePeer(Option<String>),
    Transport(Option<u64>),
    ChannelOpen(bool),
    Messages(MessageLog),
    Diagnostic(String),
}

pub type Listener = Box<dyn Fn(&SessionChange) + Send>;

#[derive(Default)]
pub(crate) struct Publisher {
    listeners: Vec<Listener>,
}

impl Publisher {
    pub(crate) fn subscribe(&mut self, listener: Listener) {
        self.listeners.push(listener);
    }

    pub(crate) fn publish(&self, change: SessionChange) {
        for listener in &self.listeners {
            listener(&change);
        }
    }
}
