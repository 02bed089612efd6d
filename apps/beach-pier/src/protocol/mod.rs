//! Wire types shared by the relay client, the session manager and the peer data channel.
//!
//! Relay messages are JSON objects discriminated by a `type` field. The relay forwards
//! `offer`/`answer`/`candidate` payloads untouched, rewriting `name` so the receiver sees the
//! sender's identifier.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// A participant known to the relay, identified by its display name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Participant {
    #[serde(rename = "userName", default)]
    pub user_name: String,
}

impl Participant {
    pub fn new(user_name: impl Into<String>) -> Self {
        Self {
            user_name: user_name.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.user_name
    }

    pub fn has_name(&self) -> bool {
        !self.user_name.trim().is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    Offer,
    Answer,
    Pranswer,
}

/// Session description in the browser's `RTCSessionDescriptionInit` shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: SdpKind,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Answer,
            sdp: sdp.into(),
        }
    }
}

/// ICE candidate in the browser's `RTCIceCandidateInit` shape.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(rename = "sdpMid", default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(
        rename = "sdpMLineIndex",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub sdp_mline_index: Option<u16>,
    #[serde(
        rename = "usernameFragment",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub username_fragment: Option<String>,
}

/// Messages sent from this client to the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientMessage {
    Login {
        name: String,
    },
    /// `name` is the peer the relay should forward the offer to.
    Offer {
        name: String,
        offer: SessionDescription,
    },
    Answer {
        name: String,
        answer: SessionDescription,
    },
    Candidate {
        name: String,
        candidate: IceCandidate,
    },
}

impl ClientMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            ClientMessage::Login { .. } => "login",
            ClientMessage::Offer { .. } => "offer",
            ClientMessage::Answer { .. } => "answer",
            ClientMessage::Candidate { .. } => "candidate",
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Messages delivered by the relay to this client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerMessage {
    Connect,
    Login {
        #[serde(default)]
        success: bool,
        #[serde(default)]
        users: Vec<Participant>,
    },
    UpdateUsers {
        #[serde(default)]
        user: Option<Participant>,
    },
    Leave {
        #[serde(default)]
        user: Option<Participant>,
    },
    RemoveUser {
        #[serde(default)]
        user: Option<Participant>,
    },
    /// `name` is the sender of the offer.
    Offer {
        #[serde(default)]
        name: Option<String>,
        offer: SessionDescription,
    },
    Answer {
        #[serde(default)]
        name: Option<String>,
        answer: SessionDescription,
    },
    Candidate {
        #[serde(default)]
        name: Option<String>,
        candidate: IceCandidate,
    },
    #[serde(other)]
    Unknown,
}

impl ServerMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            ServerMessage::Connect => "connect",
            ServerMessage::Login { .. } => "login",
            ServerMessage::UpdateUsers { .. } => "updateUsers",
            ServerMessage::Leave { .. } => "leave",
            ServerMessage::RemoveUser { .. } => "removeUser",
            ServerMessage::Offer { .. } => "offer",
            ServerMessage::Answer { .. } => "answer",
            ServerMessage::Candidate { .. } => "candidate",
            ServerMessage::Unknown => "unknown",
        }
    }
}

/// A chat line exchanged over the peer data channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    #[serde(with = "time::serde::rfc3339")]
    pub time: OffsetDateTime,
    pub message: String,
    /// Identifier of the participant that wrote the message.
    pub name: String,
}

impl ChatMessage {
    pub fn now(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            time: OffsetDateTime::now_utc(),
            message: message.into(),
            name: name.into(),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    #[test]
    fn login_result_parses_roster() {
        let text = r#"{"type":"login","success":true,"users":[{"userName":"alice"},{"userName":"bob"}]}"#;
        let message: ServerMessage = serde_json::from_str(text).unwrap();
        assert_eq!(
            message,
            ServerMessage::Login {
                success: true,
                users: vec![Participant::new("alice"), Participant::new("bob")],
            }
        );
    }

    #[test]
    fn presence_messages_use_camel_case_tags() {
        let joined: ServerMessage =
            serde_json::from_str(r#"{"type":"updateUsers","user":{"userName":"carol"}}"#).unwrap();
        assert_eq!(
            joined,
            ServerMessage::UpdateUsers {
                user: Some(Participant::new("carol"))
            }
        );
        let removed: ServerMessage = serde_json::from_str(r#"{"type":"removeUser"}"#).unwrap();
        assert_eq!(removed, ServerMessage::RemoveUser { user: None });
    }

    #[test]
    fn unknown_types_are_tolerated() {
        let message: ServerMessage = serde_json::from_str(r#"{"type":"ping","at":12}"#).unwrap();
        assert_eq!(message, ServerMessage::Unknown);
        assert!(serde_json::from_str::<ServerMessage>(r#"{"name":"no tag"}"#).is_err());
    }

    #[test]
    fn offer_is_serialized_in_browser_shape() {
        let message = ClientMessage::Offer {
            name: "bob".into(),
            offer: SessionDescription::offer("v=0"),
        };
        let value: Value = serde_json::from_str(&message.to_json().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({"type": "offer", "name": "bob", "offer": {"type": "offer", "sdp": "v=0"}})
        );
    }

    #[test]
    fn candidate_fields_follow_browser_names() {
        let text = r#"{"type":"candidate","name":"bob","candidate":{"candidate":"candidate:1 1 udp 1 127.0.0.1 5000 typ host","sdpMid":"0","sdpMLineIndex":0}}"#;
        let ServerMessage::Candidate { name, candidate } = serde_json::from_str(text).unwrap()
        else {
            panic!("expected candidate");
        };
        assert_eq!(name.as_deref(), Some("bob"));
        assert_eq!(candidate.sdp_mid.as_deref(), Some("0"));
        assert_eq!(candidate.sdp_mline_index, Some(0));
        assert_eq!(candidate.username_fragment, None);
    }

    #[test]
    fn chat_message_accepts_browser_iso_timestamps() {
        let message =
            ChatMessage::from_json(r#"{"time":"2024-03-01T10:15:30.123Z","message":"hi","name":"bob"}"#)
                .unwrap();
        assert_eq!(message.name, "bob");
        assert_eq!(message.message, "hi");
        assert_eq!(message.time.year(), 2024);
    }
}
