//! Signaling wire format
//!
//! Every message on the room channel is a `SignalMessage`, a tagged union
//! validated here at the transport boundary before it reaches the
//! negotiation state machine. The serialized layout is flat:
//! `{ kind, from, fromName, to?, signal? }` with `kind` one of
//! `call-initiated`, `offer`, `answer`, `ice-candidate`, `call-ended`.

use std::fmt;

use serde::{Deserialize, Serialize};
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

use crate::{Error, Result};

/// Opaque, stable identifier for a room member
///
/// Used as the registry key and as the `from`/`to` field on every signaling
/// message. Never reused across distinct participants within a room's
/// lifetime (the identity provider guarantees this).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(String);

impl ParticipantId {
    /// Wrap an identity-provider id
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The raw id string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ParticipantId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for ParticipantId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// A message exchanged on the room's signaling channel
///
/// `CallInitiated` is always a broadcast; `Offer`, `Answer` and
/// `IceCandidate` are unicast; `CallEnded` is broadcast on a full hangup
/// (every receiver tears down only the sender's pairwise session).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum SignalMessage {
    /// Someone wants to start (or has joined) the room call
    CallInitiated {
        /// Sender
        from: ParticipantId,
        /// Sender's display name
        #[serde(rename = "fromName")]
        from_name: String,
    },

    /// SDP offer opening a pairwise negotiation
    Offer {
        /// Sender
        from: ParticipantId,
        /// Sender's display name
        #[serde(rename = "fromName")]
        from_name: String,
        /// Addressed participant
        to: ParticipantId,
        /// The session description
        signal: RTCSessionDescription,
    },

    /// SDP answer completing a pairwise negotiation
    Answer {
        /// Sender
        from: ParticipantId,
        /// Sender's display name
        #[serde(rename = "fromName")]
        from_name: String,
        /// Addressed participant
        to: ParticipantId,
        /// The session description
        signal: RTCSessionDescription,
    },

    /// A trickled ICE candidate for an in-flight or established session
    IceCandidate {
        /// Sender
        from: ParticipantId,
        /// Sender's display name
        #[serde(rename = "fromName")]
        from_name: String,
        /// Addressed participant
        to: ParticipantId,
        /// The candidate
        signal: RTCIceCandidateInit,
    },

    /// The sender left the call
    CallEnded {
        /// Sender
        from: ParticipantId,
        /// Sender's display name
        #[serde(rename = "fromName")]
        from_name: String,
        /// Absent on a full hangup (broadcast)
        #[serde(default, skip_serializing_if = "Option::is_none")]
        to: Option<ParticipantId>,
    },
}

impl SignalMessage {
    /// The sending participant
    pub fn from(&self) -> &ParticipantId {
        match self {
            Self::CallInitiated { from, .. }
            | Self::Offer { from, .. }
            | Self::Answer { from, .. }
            | Self::IceCandidate { from, .. }
            | Self::CallEnded { from, .. } => from,
        }
    }

    /// The sender's display name
    pub fn from_name(&self) -> &str {
        match self {
            Self::CallInitiated { from_name, .. }
            | Self::Offer { from_name, .. }
            | Self::Answer { from_name, .. }
            | Self::IceCandidate { from_name, .. }
            | Self::CallEnded { from_name, .. } => from_name,
        }
    }

    /// The addressed participant, or `None` for a broadcast
    pub fn to(&self) -> Option<&ParticipantId> {
        match self {
            Self::CallInitiated { .. } => None,
            Self::Offer { to, .. } | Self::Answer { to, .. } | Self::IceCandidate { to, .. } => {
                Some(to)
            }
            Self::CallEnded { to, .. } => to.as_ref(),
        }
    }

    /// The wire `kind` tag, for logging
    pub fn kind(&self) -> &'static str {
        match self {
            Self::CallInitiated { .. } => "call-initiated",
            Self::Offer { .. } => "offer",
            Self::Answer { .. } => "answer",
            Self::IceCandidate { .. } => "ice-candidate",
            Self::CallEnded { .. } => "call-ended",
        }
    }

    /// Serialize for publishing
    pub fn encode(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::InvalidSignal(e.to_string()))
    }

    /// Parse and validate an inbound payload
    ///
    /// # Errors
    ///
    /// Returns `InvalidSignal` for anything that is not a well-formed
    /// message; callers drop such payloads with a warning rather than
    /// letting them reach the state machine.
    pub fn decode(payload: &str) -> Result<Self> {
        serde_json::from_str(payload).map_err(|e| Error::InvalidSignal(e.to_string()))
    }
}
