//! Typed events flowing out of the call subsystem
//!
//! Peer connections never reach into outer scope with closures: the
//! transport layer emits [`PeerEvent`]s onto a channel the session
//! controller consumes, and the controller publishes [`CallEvent`]s for the
//! presentation layer.

use tokio::sync::broadcast;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;

use crate::media::track::{RemoteStream, RemoteTrack};
use crate::signaling::protocol::ParticipantId;

/// Why a peer connection was closed before or after establishment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The underlying transport reported failure
    TransportFailed,
    /// `Connected` was not reached within the negotiation timeout
    NegotiationTimeout,
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CloseReason::TransportFailed => write!(f, "transport failed"),
            CloseReason::NegotiationTimeout => write!(f, "negotiation timed out"),
        }
    }
}

/// Internal events emitted per peer connection
///
/// Produced by session transports (ICE callbacks, remote tracks, state
/// changes) and by the negotiation watchdog; consumed by the session
/// controller's event loop.
#[derive(Debug, Clone)]
pub enum PeerEvent {
    /// The transport gathered a local ICE candidate to trickle out
    CandidateGenerated {
        /// Peer the candidate must be sent to
        participant: ParticipantId,
        /// The candidate, ready for the wire
        candidate: RTCIceCandidateInit,
    },

    /// A remote track arrived on the peer's transport
    RemoteTrackAdded {
        /// Peer the track came from
        participant: ParticipantId,
        /// Remote stream the track belongs to
        stream_id: String,
        /// The track
        track: RemoteTrack,
    },

    /// The transport failed at the connection level
    TransportFailed {
        /// Affected peer
        participant: ParticipantId,
    },

    /// The watchdog fired before the negotiation reached `Connected`
    NegotiationTimedOut {
        /// Affected peer
        participant: ParticipantId,
    },
}

impl PeerEvent {
    /// Event name for logging
    pub fn name(&self) -> &'static str {
        match self {
            Self::CandidateGenerated { .. } => "candidate_generated",
            Self::RemoteTrackAdded { .. } => "remote_track_added",
            Self::TransportFailed { .. } => "transport_failed",
            Self::NegotiationTimedOut { .. } => "negotiation_timed_out",
        }
    }

    /// The peer the event concerns
    pub fn participant(&self) -> &ParticipantId {
        match self {
            Self::CandidateGenerated { participant, .. }
            | Self::RemoteTrackAdded { participant, .. }
            | Self::TransportFailed { participant }
            | Self::NegotiationTimedOut { participant } => participant,
        }
    }
}

/// Events surfaced to the presentation layer
#[derive(Debug, Clone)]
pub enum CallEvent {
    /// Someone in the room wants to call; surfaced only while idle
    IncomingCall {
        /// Caller
        from: ParticipantId,
        /// Caller's display name
        from_name: String,
    },

    /// A remote participant's media became available for rendering
    RemoteStreamAttached {
        /// The participant
        participant: ParticipantId,
        /// Their display name
        display_name: String,
        /// Their stream
        stream: RemoteStream,
    },

    /// A remote participant's connection closed; drop their tile
    RemoteStreamRemoved {
        /// The participant
        participant: ParticipantId,
    },

    /// One peer could not be connected; the rest of the call continues
    PeerUnreachable {
        /// The participant
        participant: ParticipantId,
        /// Display name for the "could not connect to <name>" message
        display_name: String,
        /// What went wrong
        reason: CloseReason,
    },

    /// The local call ended
    CallEnded,
}

impl CallEvent {
    /// Event name for logging
    pub fn name(&self) -> &'static str {
        match self {
            Self::IncomingCall { .. } => "incoming_call",
            Self::RemoteStreamAttached { .. } => "remote_stream_attached",
            Self::RemoteStreamRemoved { .. } => "remote_stream_removed",
            Self::PeerUnreachable { .. } => "peer_unreachable",
            Self::CallEnded => "call_ended",
        }
    }
}

/// Capacity of the presentation-layer event channel
pub(crate) const EVENT_CHANNEL_CAPACITY: usize = 100;

/// Create the presentation-layer event channel
pub(crate) fn call_event_channel() -> broadcast::Sender<CallEvent> {
    broadcast::channel(EVENT_CHANNEL_CAPACITY).0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_names() {
        let ev = CallEvent::IncomingCall {
            from: "alice".into(),
            from_name: "Alice".to_string(),
        };
        assert_eq!(ev.name(), "incoming_call");
        assert_eq!(CallEvent::CallEnded.name(), "call_ended");
    }

    #[test]
    fn test_peer_event_participant() {
        let ev = PeerEvent::TransportFailed {
            participant: "bob".into(),
        };
        assert_eq!(ev.participant().as_str(), "bob");
        assert_eq!(ev.name(), "transport_failed");
    }
}
