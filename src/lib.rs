//! Mesh audio/video calling for collaborative study rooms
//!
//! This crate implements the real-time call subsystem of a study-room
//! application: a full mesh of pairwise WebRTC sessions among the room's
//! participants, negotiated over a room-scoped pub/sub signaling channel,
//! with local capture management (camera, microphone, screen share) and
//! deterministic teardown of every session and device resource.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │  Presentation layer (room UI)                            │
//! │  ↑ CallEvent broadcast          ↓ start/accept/end/...   │
//! │  CallSessionController                                   │
//! │  ├─ SignalingTransport (push WS / HTTP polling / local)  │
//! │  ├─ MediaCaptureController (CaptureBackend seam)         │
//! │  └─ PeerRegistry (mesh of PeerConnections)               │
//! │      └─ per-peer negotiation state machine               │
//! │          └─ SessionTransport (webrtc-rs)                 │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! Inbound messages flow signaling → controller → the addressed
//! [`PeerConnection`](peer::PeerConnection) (created on first contact);
//! outbound messages flow peer events → controller → signaling. Each
//! pairwise negotiation runs independently: a failure or hangup on one
//! closes only that session, never the rest of the mesh.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use roomcall::{
//!     CallConfig, CallSessionController, LocalIdentity, RoomMember,
//!     media::SyntheticCapture, peer::RtcTransportFactory, signaling,
//! };
//!
//! let config = CallConfig::default();
//! let (transport, _probe) = signaling::connect_any(&config.signaling, "study-42").await?;
//!
//! let controller = CallSessionController::new(
//!     config.clone(),
//!     LocalIdentity { participant: "alice".into(), display_name: "Alice".into() },
//!     "study-42",
//!     transport,
//!     SyntheticCapture::new(),
//!     RtcTransportFactory::new(config),
//! )?;
//! controller.connect().await?;
//!
//! let members = vec![RoomMember { participant: "bob".into(), display_name: "Bob".into() }];
//! controller.start_call(&members).await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod events;
pub mod media;
pub mod peer;
pub mod session;
pub mod signaling;

pub use config::{CallConfig, SignalingConfig, TurnServerConfig};
pub use error::{Error, MediaSource, Result};
pub use events::{CallEvent, CloseReason};
pub use session::{CallPhase, CallSessionController, LocalIdentity, RoomMember};
pub use signaling::{ParticipantId, SignalMessage};

/// Get the version of this crate
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!version().is_empty());
    }
}
