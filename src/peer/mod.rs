//! Per-peer negotiation and the connection registry
//!
//! Handles the offer/answer state machine, ICE candidate buffering, and
//! pairwise session lifecycle.

pub mod connection;
pub mod registry;
pub mod transport;

pub use connection::{NegotiationState, PeerConnection};
pub use registry::PeerRegistry;
pub use transport::{RtcTransport, RtcTransportFactory, SessionTransport, TransportFactory};
