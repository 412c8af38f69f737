//! Signaling protocol and transports
//!
//! The negotiation state machine is transport-agnostic: inbound messages
//! arrive on a channel returned by [`SignalingTransport::connect`] and
//! outbound messages go through [`SignalingTransport::publish`]. Two network
//! transports are provided, a push (WebSocket) subscription and an HTTP
//! polling fallback, plus an in-process hub for tests and demos.

pub mod local;
pub mod polling;
pub mod protocol;
pub mod push;
pub mod transport;

pub use local::{LocalSignaling, LocalSignalingHub};
pub use polling::PollingSignaling;
pub use protocol::{ParticipantId, SignalMessage};
pub use push::PushSignaling;
pub use transport::{connect_any, room_channel, SignalingTransport};
