//! Call session lifecycle and orchestration

pub mod controller;

pub use controller::{CallPhase, CallSessionController, LocalIdentity, RoomMember};
