//! Error types for the call subsystem

use std::fmt;

use thiserror::Error;

/// Convenience result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// A local media source that can fail to open
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaSource {
    /// Camera video capture
    Camera,
    /// Microphone audio capture
    Microphone,
    /// Screen/display capture
    Display,
}

impl fmt::Display for MediaSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaSource::Camera => write!(f, "camera"),
            MediaSource::Microphone => write!(f, "microphone"),
            MediaSource::Display => write!(f, "display"),
        }
    }
}

/// Errors surfaced by the call subsystem
///
/// Media-acquisition failures (`PermissionDenied`, `DeviceUnavailable`,
/// `ScreenShareUnsupported`) are user-facing: the user must grant access or
/// pick another device, so they propagate to the caller without retry.
/// `SignalingUnavailable` at startup disables the call feature entirely.
/// Per-peer negotiation failures close only the affected peer connection.
#[derive(Debug, Error)]
pub enum Error {
    /// Device access was denied by the OS or the user
    #[error("permission denied for {0}; check device permissions")]
    PermissionDenied(MediaSource),

    /// The requested device does not exist or is busy
    #[error("{0} unavailable")]
    DeviceUnavailable(MediaSource),

    /// The platform has no display-capture capability
    #[error("screen capture is not supported on this platform")]
    ScreenShareUnsupported,

    /// The signaling transport could not be established
    #[error("signaling unavailable: {0}")]
    SignalingUnavailable(String),

    /// Offer/answer exchange or ICE establishment failed for one peer
    #[error("negotiation with {participant} failed: {reason}")]
    NegotiationFailed {
        /// Remote participant the negotiation was with
        participant: String,
        /// Failure detail
        reason: String,
    },

    /// Configuration failed validation
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// An inbound signaling payload failed boundary validation
    #[error("invalid signal: {0}")]
    InvalidSignal(String),

    /// A signaling publish or subscription error
    #[error("signaling error: {0}")]
    Signaling(String),

    /// The operation is not legal in the current call/negotiation state
    #[error("invalid call state: {0}")]
    InvalidState(String),

    /// An error bubbled up from the underlying media-transport library
    #[error(transparent)]
    Rtc(#[from] webrtc::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_media_source_display() {
        assert_eq!(MediaSource::Camera.to_string(), "camera");
        assert_eq!(MediaSource::Display.to_string(), "display");
    }

    #[test]
    fn test_permission_denied_message_is_actionable() {
        let err = Error::PermissionDenied(MediaSource::Microphone);
        assert!(err.to_string().contains("permissions"));
    }
}
