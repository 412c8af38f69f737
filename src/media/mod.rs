//! Local media capture and track plumbing

pub mod capture;
pub mod track;

pub use capture::{CaptureBackend, MediaCaptureController, SyntheticCapture};
pub use track::{LocalStream, MediaTrack, RemoteStream, RemoteTrack, TrackKind};
