//! Local and remote track plumbing
//!
//! A [`MediaTrack`] wraps an outgoing `TrackLocalStaticSample` together with
//! the mute flag and the end-of-stream watch. Muting flips `enabled` only;
//! the track object itself is unchanged, so no renegotiation is ever needed.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::watch;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

use crate::error::MediaSource;

/// Media kind of a track
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    /// Audio track
    Audio,
    /// Video track
    Video,
}

impl fmt::Display for TrackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackKind::Audio => write!(f, "audio"),
            TrackKind::Video => write!(f, "video"),
        }
    }
}

/// An outgoing local media track
///
/// Producers (capture backends) write samples to the underlying track while
/// `enabled` is set and stop at end-of-stream. The same track instance is
/// attached outward to every peer connection in the mesh.
pub struct MediaTrack {
    source: MediaSource,
    rtc: Arc<TrackLocalStaticSample>,
    enabled: AtomicBool,
    ended_tx: watch::Sender<bool>,
}

impl MediaTrack {
    /// Wrap a sample track produced by a capture backend
    pub fn new(source: MediaSource, rtc: Arc<TrackLocalStaticSample>) -> Arc<Self> {
        let (ended_tx, _) = watch::channel(false);
        Arc::new(Self {
            source,
            rtc,
            enabled: AtomicBool::new(true),
            ended_tx,
        })
    }

    /// The capture source this track came from
    pub fn source(&self) -> MediaSource {
        self.source
    }

    /// Media kind derived from the source
    pub fn kind(&self) -> TrackKind {
        match self.source {
            MediaSource::Microphone => TrackKind::Audio,
            MediaSource::Camera | MediaSource::Display => TrackKind::Video,
        }
    }

    /// The underlying sample track
    pub fn sample_track(&self) -> Arc<TrackLocalStaticSample> {
        Arc::clone(&self.rtc)
    }

    /// The track as the trait object peer connections attach
    pub fn local(&self) -> Arc<dyn TrackLocal + Send + Sync> {
        Arc::clone(&self.rtc) as Arc<dyn TrackLocal + Send + Sync>
    }

    /// Whether samples are currently flowing (mute flag)
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Flip the mute flag; no signaling, no renegotiation
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    /// Mark the track ended, stopping its producer
    ///
    /// Safe to call more than once.
    pub fn stop(&self) {
        self.ended_tx.send_replace(true);
    }

    /// Whether the producer has stopped
    pub fn is_ended(&self) -> bool {
        *self.ended_tx.borrow()
    }

    /// Subscribe to the end-of-stream signal
    ///
    /// Fires both on explicit [`stop`](Self::stop) and when the capture
    /// source ends out-of-band (e.g. the user stops a screen share from the
    /// OS control).
    pub fn ended(&self) -> watch::Receiver<bool> {
        self.ended_tx.subscribe()
    }
}

impl fmt::Debug for MediaTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaTrack")
            .field("source", &self.source)
            .field("enabled", &self.is_enabled())
            .field("ended", &self.is_ended())
            .finish()
    }
}

/// The local capture stream attached outward to every peer
///
/// Exactly one instance is active at a time; a screen share replaces the
/// outgoing video track in place rather than creating a second stream.
pub struct LocalStream {
    id: String,
    video: Option<Arc<MediaTrack>>,
    audio: Option<Arc<MediaTrack>>,
}

impl LocalStream {
    /// Group freshly opened tracks into a stream
    pub fn new(video: Option<Arc<MediaTrack>>, audio: Option<Arc<MediaTrack>>) -> Arc<Self> {
        Arc::new(Self {
            id: uuid::Uuid::new_v4().to_string(),
            video,
            audio,
        })
    }

    /// Stream identifier
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The camera track, if video was requested
    pub fn video(&self) -> Option<&Arc<MediaTrack>> {
        self.video.as_ref()
    }

    /// The microphone track, if audio was requested
    pub fn audio(&self) -> Option<&Arc<MediaTrack>> {
        self.audio.as_ref()
    }

    /// All tracks in the stream
    pub fn tracks(&self) -> Vec<Arc<MediaTrack>> {
        self.video
            .iter()
            .chain(self.audio.iter())
            .cloned()
            .collect()
    }

    /// Number of tracks whose producer is still running
    pub fn live_track_count(&self) -> usize {
        self.tracks().iter().filter(|t| !t.is_ended()).count()
    }

    /// Stop every track in the stream
    pub fn stop_all(&self) {
        for track in self.tracks() {
            track.stop();
        }
    }
}

impl fmt::Debug for LocalStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalStream")
            .field("id", &self.id)
            .field("video", &self.video.is_some())
            .field("audio", &self.audio.is_some())
            .field("live_tracks", &self.live_track_count())
            .finish()
    }
}

/// A track received from a remote participant
///
/// Carries the RTP-level track when the session runs over the real
/// media-transport library; alternative transports surface a detached handle
/// with the same identity fields.
#[derive(Clone)]
pub struct RemoteTrack {
    id: String,
    kind: TrackKind,
    rtc: Option<Arc<TrackRemote>>,
}

impl RemoteTrack {
    /// Wrap an RTP track delivered by the media-transport library
    pub fn from_rtc(track: Arc<TrackRemote>) -> Self {
        let kind = if track.kind() == webrtc::rtp_transceiver::rtp_codec::RTPCodecType::Audio {
            TrackKind::Audio
        } else {
            TrackKind::Video
        };
        Self {
            id: track.id(),
            kind,
            rtc: Some(track),
        }
    }

    /// A handle with no RTP backing (non-RTC session transports)
    pub fn detached(id: impl Into<String>, kind: TrackKind) -> Self {
        Self {
            id: id.into(),
            kind,
            rtc: None,
        }
    }

    /// Track identifier
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Media kind
    pub fn kind(&self) -> TrackKind {
        self.kind
    }

    /// The RTP track, when backed by the media-transport library
    pub fn rtc(&self) -> Option<&Arc<TrackRemote>> {
        self.rtc.as_ref()
    }
}

impl fmt::Debug for RemoteTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteTrack")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("rtp_backed", &self.rtc.is_some())
            .finish()
    }
}

/// The set of tracks a remote participant is sending us
///
/// Surfaced to the presentation layer exactly once per peer, when the first
/// remote track arrives; later tracks join the same stream silently.
#[derive(Debug, Clone)]
pub struct RemoteStream {
    stream_id: String,
    tracks: Vec<RemoteTrack>,
}

impl RemoteStream {
    /// Start a stream from its first track
    pub fn new(stream_id: impl Into<String>, first: RemoteTrack) -> Self {
        Self {
            stream_id: stream_id.into(),
            tracks: vec![first],
        }
    }

    /// Remote stream identifier
    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    /// Tracks received so far
    pub fn tracks(&self) -> &[RemoteTrack] {
        &self.tracks
    }

    /// Add a later track to the stream
    pub fn push_track(&mut self, track: RemoteTrack) {
        self.tracks.push(track);
    }

    /// Whether a track of the given kind has arrived
    pub fn has_kind(&self, kind: TrackKind) -> bool {
        self.tracks.iter().any(|t| t.kind() == kind)
    }
}
