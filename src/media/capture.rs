//! Local media capture
//!
//! [`MediaCaptureController`] owns the single active local stream: camera
//! and microphone acquisition with rollback, mute toggles, and the screen
//! share replace-track flow. Device I/O itself sits behind the
//! [`CaptureBackend`] seam: the embedding application supplies the real
//! devices, while [`SyntheticCapture`] generates test signals for demos and
//! the test suite.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::media::Sample;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

use super::track::{LocalStream, MediaTrack};
use crate::error::MediaSource;
use crate::peer::connection::PeerConnection;
use crate::{Error, Result};

/// Device acquisition seam
///
/// Implementations open OS capture devices and pump their frames into the
/// returned track until it is stopped. Failures map onto the user-facing
/// taxonomy: `PermissionDenied`, `DeviceUnavailable`,
/// `ScreenShareUnsupported`.
#[async_trait]
pub trait CaptureBackend: Send + Sync {
    /// Open the camera and start producing video samples
    async fn open_camera(&self) -> Result<Arc<MediaTrack>>;

    /// Open the microphone and start producing audio samples
    async fn open_microphone(&self) -> Result<Arc<MediaTrack>>;

    /// Open a display capture and start producing video samples
    async fn open_display(&self) -> Result<Arc<MediaTrack>>;
}

/// Opus DTX silence frame (mono); a valid no-signal payload
const OPUS_SILENCE: [u8; 3] = [0xf8, 0xff, 0xfe];

const AUDIO_FRAME: Duration = Duration::from_millis(20);
const VIDEO_FRAME: Duration = Duration::from_millis(33);

/// Synthetic capture source
///
/// Produces placeholder payloads at real capture cadence (20 ms audio
/// frames, ~30 fps video) so the full attach/replace/mute pipeline can run
/// without hardware. Used by the demo binary and the test suite.
pub struct SyntheticCapture {
    display_supported: bool,
}

impl SyntheticCapture {
    /// A source with camera, microphone and display capture
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            display_supported: true,
        })
    }

    /// A source whose platform lacks display capture
    pub fn without_display() -> Arc<Self> {
        Arc::new(Self {
            display_supported: false,
        })
    }

    fn open(&self, source: MediaSource) -> Arc<MediaTrack> {
        let (mime, frame): (&str, Duration) = match source {
            MediaSource::Microphone => (MIME_TYPE_OPUS, AUDIO_FRAME),
            MediaSource::Camera | MediaSource::Display => (MIME_TYPE_VP8, VIDEO_FRAME),
        };

        let rtc = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: mime.to_string(),
                ..Default::default()
            },
            format!("{}-{}", source, uuid::Uuid::new_v4()),
            "synthetic-capture".to_string(),
        ));
        let track = MediaTrack::new(source, rtc);

        let payload: Vec<u8> = match source {
            MediaSource::Microphone => OPUS_SILENCE.to_vec(),
            MediaSource::Camera | MediaSource::Display => vec![0u8; 128],
        };
        Self::spawn_pump(track.clone(), payload, frame);

        debug!("opened synthetic {} track", source);
        track
    }

    fn spawn_pump(track: Arc<MediaTrack>, payload: Vec<u8>, frame: Duration) {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(frame);
            let mut ended = track.ended();
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if !track.is_enabled() {
                            continue;
                        }
                        let sample = Sample {
                            data: payload.clone().into(),
                            duration: frame,
                            ..Default::default()
                        };
                        // No peer bound yet is fine; keep pacing
                        let _ = track.sample_track().write_sample(&sample).await;
                    }
                    changed = ended.changed() => {
                        if changed.is_err() || *ended.borrow() {
                            break;
                        }
                    }
                }
            }
            debug!("synthetic {} pump stopped", track.source());
        });
    }
}

#[async_trait]
impl CaptureBackend for SyntheticCapture {
    async fn open_camera(&self) -> Result<Arc<MediaTrack>> {
        Ok(self.open(MediaSource::Camera))
    }

    async fn open_microphone(&self) -> Result<Arc<MediaTrack>> {
        Ok(self.open(MediaSource::Microphone))
    }

    async fn open_display(&self) -> Result<Arc<MediaTrack>> {
        if !self.display_supported {
            return Err(Error::ScreenShareUnsupported);
        }
        Ok(self.open(MediaSource::Display))
    }
}

struct ActiveCapture {
    stream: Arc<LocalStream>,
    screen: Option<Arc<MediaTrack>>,
}

/// Owns local capture for the duration of a call
///
/// Acquisition is idempotent and rolls back partial acquisition on failure;
/// release stops every track and runs on all exit paths (call end, error,
/// teardown).
pub struct MediaCaptureController {
    backend: Arc<dyn CaptureBackend>,
    active: Mutex<Option<ActiveCapture>>,
}

impl MediaCaptureController {
    /// Create a controller over a capture backend
    pub fn new(backend: Arc<dyn CaptureBackend>) -> Self {
        Self {
            backend,
            active: Mutex::new(None),
        }
    }

    /// Acquire the local stream
    ///
    /// Returns the existing stream if one is already active rather than
    /// requesting the devices twice. On a partial failure (camera opened,
    /// microphone refused) the opened track is stopped before the error
    /// propagates.
    pub async fn acquire(&self, video: bool, audio: bool) -> Result<Arc<LocalStream>> {
        let mut active = self.active.lock().await;
        if let Some(capture) = active.as_ref() {
            debug!("local stream already active, reusing");
            return Ok(capture.stream.clone());
        }

        let video_track = if video {
            Some(self.backend.open_camera().await?)
        } else {
            None
        };

        let audio_track = if audio {
            match self.backend.open_microphone().await {
                Ok(track) => Some(track),
                Err(e) => {
                    if let Some(track) = &video_track {
                        track.stop();
                    }
                    return Err(e);
                }
            }
        } else {
            None
        };

        let stream = LocalStream::new(video_track, audio_track);
        info!("acquired local stream {}", stream.id());
        *active = Some(ActiveCapture {
            stream: stream.clone(),
            screen: None,
        });
        Ok(stream)
    }

    /// Stop every track and drop the active stream
    ///
    /// Safe to call with no stream active.
    pub async fn release(&self) {
        let mut active = self.active.lock().await;
        if let Some(capture) = active.take() {
            if let Some(screen) = &capture.screen {
                screen.stop();
            }
            capture.stream.stop_all();
            info!("released local stream {}", capture.stream.id());
        }
    }

    /// The active stream, if a call is up
    pub async fn active_stream(&self) -> Option<Arc<LocalStream>> {
        self.active.lock().await.as_ref().map(|c| c.stream.clone())
    }

    /// Set the camera mute flag; no renegotiation, the track object is
    /// unchanged
    pub async fn set_video_enabled(&self, enabled: bool) -> Result<()> {
        self.update_track(|c| c.stream.video().cloned(), |_| enabled)
            .await
            .map(|_| ())
    }

    /// Set the microphone mute flag; no renegotiation, the track object is
    /// unchanged
    pub async fn set_audio_enabled(&self, enabled: bool) -> Result<()> {
        self.update_track(|c| c.stream.audio().cloned(), |_| enabled)
            .await
            .map(|_| ())
    }

    /// Flip the camera mute flag; returns the new state
    pub async fn toggle_video(&self) -> Result<bool> {
        self.update_track(|c| c.stream.video().cloned(), |t| !t.is_enabled())
            .await
    }

    /// Flip the microphone mute flag; returns the new state
    pub async fn toggle_audio(&self) -> Result<bool> {
        self.update_track(|c| c.stream.audio().cloned(), |t| !t.is_enabled())
            .await
    }

    async fn update_track(
        &self,
        select: impl FnOnce(&ActiveCapture) -> Option<Arc<MediaTrack>>,
        update: impl FnOnce(&MediaTrack) -> bool,
    ) -> Result<bool> {
        let active = self.active.lock().await;
        let capture = active
            .as_ref()
            .ok_or_else(|| Error::InvalidState("no active local stream".to_string()))?;
        let track = select(capture)
            .ok_or_else(|| Error::InvalidState("stream has no such track".to_string()))?;
        let enabled = update(&track);
        track.set_enabled(enabled);
        debug!("{} track enabled={}", track.source(), enabled);
        Ok(enabled)
    }

    /// Start a display capture, making it the outgoing video source
    ///
    /// Idempotent while a share is active. The camera track keeps running so
    /// it can be restored without a new device request.
    pub async fn start_screen_share(&self) -> Result<Arc<MediaTrack>> {
        let mut active = self.active.lock().await;
        let capture = active
            .as_mut()
            .ok_or_else(|| Error::InvalidState("no active local stream".to_string()))?;
        if let Some(screen) = &capture.screen {
            debug!("screen share already active, reusing");
            return Ok(screen.clone());
        }

        let screen = self.backend.open_display().await?;
        info!("screen share started");
        capture.screen = Some(screen.clone());
        Ok(screen)
    }

    /// Stop the display capture and hand back the camera track to restore
    pub async fn stop_screen_share(&self) -> Result<Arc<MediaTrack>> {
        let mut active = self.active.lock().await;
        let capture = active
            .as_mut()
            .ok_or_else(|| Error::InvalidState("no active local stream".to_string()))?;
        let screen = capture
            .screen
            .take()
            .ok_or_else(|| Error::InvalidState("screen share is not active".to_string()))?;
        screen.stop();
        info!("screen share stopped");
        capture
            .stream
            .video()
            .cloned()
            .ok_or_else(|| Error::InvalidState("stream has no camera track".to_string()))
    }

    /// Whether a display capture is the outgoing video source
    pub async fn screen_share_active(&self) -> bool {
        self.active
            .lock()
            .await
            .as_ref()
            .is_some_and(|c| c.screen.is_some())
    }

    /// The currently outgoing video track (display while sharing, else camera)
    pub async fn outgoing_video_track(&self) -> Option<Arc<MediaTrack>> {
        let active = self.active.lock().await;
        let capture = active.as_ref()?;
        capture
            .screen
            .clone()
            .or_else(|| capture.stream.video().cloned())
    }

    /// Swap the outgoing video track on every active peer connection
    ///
    /// In-place sender replacement: no renegotiation, no signaling traffic.
    /// A failure on one peer is logged and does not affect the others.
    pub async fn replace_outgoing_video_track(
        &self,
        connections: &[Arc<PeerConnection>],
        track: &Arc<MediaTrack>,
    ) {
        for conn in connections {
            if let Err(e) = conn.replace_video_track(track).await {
                warn!(
                    "failed to replace video track for {}: {}",
                    conn.participant(),
                    e
                );
            }
        }
    }
}
