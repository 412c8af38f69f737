//! Session transport seam
//!
//! The negotiation state machine drives one negotiated transport per remote
//! participant through [`SessionTransport`]; [`RtcTransport`] is the
//! production implementation over the media-transport library. Transport
//! callbacks (ICE gathering, remote tracks, connection state) are not
//! exposed as closures; they are converted to typed [`PeerEvent`]s on the
//! channel the session controller consumes.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;

use crate::config::CallConfig;
use crate::events::PeerEvent;
use crate::media::track::{MediaTrack, RemoteTrack, TrackKind};
use crate::signaling::protocol::ParticipantId;
use crate::{Error, Result};

/// One negotiated transport to one remote participant
#[async_trait]
pub trait SessionTransport: Send + Sync {
    /// Create an offer and apply it as the local description
    async fn create_offer(&self) -> Result<RTCSessionDescription>;

    /// Create an answer to the applied remote offer and apply it as the
    /// local description
    async fn create_answer(&self) -> Result<RTCSessionDescription>;

    /// Apply the remote peer's description (offer or answer)
    async fn set_remote_description(&self, desc: RTCSessionDescription) -> Result<()>;

    /// Apply a trickled remote ICE candidate
    ///
    /// Callers must only invoke this after the remote description is set;
    /// earlier candidates are buffered by the state machine.
    async fn apply_ice_candidate(&self, candidate: RTCIceCandidateInit) -> Result<()>;

    /// Attach an outgoing local track
    async fn add_outgoing_track(&self, track: &Arc<MediaTrack>) -> Result<()>;

    /// Swap the outgoing video track in place; no renegotiation
    async fn replace_video_track(&self, track: &Arc<MediaTrack>) -> Result<()>;

    /// Close the transport and release its resources
    async fn close(&self) -> Result<()>;
}

/// Constructs session transports for the registry
#[async_trait]
pub trait TransportFactory: Send + Sync {
    /// Build a transport for one remote participant, wiring its events onto
    /// the controller's channel
    async fn create(
        &self,
        participant: &ParticipantId,
        events: mpsc::UnboundedSender<PeerEvent>,
    ) -> Result<Arc<dyn SessionTransport>>;
}

/// Production transport over the media-transport library
pub struct RtcTransport {
    participant: ParticipantId,
    pc: Arc<RTCPeerConnection>,
    video_sender: Mutex<Option<Arc<RTCRtpSender>>>,
}

impl RtcTransport {
    /// Create a peer connection with the configured ICE servers and wire
    /// its callbacks onto the event channel
    pub async fn new(
        config: &CallConfig,
        participant: ParticipantId,
        events: mpsc::UnboundedSender<PeerEvent>,
    ) -> Result<Arc<Self>> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs()?;
        let registry = register_default_interceptors(Registry::new(), &mut media_engine)?;
        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let pc = Arc::new(api.new_peer_connection(rtc_configuration(config)).await?);
        info!("created peer transport for {}", participant);

        let candidate_events = events.clone();
        let candidate_peer = participant.clone();
        pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            if let Some(candidate) = candidate {
                match candidate.to_json() {
                    Ok(init) => {
                        let _ = candidate_events.send(PeerEvent::CandidateGenerated {
                            participant: candidate_peer.clone(),
                            candidate: init,
                        });
                    }
                    Err(e) => warn!("failed to serialize local candidate: {}", e),
                }
            } else {
                debug!("candidate gathering for {} complete", candidate_peer);
            }
            Box::pin(async {})
        }));

        let track_events = events.clone();
        let track_peer = participant.clone();
        pc.on_track(Box::new(move |track, _receiver, _transceiver| {
            debug!(
                "remote {} track {} from {}",
                track.kind(),
                track.id(),
                track_peer
            );
            let _ = track_events.send(PeerEvent::RemoteTrackAdded {
                participant: track_peer.clone(),
                stream_id: track.stream_id(),
                track: RemoteTrack::from_rtc(track),
            });
            Box::pin(async {})
        }));

        let state_peer = participant.clone();
        pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
            debug!("transport state for {}: {:?}", state_peer, state);
            if state == RTCPeerConnectionState::Failed {
                let _ = events.send(PeerEvent::TransportFailed {
                    participant: state_peer.clone(),
                });
            }
            Box::pin(async {})
        }));

        Ok(Arc::new(Self {
            participant,
            pc,
            video_sender: Mutex::new(None),
        }))
    }
}

#[async_trait]
impl SessionTransport for RtcTransport {
    async fn create_offer(&self) -> Result<RTCSessionDescription> {
        let offer = self.pc.create_offer(None).await?;
        self.pc.set_local_description(offer.clone()).await?;
        debug!("local offer set for {}", self.participant);
        Ok(offer)
    }

    async fn create_answer(&self) -> Result<RTCSessionDescription> {
        let answer = self.pc.create_answer(None).await?;
        self.pc.set_local_description(answer.clone()).await?;
        debug!("local answer set for {}", self.participant);
        Ok(answer)
    }

    async fn set_remote_description(&self, desc: RTCSessionDescription) -> Result<()> {
        self.pc.set_remote_description(desc).await?;
        debug!("remote description set for {}", self.participant);
        Ok(())
    }

    async fn apply_ice_candidate(&self, candidate: RTCIceCandidateInit) -> Result<()> {
        self.pc.add_ice_candidate(candidate).await?;
        Ok(())
    }

    async fn add_outgoing_track(&self, track: &Arc<MediaTrack>) -> Result<()> {
        let sender = self.pc.add_track(track.local()).await?;
        if track.kind() == TrackKind::Video {
            *self.video_sender.lock().await = Some(sender);
        }
        debug!(
            "attached outgoing {} track to {}",
            track.kind(),
            self.participant
        );
        Ok(())
    }

    async fn replace_video_track(&self, track: &Arc<MediaTrack>) -> Result<()> {
        let sender = self.video_sender.lock().await;
        let sender = sender.as_ref().ok_or_else(|| {
            Error::InvalidState(format!("no outgoing video sender for {}", self.participant))
        })?;
        sender.replace_track(Some(track.local())).await?;
        debug!(
            "outgoing video track for {} replaced with {} source",
            self.participant,
            track.source()
        );
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.pc.close().await?;
        info!("closed peer transport for {}", self.participant);
        Ok(())
    }
}

fn rtc_configuration(config: &CallConfig) -> RTCConfiguration {
    let mut ice_servers = vec![RTCIceServer {
        urls: config.stun_servers.clone(),
        ..Default::default()
    }];

    for turn in &config.turn_servers {
        ice_servers.push(RTCIceServer {
            urls: vec![turn.url.clone()],
            username: turn.username.clone(),
            credential: turn.credential.clone(),
        });
    }

    RTCConfiguration {
        ice_servers,
        ..Default::default()
    }
}

/// Factory producing [`RtcTransport`]s from the call configuration
pub struct RtcTransportFactory {
    config: CallConfig,
}

impl RtcTransportFactory {
    /// Create a factory for the given configuration
    pub fn new(config: CallConfig) -> Arc<Self> {
        Arc::new(Self { config })
    }
}

#[async_trait]
impl TransportFactory for RtcTransportFactory {
    async fn create(
        &self,
        participant: &ParticipantId,
        events: mpsc::UnboundedSender<PeerEvent>,
    ) -> Result<Arc<dyn SessionTransport>> {
        let transport = RtcTransport::new(&self.config, participant.clone(), events).await?;
        Ok(transport as Arc<dyn SessionTransport>)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TurnServerConfig;
    use crate::media::capture::{CaptureBackend, SyntheticCapture};

    #[test]
    fn test_rtc_configuration_includes_turn_credentials() {
        let mut config = CallConfig::default();
        config.turn_servers.push(TurnServerConfig {
            url: "turn:turn.example.com:3478".to_string(),
            username: "user".to_string(),
            credential: "secret".to_string(),
        });

        let rtc = rtc_configuration(&config);
        assert_eq!(rtc.ice_servers.len(), 2);
        assert_eq!(rtc.ice_servers[1].username, "user");
        assert_eq!(rtc.ice_servers[1].credential, "secret");
    }

    #[tokio::test]
    async fn test_rtc_transport_creation_and_close() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let transport = RtcTransport::new(&CallConfig::default(), "peer-1".into(), tx)
            .await
            .unwrap();

        transport.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_replace_without_sender_fails() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let transport = RtcTransport::new(&CallConfig::default(), "peer-1".into(), tx)
            .await
            .unwrap();

        let track = SyntheticCapture::new().open_camera().await.unwrap();
        assert!(transport.replace_video_track(&track).await.is_err());
        transport.close().await.unwrap();
    }
}
