//! Shared test harness
//!
//! Provides a scripted session transport (recording every call the
//! negotiation state machine makes), a factory the registry can be pointed
//! at, and helpers for standing up full participants over the in-process
//! signaling hub.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

use roomcall::events::{CallEvent, PeerEvent};
use roomcall::media::{MediaTrack, RemoteTrack, SyntheticCapture, TrackKind};
use roomcall::peer::{SessionTransport, TransportFactory};
use roomcall::signaling::{LocalSignalingHub, ParticipantId, SignalMessage};
use roomcall::{
    CallConfig, CallSessionController, LocalIdentity, Result, RoomMember,
};

/// Minimal well-formed SDP accepted by the session-description parser
pub fn fake_sdp() -> String {
    "v=0\r\no=- 4242 2 IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\n".to_string()
}

/// A numbered host candidate
pub fn candidate(n: u32) -> RTCIceCandidateInit {
    RTCIceCandidateInit {
        candidate: format!("candidate:{n} 1 UDP 2122260223 10.0.0.{n} 4444{n} typ host"),
        ..Default::default()
    }
}

/// Scripted session transport
///
/// Returns parseable descriptions, records every applied candidate and
/// replaced track in order, and lets tests inject transport events (remote
/// tracks, generated candidates) as the real transport would.
pub struct FakeTransport {
    participant: ParticipantId,
    events: mpsc::UnboundedSender<PeerEvent>,
    pub applied_candidates: StdMutex<Vec<String>>,
    pub outgoing_tracks: StdMutex<Vec<String>>,
    pub video_replacements: StdMutex<Vec<String>>,
    pub closed: AtomicBool,
}

impl FakeTransport {
    fn new(participant: ParticipantId, events: mpsc::UnboundedSender<PeerEvent>) -> Arc<Self> {
        Arc::new(Self {
            participant,
            events,
            applied_candidates: StdMutex::new(Vec::new()),
            outgoing_tracks: StdMutex::new(Vec::new()),
            video_replacements: StdMutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        })
    }

    /// The remote participant this transport talks to
    pub fn participant(&self) -> &ParticipantId {
        &self.participant
    }

    /// Candidates applied so far, in order
    pub fn applied(&self) -> Vec<String> {
        self.applied_candidates.lock().unwrap().clone()
    }

    /// Video track sources passed to `replace_video_track`, in order
    pub fn replacements(&self) -> Vec<String> {
        self.video_replacements.lock().unwrap().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Simulate the remote sending one audio and one video track
    pub fn emit_remote_tracks(&self) {
        let stream_id = format!("stream-{}", self.participant);
        for (id, kind) in [("audio-0", TrackKind::Audio), ("video-0", TrackKind::Video)] {
            let _ = self.events.send(PeerEvent::RemoteTrackAdded {
                participant: self.participant.clone(),
                stream_id: stream_id.clone(),
                track: RemoteTrack::detached(id, kind),
            });
        }
    }

    /// Simulate local ICE gathering producing a candidate
    pub fn emit_candidate(&self, n: u32) {
        let _ = self.events.send(PeerEvent::CandidateGenerated {
            participant: self.participant.clone(),
            candidate: candidate(n),
        });
    }

    /// Simulate a connection-level transport failure
    pub fn emit_failure(&self) {
        let _ = self.events.send(PeerEvent::TransportFailed {
            participant: self.participant.clone(),
        });
    }
}

#[async_trait]
impl SessionTransport for FakeTransport {
    async fn create_offer(&self) -> Result<RTCSessionDescription> {
        RTCSessionDescription::offer(fake_sdp()).map_err(Into::into)
    }

    async fn create_answer(&self) -> Result<RTCSessionDescription> {
        RTCSessionDescription::answer(fake_sdp()).map_err(Into::into)
    }

    async fn set_remote_description(&self, _desc: RTCSessionDescription) -> Result<()> {
        Ok(())
    }

    async fn apply_ice_candidate(&self, candidate: RTCIceCandidateInit) -> Result<()> {
        self.applied_candidates
            .lock()
            .unwrap()
            .push(candidate.candidate);
        Ok(())
    }

    async fn add_outgoing_track(&self, track: &Arc<MediaTrack>) -> Result<()> {
        self.outgoing_tracks
            .lock()
            .unwrap()
            .push(track.source().to_string());
        Ok(())
    }

    async fn replace_video_track(&self, track: &Arc<MediaTrack>) -> Result<()> {
        self.video_replacements
            .lock()
            .unwrap()
            .push(track.source().to_string());
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Factory handing out [`FakeTransport`]s, remembering every one it made
#[derive(Default)]
pub struct FakeTransportFactory {
    created: StdMutex<Vec<Arc<FakeTransport>>>,
}

impl FakeTransportFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// The most recent transport created for a participant
    pub fn transport_for(&self, participant: &ParticipantId) -> Option<Arc<FakeTransport>> {
        self.created
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|t| t.participant() == participant)
            .cloned()
    }

    /// Every transport created for a participant, in creation order
    pub fn transports_for(&self, participant: &ParticipantId) -> Vec<Arc<FakeTransport>> {
        self.created
            .lock()
            .unwrap()
            .iter()
            .filter(|t| t.participant() == participant)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl TransportFactory for FakeTransportFactory {
    async fn create(
        &self,
        participant: &ParticipantId,
        events: mpsc::UnboundedSender<PeerEvent>,
    ) -> Result<Arc<dyn SessionTransport>> {
        let transport = FakeTransport::new(participant.clone(), events);
        self.created.lock().unwrap().push(transport.clone());
        Ok(transport as Arc<dyn SessionTransport>)
    }
}

/// One fully wired participant on the hub
pub struct TestParticipant {
    pub controller: Arc<CallSessionController>,
    pub factory: Arc<FakeTransportFactory>,
    pub events: broadcast::Receiver<CallEvent>,
}

impl TestParticipant {
    /// Stand up a connected participant with the default configuration
    pub async fn join(hub: &Arc<LocalSignalingHub>, room: &str, id: &str, name: &str) -> Self {
        Self::join_with_config(hub, room, id, name, CallConfig::default()).await
    }

    /// Stand up a connected participant
    pub async fn join_with_config(
        hub: &Arc<LocalSignalingHub>,
        room: &str,
        id: &str,
        name: &str,
        config: CallConfig,
    ) -> Self {
        let factory = FakeTransportFactory::new();
        let controller = CallSessionController::new(
            config,
            LocalIdentity {
                participant: id.into(),
                display_name: name.to_string(),
            },
            room,
            Arc::new(hub.transport()),
            SyntheticCapture::new(),
            factory.clone(),
        )
        .unwrap();
        let events = controller.subscribe();
        controller.connect().await.unwrap();
        Self {
            controller,
            factory,
            events,
        }
    }

    /// Drain currently queued events without waiting
    pub fn drain_events(&mut self) -> Vec<CallEvent> {
        let mut drained = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            drained.push(event);
        }
        drained
    }
}

/// A bare channel subscriber observing (and able to inject) room traffic
pub struct Observer {
    transport: roomcall::signaling::LocalSignaling,
    rx: mpsc::UnboundedReceiver<SignalMessage>,
}

impl Observer {
    pub async fn join(hub: &Arc<LocalSignalingHub>, room: &str) -> Self {
        let transport = hub.transport();
        let rx = {
            use roomcall::signaling::SignalingTransport;
            transport.connect(room).await.unwrap()
        };
        Self { transport, rx }
    }

    /// Inject a message into the room as if a remote participant sent it
    pub async fn inject(&self, message: SignalMessage) {
        use roomcall::signaling::SignalingTransport;
        self.transport.publish(&message).await.unwrap();
    }

    /// Drain observed messages without waiting
    pub fn drain(&mut self) -> Vec<SignalMessage> {
        let mut drained = Vec::new();
        while let Ok(msg) = self.rx.try_recv() {
            drained.push(msg);
        }
        drained
    }

    /// Count drained messages of one kind
    pub fn count_kind(messages: &[SignalMessage], kind: &str) -> usize {
        messages.iter().filter(|m| m.kind() == kind).count()
    }
}

/// Room members for the canonical three-person scenario
pub fn members() -> Vec<RoomMember> {
    ["alice", "bob", "carol"]
        .into_iter()
        .map(|id| RoomMember {
            participant: id.into(),
            display_name: id.to_uppercase(),
        })
        .collect()
}

/// Poll an async condition until it holds or a real-time deadline passes
#[macro_export]
macro_rules! wait_until {
    ($what:expr, $cond:expr) => {{
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(3);
        loop {
            if $cond {
                break;
            }
            if std::time::Instant::now() > deadline {
                panic!("timed out waiting for {}", $what);
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
    }};
}
