//! Per-peer negotiation state machine
//!
//! One [`PeerConnection`] exists per remote participant, owned by the
//! registry. It drives the offer/answer exchange over its session transport
//! and buffers remote ICE candidates that race ahead of the descriptions on
//! the unordered signaling channel. Each negotiation runs independently of
//! every other peer's; there is no shared lock across the mesh.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

use super::transport::SessionTransport;
use crate::events::PeerEvent;
use crate::media::track::{MediaTrack, RemoteStream, RemoteTrack};
use crate::signaling::protocol::ParticipantId;
use crate::{Error, Result};

/// Negotiation state of one pairwise session
///
/// `Closed` is reachable from every state (failure, timeout, hangup).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationState {
    /// Created, no description exchanged yet
    New,
    /// Local offer sent, waiting for the answer
    HaveLocalOffer,
    /// Remote offer applied, answering
    HaveRemoteOffer,
    /// Offer/answer exchange complete
    Connected,
    /// Torn down
    Closed,
}

/// One pairwise session with a remote participant
pub struct PeerConnection {
    participant: ParticipantId,
    display_name: String,
    is_initiator: bool,
    transport: Arc<dyn SessionTransport>,
    state: RwLock<NegotiationState>,
    pending_candidates: Mutex<Vec<RTCIceCandidateInit>>,
    remote_description_set: AtomicBool,
    remote_stream: Mutex<Option<RemoteStream>>,
    watchdog: Mutex<Option<JoinHandle<()>>>,
}

impl PeerConnection {
    /// Wrap a freshly created session transport
    pub fn new(
        participant: ParticipantId,
        display_name: String,
        is_initiator: bool,
        transport: Arc<dyn SessionTransport>,
    ) -> Arc<Self> {
        Arc::new(Self {
            participant,
            display_name,
            is_initiator,
            transport,
            state: RwLock::new(NegotiationState::New),
            pending_candidates: Mutex::new(Vec::new()),
            remote_description_set: AtomicBool::new(false),
            remote_stream: Mutex::new(None),
            watchdog: Mutex::new(None),
        })
    }

    /// The remote participant
    pub fn participant(&self) -> &ParticipantId {
        &self.participant
    }

    /// The remote participant's display name
    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    /// Whether the local side initiated this session
    pub fn is_initiator(&self) -> bool {
        self.is_initiator
    }

    /// Current negotiation state
    pub async fn state(&self) -> NegotiationState {
        *self.state.read().await
    }

    async fn set_state(&self, new_state: NegotiationState) {
        let mut state = self.state.write().await;
        let old_state = *state;
        if old_state != new_state {
            debug!(
                "peer {} state transition: {:?} -> {:?}",
                self.participant, old_state, new_state
            );
            *state = new_state;
        }
    }

    /// Caller path: create the local offer to send to the callee
    ///
    /// # Errors
    ///
    /// `InvalidState` unless the session is still `New`.
    pub async fn start_offer(&self) -> Result<RTCSessionDescription> {
        let state = self.state().await;
        if state != NegotiationState::New {
            return Err(Error::InvalidState(format!(
                "cannot offer to {} in state {:?}",
                self.participant, state
            )));
        }

        let offer = self
            .transport
            .create_offer()
            .await
            .map_err(|e| self.negotiation_failed(e))?;
        self.set_state(NegotiationState::HaveLocalOffer).await;
        Ok(offer)
    }

    /// Callee path: apply a remote offer and produce the answer to send back
    ///
    /// Candidates that arrived before the offer are flushed, in arrival
    /// order, between applying the remote description and answering.
    ///
    /// # Errors
    ///
    /// `InvalidState` unless the session is still `New`.
    pub async fn accept_offer(&self, offer: RTCSessionDescription) -> Result<RTCSessionDescription> {
        let state = self.state().await;
        if state != NegotiationState::New {
            return Err(Error::InvalidState(format!(
                "cannot accept offer from {} in state {:?}",
                self.participant, state
            )));
        }

        self.transport
            .set_remote_description(offer)
            .await
            .map_err(|e| self.negotiation_failed(e))?;
        self.remote_description_set.store(true, Ordering::SeqCst);
        self.set_state(NegotiationState::HaveRemoteOffer).await;
        self.flush_pending_candidates().await;

        let answer = self
            .transport
            .create_answer()
            .await
            .map_err(|e| self.negotiation_failed(e))?;
        self.set_state(NegotiationState::Connected).await;
        info!("negotiation with {} complete (callee)", self.participant);
        Ok(answer)
    }

    /// Caller path: apply the callee's answer
    ///
    /// # Errors
    ///
    /// `InvalidState` unless a local offer is outstanding. Duplicate answers
    /// (at-least-once delivery) land here once connected and must be dropped
    /// by the caller, not treated as a failure.
    pub async fn accept_answer(&self, answer: RTCSessionDescription) -> Result<()> {
        let state = self.state().await;
        if state != NegotiationState::HaveLocalOffer {
            return Err(Error::InvalidState(format!(
                "unexpected answer from {} in state {:?}",
                self.participant, state
            )));
        }

        self.transport
            .set_remote_description(answer)
            .await
            .map_err(|e| self.negotiation_failed(e))?;
        self.remote_description_set.store(true, Ordering::SeqCst);
        self.flush_pending_candidates().await;
        self.set_state(NegotiationState::Connected).await;
        info!("negotiation with {} complete (caller)", self.participant);
        Ok(())
    }

    fn negotiation_failed(&self, source: Error) -> Error {
        Error::NegotiationFailed {
            participant: self.participant.to_string(),
            reason: source.to_string(),
        }
    }

    /// Handle a trickled remote candidate
    ///
    /// Before the remote description is applied the candidate is queued;
    /// afterwards it is applied immediately. The queue is flushed exactly
    /// once and then bypassed for the life of the session.
    pub async fn add_remote_candidate(&self, candidate: RTCIceCandidateInit) -> Result<()> {
        if self.state().await == NegotiationState::Closed {
            debug!("dropping candidate for closed peer {}", self.participant);
            return Ok(());
        }

        if !self.remote_description_set.load(Ordering::SeqCst) {
            let mut pending = self.pending_candidates.lock().await;
            pending.push(candidate);
            debug!(
                "queued candidate for {} ({} pending)",
                self.participant,
                pending.len()
            );
            return Ok(());
        }

        self.transport.apply_ice_candidate(candidate).await
    }

    async fn flush_pending_candidates(&self) {
        let candidates: Vec<_> = self.pending_candidates.lock().await.drain(..).collect();
        if candidates.is_empty() {
            return;
        }

        debug!(
            "flushing {} buffered candidates for {}",
            candidates.len(),
            self.participant
        );
        for candidate in candidates {
            if let Err(e) = self.transport.apply_ice_candidate(candidate).await {
                warn!("buffered candidate for {} rejected: {}", self.participant, e);
            }
        }
    }

    /// Record a remote track; returns the stream on its first track so the
    /// attached notification fires exactly once per peer
    pub async fn add_remote_track(
        &self,
        stream_id: String,
        track: RemoteTrack,
    ) -> Option<RemoteStream> {
        let mut remote = self.remote_stream.lock().await;
        match remote.as_mut() {
            Some(stream) => {
                stream.push_track(track);
                None
            }
            None => {
                let stream = RemoteStream::new(stream_id, track);
                *remote = Some(stream.clone());
                Some(stream)
            }
        }
    }

    /// The remote stream, once at least one track arrived
    pub async fn remote_stream(&self) -> Option<RemoteStream> {
        self.remote_stream.lock().await.clone()
    }

    /// Swap the outgoing video track on this session; no renegotiation
    pub async fn replace_video_track(&self, track: &Arc<MediaTrack>) -> Result<()> {
        self.transport.replace_video_track(track).await
    }

    /// Close the session transport
    ///
    /// Idempotent; the registry removes the entry only after this returns.
    pub async fn close(&self) -> Result<()> {
        if self.state().await == NegotiationState::Closed {
            return Ok(());
        }

        if let Some(watchdog) = self.watchdog.lock().await.take() {
            watchdog.abort();
        }
        self.set_state(NegotiationState::Closed).await;
        self.transport.close().await
    }

    /// Arm the negotiation watchdog
    ///
    /// Emits [`PeerEvent::NegotiationTimedOut`] if the session has not
    /// reached `Connected` when the timeout elapses; a no-op once the
    /// session is connected or closed.
    pub async fn spawn_watchdog(
        self: &Arc<Self>,
        timeout: Duration,
        events: mpsc::UnboundedSender<PeerEvent>,
    ) {
        let weak: Weak<Self> = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let Some(peer) = weak.upgrade() else {
                return;
            };
            let state = peer.state().await;
            if state != NegotiationState::Connected && state != NegotiationState::Closed {
                warn!(
                    "negotiation with {} still {:?} after {:?}",
                    peer.participant, state, timeout
                );
                let _ = events.send(PeerEvent::NegotiationTimedOut {
                    participant: peer.participant.clone(),
                });
            }
        });
        *self.watchdog.lock().await = Some(handle);
    }
}
