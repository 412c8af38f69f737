//! Call session orchestration
//!
//! [`CallSessionController`] owns the capture controller and the peer
//! registry, consumes inbound signaling and per-peer transport events on a
//! single loop, and routes each message to the right pairwise session,
//! creating entries on first contact and tearing them down one at a time.
//! Outbound messages flow the other way: peer events become signaling
//! messages, best-effort published to the room channel.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::CallConfig;
use crate::events::{call_event_channel, CallEvent, CloseReason, PeerEvent};
use crate::media::capture::{CaptureBackend, MediaCaptureController};
use crate::media::track::{LocalStream, MediaTrack};
use crate::peer::connection::{NegotiationState, PeerConnection};
use crate::peer::registry::PeerRegistry;
use crate::peer::transport::TransportFactory;
use crate::signaling::protocol::{ParticipantId, SignalMessage};
use crate::signaling::transport::SignalingTransport;
use crate::{Error, Result};

/// The local participant, supplied by the identity provider
#[derive(Debug, Clone)]
pub struct LocalIdentity {
    /// Stable participant id; used to filter self-originated messages
    pub participant: ParticipantId,
    /// Display name stamped on outbound messages
    pub display_name: String,
}

/// A room member, supplied by the membership source
#[derive(Debug, Clone)]
pub struct RoomMember {
    /// Stable participant id
    pub participant: ParticipantId,
    /// Display name
    pub display_name: String,
}

/// Lifecycle phase of the room call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallPhase {
    /// No call; incoming broadcasts surface a notification
    Idle,
    /// An incoming call is waiting for accept/decline
    Ringing,
    /// Local media is live and peers are being negotiated
    Active,
    /// The call ended; a new one may be started
    Ended,
}

/// Negotiation messages buffered while ringing, bounded against abuse
const RINGING_BUFFER_LIMIT: usize = 128;

/// Top-level call orchestrator for one room
pub struct CallSessionController {
    identity: LocalIdentity,
    room_id: String,
    signaling: Arc<dyn SignalingTransport>,
    capture: MediaCaptureController,
    registry: PeerRegistry,
    phase: RwLock<CallPhase>,
    pending_invite: Mutex<Option<(ParticipantId, String)>>,
    ringing_buffer: Mutex<Vec<SignalMessage>>,
    events: broadcast::Sender<CallEvent>,
    peer_events_rx: Mutex<Option<mpsc::UnboundedReceiver<PeerEvent>>>,
    loop_task: Mutex<Option<JoinHandle<()>>>,
    screen_watch_cancel: Mutex<Option<oneshot::Sender<()>>>,
}

impl CallSessionController {
    /// Create a controller for one room
    ///
    /// # Arguments
    ///
    /// * `config` - Validated call configuration
    /// * `identity` - The local participant
    /// * `room_id` - Room whose channel to join
    /// * `signaling` - Pub/sub transport (push, polling, or in-process)
    /// * `capture_backend` - Device capture implementation
    /// * `transport_factory` - Builds one session transport per peer
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if the configuration fails validation.
    pub fn new(
        config: CallConfig,
        identity: LocalIdentity,
        room_id: impl Into<String>,
        signaling: Arc<dyn SignalingTransport>,
        capture_backend: Arc<dyn CaptureBackend>,
        transport_factory: Arc<dyn TransportFactory>,
    ) -> Result<Arc<Self>> {
        config.validate()?;

        let (peer_tx, peer_rx) = mpsc::unbounded_channel();
        let registry = PeerRegistry::new(
            transport_factory,
            peer_tx,
            config.max_peers as usize,
            Duration::from_secs(config.negotiation_timeout_secs as u64),
        );

        Ok(Arc::new(Self {
            identity,
            room_id: room_id.into(),
            signaling,
            capture: MediaCaptureController::new(capture_backend),
            registry,
            phase: RwLock::new(CallPhase::Idle),
            pending_invite: Mutex::new(None),
            ringing_buffer: Mutex::new(Vec::new()),
            events: call_event_channel(),
            peer_events_rx: Mutex::new(Some(peer_rx)),
            loop_task: Mutex::new(None),
            screen_watch_cancel: Mutex::new(None),
        }))
    }

    /// Subscribe to presentation-layer events
    pub fn subscribe(&self) -> broadcast::Receiver<CallEvent> {
        self.events.subscribe()
    }

    /// Current call phase
    pub async fn phase(&self) -> CallPhase {
        *self.phase.read().await
    }

    /// The peer registry (read access for inspection)
    pub fn registry(&self) -> &PeerRegistry {
        &self.registry
    }

    /// The capture controller
    pub fn capture(&self) -> &MediaCaptureController {
        &self.capture
    }

    /// The local participant id
    pub fn participant(&self) -> &ParticipantId {
        &self.identity.participant
    }

    /// Subscribe to the room channel and start the event loop
    ///
    /// # Errors
    ///
    /// `SignalingUnavailable` disables the call feature entirely; callers
    /// must not fall back to a degraded mode.
    pub async fn connect(self: &Arc<Self>) -> Result<()> {
        let signals = self.signaling.connect(&self.room_id).await?;
        let peer_events = self
            .peer_events_rx
            .lock()
            .await
            .take()
            .ok_or_else(|| Error::InvalidState("controller already connected".to_string()))?;

        let weak = Arc::downgrade(self);
        let task = tokio::spawn(Self::event_loop(weak, signals, peer_events));
        *self.loop_task.lock().await = Some(task);

        info!(
            "call feature ready for {} in room {}",
            self.identity.participant, self.room_id
        );
        Ok(())
    }

    async fn event_loop(
        controller: std::sync::Weak<Self>,
        mut signals: mpsc::UnboundedReceiver<SignalMessage>,
        mut peer_events: mpsc::UnboundedReceiver<PeerEvent>,
    ) {
        loop {
            let event = tokio::select! {
                msg = signals.recv() => match msg {
                    Some(msg) => LoopEvent::Signal(msg),
                    None => break,
                },
                ev = peer_events.recv() => match ev {
                    Some(ev) => LoopEvent::Peer(ev),
                    None => break,
                },
            };

            let Some(controller) = controller.upgrade() else {
                break;
            };
            match event {
                LoopEvent::Signal(msg) => controller.handle_signal(msg).await,
                LoopEvent::Peer(ev) => controller.handle_peer_event(ev).await,
            }
        }
        debug!("call event loop terminated");
    }

    // ------------------------------------------------------------------
    // Inbound signaling
    // ------------------------------------------------------------------

    async fn handle_signal(&self, msg: SignalMessage) {
        // A shared channel echoes our own publishes back
        if msg.from() == &self.identity.participant {
            return;
        }
        // Unicast messages addressed elsewhere are not ours to act on
        if let Some(to) = msg.to() {
            if to != &self.identity.participant {
                return;
            }
        }

        debug!("signal {} from {}", msg.kind(), msg.from());
        match &msg {
            SignalMessage::CallInitiated { from, from_name } => {
                self.handle_call_initiated(from.clone(), from_name.clone())
                    .await;
            }
            SignalMessage::CallEnded { from, .. } => {
                self.handle_call_ended(from.clone()).await;
            }
            SignalMessage::Offer { .. }
            | SignalMessage::Answer { .. }
            | SignalMessage::IceCandidate { .. } => match self.phase().await {
                CallPhase::Active => self.dispatch_negotiation(msg).await,
                CallPhase::Ringing => self.buffer_while_ringing(msg).await,
                CallPhase::Idle | CallPhase::Ended => {
                    debug!("dropping {} outside a call", msg.kind());
                }
            },
        }
    }

    async fn handle_call_initiated(&self, from: ParticipantId, from_name: String) {
        // Ringing or Active means we are already engaged; Ended is as good
        // as Idle for a fresh invitation
        let phase = self.phase().await;
        if phase == CallPhase::Ringing || phase == CallPhase::Active {
            debug!("already in a call, ignoring call-initiated from {}", from);
            return;
        }

        info!("incoming call from {} ({})", from_name, from);
        *self.phase.write().await = CallPhase::Ringing;
        *self.pending_invite.lock().await = Some((from.clone(), from_name.clone()));
        self.emit(CallEvent::IncomingCall { from, from_name });
    }

    async fn handle_call_ended(&self, from: ParticipantId) {
        match self.phase().await {
            CallPhase::Active => {
                if self.registry.contains(&from).await {
                    info!("{} left the call", from);
                    self.registry.remove(&from).await;
                    self.emit(CallEvent::RemoteStreamRemoved { participant: from });
                }
            }
            CallPhase::Ringing => {
                // The caller hung up before we answered
                let invite = self.pending_invite.lock().await.clone();
                if invite.is_some_and(|(inviter, _)| inviter == from) {
                    info!("caller {} canceled before accept", from);
                    self.reset_ringing().await;
                    self.emit(CallEvent::CallEnded);
                }
            }
            _ => {}
        }
    }

    async fn buffer_while_ringing(&self, msg: SignalMessage) {
        let mut buffer = self.ringing_buffer.lock().await;
        if buffer.len() >= RINGING_BUFFER_LIMIT {
            warn!("ringing buffer full, dropping {}", msg.kind());
            return;
        }
        debug!("buffering {} until accept", msg.kind());
        buffer.push(msg);
    }

    async fn dispatch_negotiation(&self, msg: SignalMessage) {
        match msg {
            SignalMessage::Offer {
                from,
                from_name,
                signal,
                ..
            } => {
                if let Some(existing) = self.registry.get(&from).await {
                    match existing.state().await {
                        // Glare: both sides offered at once. Last offer
                        // wins: drop our offer and restart as callee.
                        NegotiationState::HaveLocalOffer => {
                            warn!("offer glare with {}, restarting as callee", from);
                            self.registry.remove(&from).await;
                        }
                        // Duplicate delivery of an offer we already answered
                        NegotiationState::Connected if !existing.is_initiator() => {
                            debug!("duplicate offer from {}, ignoring", from);
                            return;
                        }
                        // Remote restarted its side; renegotiate from scratch
                        NegotiationState::Connected => {
                            info!("renegotiation requested by {}", from);
                            self.registry.remove(&from).await;
                            self.emit(CallEvent::RemoteStreamRemoved {
                                participant: from.clone(),
                            });
                        }
                        _ => {}
                    }
                }

                let entry = match self.entry_for(&from, &from_name, false).await {
                    Ok(entry) => entry,
                    Err(e) => {
                        warn!("cannot negotiate with {}: {}", from, e);
                        return;
                    }
                };
                match entry.accept_offer(signal).await {
                    Ok(answer) => {
                        self.publish(SignalMessage::Answer {
                            from: self.identity.participant.clone(),
                            from_name: self.identity.display_name.clone(),
                            to: from,
                            signal: answer,
                        })
                        .await;
                    }
                    Err(e) => {
                        warn!("failed to answer {}: {}", from, e);
                        self.close_peer(from, CloseReason::TransportFailed).await;
                    }
                }
            }

            SignalMessage::Answer { from, signal, .. } => {
                let Some(entry) = self.registry.get(&from).await else {
                    debug!("answer from {} with no entry, dropping", from);
                    return;
                };
                match entry.accept_answer(signal).await {
                    Ok(()) => {}
                    // At-least-once delivery; a duplicate answer is noise
                    Err(Error::InvalidState(reason)) => {
                        debug!("ignoring answer from {}: {}", from, reason);
                    }
                    Err(e) => {
                        warn!("failed to apply answer from {}: {}", from, e);
                        self.close_peer(from, CloseReason::TransportFailed).await;
                    }
                }
            }

            SignalMessage::IceCandidate {
                from,
                from_name,
                signal,
                ..
            } => {
                // A candidate can race ahead of its offer; create the entry
                // and let it queue until a description arrives
                let entry = match self.entry_for(&from, &from_name, false).await {
                    Ok(entry) => entry,
                    Err(e) => {
                        warn!("cannot track candidate from {}: {}", from, e);
                        return;
                    }
                };
                if let Err(e) = entry.add_remote_candidate(signal).await {
                    warn!("candidate from {} rejected: {}", from, e);
                }
            }

            SignalMessage::CallInitiated { .. } | SignalMessage::CallEnded { .. } => {}
        }
    }

    /// Look up or create the entry for a participant, with the current
    /// outgoing tracks attached
    async fn entry_for(
        &self,
        participant: &ParticipantId,
        display_name: &str,
        is_initiator: bool,
    ) -> Result<Arc<PeerConnection>> {
        let tracks = self.outgoing_tracks().await;
        self.registry
            .get_or_create(participant, display_name, is_initiator, &tracks)
            .await
    }

    /// Microphone plus whichever video source is currently outgoing
    /// (display while sharing, camera otherwise)
    async fn outgoing_tracks(&self) -> Vec<Arc<MediaTrack>> {
        let mut tracks = Vec::new();
        if let Some(stream) = self.capture.active_stream().await {
            if let Some(audio) = stream.audio() {
                tracks.push(audio.clone());
            }
        }
        if let Some(video) = self.capture.outgoing_video_track().await {
            tracks.push(video);
        }
        tracks
    }

    // ------------------------------------------------------------------
    // Peer transport events
    // ------------------------------------------------------------------

    async fn handle_peer_event(&self, event: PeerEvent) {
        match event {
            PeerEvent::CandidateGenerated {
                participant,
                candidate,
            } => {
                // The entry may be gone by the time a late candidate gathers
                if !self.registry.contains(&participant).await {
                    return;
                }
                self.publish(SignalMessage::IceCandidate {
                    from: self.identity.participant.clone(),
                    from_name: self.identity.display_name.clone(),
                    to: participant,
                    signal: candidate,
                })
                .await;
            }

            PeerEvent::RemoteTrackAdded {
                participant,
                stream_id,
                track,
            } => {
                let Some(entry) = self.registry.get(&participant).await else {
                    return;
                };
                if let Some(stream) = entry.add_remote_track(stream_id, track).await {
                    info!("remote stream attached for {}", participant);
                    self.emit(CallEvent::RemoteStreamAttached {
                        participant: participant.clone(),
                        display_name: entry.display_name().to_string(),
                        stream,
                    });
                }
            }

            PeerEvent::TransportFailed { participant } => {
                self.close_peer(participant, CloseReason::TransportFailed)
                    .await;
            }

            PeerEvent::NegotiationTimedOut { participant } => {
                self.close_peer(participant, CloseReason::NegotiationTimeout)
                    .await;
            }
        }
    }

    /// Close one pairwise session; the rest of the mesh is untouched
    async fn close_peer(&self, participant: ParticipantId, reason: CloseReason) {
        let Some(entry) = self.registry.get(&participant).await else {
            return;
        };
        let display_name = entry.display_name().to_string();
        let had_stream = entry.remote_stream().await.is_some();
        warn!("closing peer {} ({})", participant, reason);

        self.registry.remove(&participant).await;
        if had_stream {
            self.emit(CallEvent::RemoteStreamRemoved {
                participant: participant.clone(),
            });
        }
        self.emit(CallEvent::PeerUnreachable {
            participant,
            display_name,
            reason,
        });
    }

    // ------------------------------------------------------------------
    // Call lifecycle
    // ------------------------------------------------------------------

    /// Start a call against every current room member
    ///
    /// Acquires local media, broadcasts the invitation, then runs the caller
    /// path against each member concurrently. A failure against one member
    /// does not abort the others.
    ///
    /// # Errors
    ///
    /// Media-acquisition failures propagate to the caller; nothing is left
    /// half-initialized.
    pub async fn start_call(&self, members: &[RoomMember]) -> Result<Arc<LocalStream>> {
        let phase = self.phase().await;
        if phase == CallPhase::Active || phase == CallPhase::Ringing {
            return Err(Error::InvalidState(format!(
                "cannot start a call while {phase:?}"
            )));
        }

        let stream = self.capture.acquire(true, true).await?;
        *self.phase.write().await = CallPhase::Active;
        info!("starting call in room {}", self.room_id);

        self.publish(SignalMessage::CallInitiated {
            from: self.identity.participant.clone(),
            from_name: self.identity.display_name.clone(),
        })
        .await;

        // Caller path against every member at once; one member failing
        // must not hold up or abort the others
        let callees: Vec<&RoomMember> = members
            .iter()
            .filter(|m| m.participant != self.identity.participant)
            .collect();
        let results =
            futures::future::join_all(callees.iter().map(|m| self.call_member(m))).await;
        for (member, result) in callees.iter().zip(results) {
            if let Err(e) = result {
                warn!(
                    "could not start negotiation with {}: {}",
                    member.participant, e
                );
            }
        }

        Ok(stream)
    }

    async fn call_member(&self, member: &RoomMember) -> Result<()> {
        let entry = self
            .entry_for(&member.participant, &member.display_name, true)
            .await?;
        let offer = entry.start_offer().await?;
        self.publish(SignalMessage::Offer {
            from: self.identity.participant.clone(),
            from_name: self.identity.display_name.clone(),
            to: member.participant.clone(),
            signal: offer,
        })
        .await;
        Ok(())
    }

    /// Accept the pending incoming call
    ///
    /// Acquires local media, then serves the offers that arrived while
    /// ringing (in arrival order) and every later one; never originates
    /// offers itself.
    ///
    /// # Errors
    ///
    /// `InvalidState` when no call is ringing. Media failures reset the
    /// phase to `Idle` with the partial stream released.
    pub async fn accept_call(&self) -> Result<Arc<LocalStream>> {
        if self.phase().await != CallPhase::Ringing {
            return Err(Error::InvalidState("no incoming call to accept".to_string()));
        }

        let stream = match self.capture.acquire(true, true).await {
            Ok(stream) => stream,
            Err(e) => {
                self.reset_ringing().await;
                return Err(e);
            }
        };
        *self.phase.write().await = CallPhase::Active;
        *self.pending_invite.lock().await = None;
        info!("accepted call in room {}", self.room_id);

        let buffered: Vec<SignalMessage> =
            self.ringing_buffer.lock().await.drain(..).collect();
        for msg in buffered {
            self.dispatch_negotiation(msg).await;
        }

        Ok(stream)
    }

    /// Discard the pending incoming call; no network message is sent
    pub async fn decline_call(&self) -> Result<()> {
        if self.phase().await != CallPhase::Ringing {
            return Err(Error::InvalidState("no incoming call to decline".to_string()));
        }
        info!("declined incoming call");
        self.reset_ringing().await;
        Ok(())
    }

    async fn reset_ringing(&self) {
        *self.phase.write().await = CallPhase::Idle;
        *self.pending_invite.lock().await = None;
        self.ringing_buffer.lock().await.clear();
    }

    /// Hang up: close every pairwise session, release local media,
    /// broadcast the departure
    ///
    /// Idempotent under repeated calls.
    pub async fn end_call(&self) {
        let was_in_call = self.phase().await == CallPhase::Active;

        self.cancel_screen_watch().await;
        self.registry.remove_all().await;
        self.capture.release().await;
        self.ringing_buffer.lock().await.clear();
        *self.pending_invite.lock().await = None;
        *self.phase.write().await = CallPhase::Ended;

        if was_in_call {
            info!("call ended in room {}", self.room_id);
            self.publish(SignalMessage::CallEnded {
                from: self.identity.participant.clone(),
                from_name: self.identity.display_name.clone(),
                to: None,
            })
            .await;
            self.emit(CallEvent::CallEnded);
        }
    }

    // ------------------------------------------------------------------
    // Media controls
    // ------------------------------------------------------------------

    /// Flip the camera mute flag; purely local, zero signaling traffic
    pub async fn toggle_camera(&self) -> Result<bool> {
        self.capture.toggle_video().await
    }

    /// Flip the microphone mute flag; purely local, zero signaling traffic
    pub async fn toggle_microphone(&self) -> Result<bool> {
        self.capture.toggle_audio().await
    }

    /// Start or stop the screen share
    ///
    /// Remote peers observe the change purely as a replaced video track on
    /// the existing connection: no offers, no answers, no signaling. When
    /// the capture source ends out-of-band (the OS "stop sharing" control)
    /// the camera is restored automatically.
    ///
    /// Returns whether the share is active after the toggle.
    pub async fn toggle_screen_share(self: &Arc<Self>) -> Result<bool> {
        if self.phase().await != CallPhase::Active {
            return Err(Error::InvalidState("no active call".to_string()));
        }

        if !self.capture.screen_share_active().await {
            let screen = self.capture.start_screen_share().await?;
            self.capture
                .replace_outgoing_video_track(&self.registry.list().await, &screen)
                .await;
            self.spawn_screen_watch(&screen).await;
            Ok(true)
        } else {
            self.cancel_screen_watch().await;
            let camera = self.capture.stop_screen_share().await?;
            self.capture
                .replace_outgoing_video_track(&self.registry.list().await, &camera)
                .await;
            Ok(false)
        }
    }

    /// Watch the display track for an out-of-band end and fall back to the
    /// camera when it fires
    async fn spawn_screen_watch(self: &Arc<Self>, screen: &Arc<MediaTrack>) {
        let (cancel_tx, mut cancel_rx) = oneshot::channel::<()>();
        *self.screen_watch_cancel.lock().await = Some(cancel_tx);

        let weak = Arc::downgrade(self);
        let mut ended = screen.ended();
        tokio::spawn(async move {
            tokio::select! {
                _ = &mut cancel_rx => {}
                changed = ended.changed() => {
                    if changed.is_ok() && *ended.borrow() {
                        if let Some(controller) = weak.upgrade() {
                            controller.restore_camera_after_share_end().await;
                        }
                    }
                }
            }
        });
    }

    async fn cancel_screen_watch(&self) {
        self.screen_watch_cancel.lock().await.take();
    }

    async fn restore_camera_after_share_end(&self) {
        if !self.capture.screen_share_active().await {
            return;
        }
        info!("screen capture ended by the source, restoring camera");
        self.cancel_screen_watch().await;
        match self.capture.stop_screen_share().await {
            Ok(camera) => {
                self.capture
                    .replace_outgoing_video_track(&self.registry.list().await, &camera)
                    .await;
            }
            Err(e) => warn!("could not restore camera: {}", e),
        }
    }

    // ------------------------------------------------------------------
    // Teardown
    // ------------------------------------------------------------------

    /// End the call, release the subscription, stop the event loop
    pub async fn shutdown(&self) {
        self.end_call().await;
        if let Err(e) = self.signaling.disconnect().await {
            warn!("signaling disconnect failed: {}", e);
        }
        if let Some(task) = self.loop_task.lock().await.take() {
            task.abort();
        }
        info!("call controller for room {} shut down", self.room_id);
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    async fn publish(&self, message: SignalMessage) {
        // Best-effort: the channel gives no delivery guarantee, so a failed
        // send is equivalent to a dropped packet
        if let Err(e) = self.signaling.publish(&message).await {
            warn!("publish of {} failed: {}", message.kind(), e);
        }
    }

    fn emit(&self, event: CallEvent) {
        debug!("event {}", event.name());
        let _ = self.events.send(event);
    }
}

enum LoopEvent {
    Signal(SignalMessage),
    Peer(PeerEvent),
}
