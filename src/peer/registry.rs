//! Peer connection registry
//!
//! Owns the set of active pairwise sessions, keyed by remote participant.
//! The registry map is only ever mutated from the session controller's
//! event loop, so lookups and creation for a given participant are
//! naturally serialized.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};

use super::connection::PeerConnection;
use super::transport::TransportFactory;
use crate::events::PeerEvent;
use crate::media::track::MediaTrack;
use crate::signaling::protocol::ParticipantId;
use crate::{Error, Result};

/// Registry of active peer connections
pub struct PeerRegistry {
    factory: Arc<dyn TransportFactory>,
    events: mpsc::UnboundedSender<PeerEvent>,
    peers: RwLock<HashMap<ParticipantId, Arc<PeerConnection>>>,
    max_peers: usize,
    negotiation_timeout: Duration,
}

impl PeerRegistry {
    /// Create a registry
    ///
    /// # Arguments
    ///
    /// * `factory` - Builds one session transport per new entry
    /// * `events` - Channel every entry's transport events are wired onto
    /// * `max_peers` - Mesh size bound
    /// * `negotiation_timeout` - Watchdog deadline for reaching `Connected`
    pub fn new(
        factory: Arc<dyn TransportFactory>,
        events: mpsc::UnboundedSender<PeerEvent>,
        max_peers: usize,
        negotiation_timeout: Duration,
    ) -> Self {
        Self {
            factory,
            events,
            peers: RwLock::new(HashMap::new()),
            max_peers,
            negotiation_timeout,
        }
    }

    /// Return the entry for a participant, creating one if absent
    ///
    /// A new entry gets a fresh transport with the local tracks attached
    /// outward and the negotiation watchdog armed.
    ///
    /// # Errors
    ///
    /// Fails when the mesh is full or the transport cannot be constructed.
    pub async fn get_or_create(
        &self,
        participant: &ParticipantId,
        display_name: &str,
        is_initiator: bool,
        local_tracks: &[Arc<MediaTrack>],
    ) -> Result<Arc<PeerConnection>> {
        if let Some(existing) = self.peers.read().await.get(participant) {
            return Ok(existing.clone());
        }

        if self.peers.read().await.len() >= self.max_peers {
            return Err(Error::InvalidState(format!(
                "mesh is full ({} peers)",
                self.max_peers
            )));
        }

        let transport = self.factory.create(participant, self.events.clone()).await?;
        for track in local_tracks {
            transport.add_outgoing_track(track).await?;
        }

        let peer = PeerConnection::new(
            participant.clone(),
            display_name.to_string(),
            is_initiator,
            transport,
        );
        peer.spawn_watchdog(self.negotiation_timeout, self.events.clone())
            .await;

        info!(
            "registered peer {} ({}, initiator={})",
            participant, display_name, is_initiator
        );
        self.peers
            .write()
            .await
            .insert(participant.clone(), peer.clone());
        Ok(peer)
    }

    /// Look up an entry
    pub async fn get(&self, participant: &ParticipantId) -> Option<Arc<PeerConnection>> {
        self.peers.read().await.get(participant).cloned()
    }

    /// Whether an entry exists
    pub async fn contains(&self, participant: &ParticipantId) -> bool {
        self.peers.read().await.contains_key(participant)
    }

    /// Number of active entries
    pub async fn len(&self) -> usize {
        self.peers.read().await.len()
    }

    /// Whether the registry is empty
    pub async fn is_empty(&self) -> bool {
        self.peers.read().await.is_empty()
    }

    /// All active entries
    pub async fn list(&self) -> Vec<Arc<PeerConnection>> {
        self.peers.read().await.values().cloned().collect()
    }

    /// Close and remove one entry
    ///
    /// The transport is fully closed before the entry leaves the map. Safe
    /// to call twice and safe to call for a participant with no entry.
    pub async fn remove(&self, participant: &ParticipantId) {
        let peer = self.peers.read().await.get(participant).cloned();
        let Some(peer) = peer else {
            debug!("remove for unknown peer {} ignored", participant);
            return;
        };

        if let Err(e) = peer.close().await {
            warn!("error closing transport for {}: {}", participant, e);
        }
        self.peers.write().await.remove(participant);
        info!("removed peer {}", participant);
    }

    /// Close and remove every entry; used on full call termination
    pub async fn remove_all(&self) {
        let participants: Vec<ParticipantId> = self.peers.read().await.keys().cloned().collect();
        for participant in participants {
            self.remove(&participant).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::connection::NegotiationState;
    use crate::peer::transport::SessionTransport;
    use async_trait::async_trait;
    use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
    use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

    struct NullTransport;

    #[async_trait]
    impl SessionTransport for NullTransport {
        async fn create_offer(&self) -> Result<RTCSessionDescription> {
            RTCSessionDescription::offer(
                "v=0\r\no=- 1 2 IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\n".to_string(),
            )
            .map_err(Into::into)
        }

        async fn create_answer(&self) -> Result<RTCSessionDescription> {
            RTCSessionDescription::answer(
                "v=0\r\no=- 1 2 IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\n".to_string(),
            )
            .map_err(Into::into)
        }

        async fn set_remote_description(&self, _desc: RTCSessionDescription) -> Result<()> {
            Ok(())
        }

        async fn apply_ice_candidate(&self, _candidate: RTCIceCandidateInit) -> Result<()> {
            Ok(())
        }

        async fn add_outgoing_track(&self, _track: &Arc<MediaTrack>) -> Result<()> {
            Ok(())
        }

        async fn replace_video_track(&self, _track: &Arc<MediaTrack>) -> Result<()> {
            Ok(())
        }

        async fn close(&self) -> Result<()> {
            Ok(())
        }
    }

    struct NullFactory;

    #[async_trait]
    impl TransportFactory for NullFactory {
        async fn create(
            &self,
            _participant: &ParticipantId,
            _events: mpsc::UnboundedSender<PeerEvent>,
        ) -> Result<Arc<dyn SessionTransport>> {
            Ok(Arc::new(NullTransport))
        }
    }

    fn registry(max_peers: usize) -> PeerRegistry {
        let (tx, _rx) = mpsc::unbounded_channel();
        PeerRegistry::new(
            Arc::new(NullFactory),
            tx,
            max_peers,
            Duration::from_secs(30),
        )
    }

    #[tokio::test]
    async fn test_get_or_create_returns_existing() {
        let registry = registry(10);
        let first = registry
            .get_or_create(&"bob".into(), "Bob", true, &[])
            .await
            .unwrap();
        let second = registry
            .get_or_create(&"bob".into(), "Bob", false, &[])
            .await
            .unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert!(second.is_initiator());
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_mesh_bound_enforced() {
        let registry = registry(1);
        registry
            .get_or_create(&"bob".into(), "Bob", true, &[])
            .await
            .unwrap();

        let err = match registry
            .get_or_create(&"carol".into(), "Carol", true, &[])
            .await
        {
            Err(e) => e,
            Ok(_) => panic!("expected error"),
        };
        assert!(matches!(err, Error::InvalidState(_)));
    }

    #[tokio::test]
    async fn test_remove_is_idempotent_and_closes() {
        let registry = registry(10);
        let peer = registry
            .get_or_create(&"bob".into(), "Bob", true, &[])
            .await
            .unwrap();

        registry.remove(&"bob".into()).await;
        assert_eq!(peer.state().await, NegotiationState::Closed);
        assert!(registry.is_empty().await);

        // Twice, and for an unknown participant
        registry.remove(&"bob".into()).await;
        registry.remove(&"nobody".into()).await;
    }

    #[tokio::test]
    async fn test_remove_all_drains() {
        let registry = registry(10);
        for name in ["bob", "carol", "dave"] {
            registry
                .get_or_create(&name.into(), name, true, &[])
                .await
                .unwrap();
        }
        assert_eq!(registry.len().await, 3);

        registry.remove_all().await;
        assert!(registry.is_empty().await);
    }
}
