//! In-process signaling
//!
//! A [`LocalSignalingHub`] fans every published message out to all
//! subscribers of the same room, the local sender included, exactly like a
//! real pub/sub channel, so the self-message filter gets exercised. Used by
//! the demo binary and the test suite.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::debug;

use super::protocol::SignalMessage;
use super::transport::{room_channel, SignalingTransport};
use crate::{Error, Result};

type Subscribers = Vec<(u64, mpsc::UnboundedSender<SignalMessage>)>;

/// Shared in-process message hub
#[derive(Default)]
pub struct LocalSignalingHub {
    rooms: Mutex<HashMap<String, Subscribers>>,
    next_subscriber: AtomicU64,
    published: AtomicU64,
}

impl LocalSignalingHub {
    /// Create a hub
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// A transport handle bound to this hub
    pub fn transport(self: &Arc<Self>) -> LocalSignaling {
        LocalSignaling {
            hub: Arc::clone(self),
            subscription: RwLock::new(None),
        }
    }

    /// Total messages published across all rooms
    pub fn published_count(&self) -> u64 {
        self.published.load(Ordering::SeqCst)
    }

    async fn subscribe(&self, channel: &str) -> (u64, mpsc::UnboundedReceiver<SignalMessage>) {
        let id = self.next_subscriber.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::unbounded_channel();
        self.rooms
            .lock()
            .await
            .entry(channel.to_string())
            .or_default()
            .push((id, tx));
        (id, rx)
    }

    async fn unsubscribe(&self, channel: &str, id: u64) {
        if let Some(subscribers) = self.rooms.lock().await.get_mut(channel) {
            subscribers.retain(|(sub_id, _)| *sub_id != id);
        }
    }

    async fn broadcast(&self, channel: &str, message: &SignalMessage) {
        self.published.fetch_add(1, Ordering::SeqCst);
        let mut rooms = self.rooms.lock().await;
        if let Some(subscribers) = rooms.get_mut(channel) {
            subscribers.retain(|(_, tx)| tx.send(message.clone()).is_ok());
            debug!(
                "hub delivered {} to {} subscribers of {}",
                message.kind(),
                subscribers.len(),
                channel
            );
        }
    }
}

/// Transport handle for one participant on a [`LocalSignalingHub`]
pub struct LocalSignaling {
    hub: Arc<LocalSignalingHub>,
    subscription: RwLock<Option<(String, u64)>>,
}

#[async_trait]
impl SignalingTransport for LocalSignaling {
    async fn connect(&self, room_id: &str) -> Result<mpsc::UnboundedReceiver<SignalMessage>> {
        let channel = room_channel(room_id);
        let (id, rx) = self.hub.subscribe(&channel).await;
        *self.subscription.write().await = Some((channel, id));
        Ok(rx)
    }

    async fn publish(&self, message: &SignalMessage) -> Result<()> {
        let subscription = self.subscription.read().await;
        let (channel, _) = subscription
            .as_ref()
            .ok_or_else(|| Error::Signaling("publish before connect".to_string()))?;
        self.hub.broadcast(channel, message).await;
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        if let Some((channel, id)) = self.subscription.write().await.take() {
            self.hub.unsubscribe(&channel, id).await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn initiated(from: &str) -> SignalMessage {
        SignalMessage::CallInitiated {
            from: from.into(),
            from_name: from.to_uppercase(),
        }
    }

    #[tokio::test]
    async fn test_hub_fans_out_to_all_subscribers_including_sender() {
        let hub = LocalSignalingHub::new();
        let alice = hub.transport();
        let bob = hub.transport();

        let mut alice_rx = alice.connect("study-42").await.unwrap();
        let mut bob_rx = bob.connect("study-42").await.unwrap();

        alice.publish(&initiated("alice")).await.unwrap();

        assert_eq!(bob_rx.recv().await.unwrap().from().as_str(), "alice");
        // The channel echoes to the sender too; consumers filter self
        assert_eq!(alice_rx.recv().await.unwrap().from().as_str(), "alice");
    }

    #[tokio::test]
    async fn test_rooms_are_isolated() {
        let hub = LocalSignalingHub::new();
        let alice = hub.transport();
        let bob = hub.transport();

        let _alice_rx = alice.connect("room-a").await.unwrap();
        let mut bob_rx = bob.connect("room-b").await.unwrap();

        alice.publish(&initiated("alice")).await.unwrap();
        assert!(bob_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_disconnect_unsubscribes() {
        let hub = LocalSignalingHub::new();
        let alice = hub.transport();
        let bob = hub.transport();

        let mut bob_rx = bob.connect("study-42").await.unwrap();
        alice.connect("study-42").await.unwrap();

        bob.disconnect().await.unwrap();
        alice.publish(&initiated("alice")).await.unwrap();
        assert!(bob_rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_published_count() {
        let hub = LocalSignalingHub::new();
        let alice = hub.transport();
        alice.connect("study-42").await.unwrap();

        alice.publish(&initiated("alice")).await.unwrap();
        alice.publish(&initiated("alice")).await.unwrap();
        assert_eq!(hub.published_count(), 2);
    }
}
