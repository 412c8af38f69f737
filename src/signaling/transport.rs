//! Signaling transport interface

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::warn;

use super::protocol::SignalMessage;
use super::{polling::PollingSignaling, push::PushSignaling};
use crate::config::SignalingConfig;
use crate::{Error, Result};

/// Deterministic channel name for a room
pub fn room_channel(room_id: &str) -> String {
    format!("room-{room_id}")
}

/// A room-scoped pub/sub channel
///
/// Stateless about call semantics. Delivery is at-least-once and unordered
/// across senders; `publish` is best-effort with no acknowledgement, so
/// callers own any retry semantics (none are provided here).
#[async_trait]
pub trait SignalingTransport: Send + Sync {
    /// Subscribe to the room's channel
    ///
    /// Returns the stream of inbound messages. Payloads that fail boundary
    /// validation are dropped with a warning before they reach the channel.
    ///
    /// # Errors
    ///
    /// `SignalingUnavailable` when credentials are missing or the
    /// subscription cannot be established.
    async fn connect(&self, room_id: &str) -> Result<mpsc::UnboundedReceiver<SignalMessage>>;

    /// Publish a message to the room; best-effort
    async fn publish(&self, message: &SignalMessage) -> Result<()>;

    /// Unsubscribe and release transport resources
    async fn disconnect(&self) -> Result<()>;
}

/// Connect over the best available transport
///
/// Tries the push subscription first and falls back to polling, both behind
/// the same interface.
///
/// # Errors
///
/// `SignalingUnavailable` when credentials are missing or neither transport
/// can connect. The caller must disable the call feature entirely rather
/// than degrade silently.
pub async fn connect_any(
    config: &SignalingConfig,
    room_id: &str,
) -> Result<(
    Arc<dyn SignalingTransport>,
    mpsc::UnboundedReceiver<SignalMessage>,
)> {
    if config.api_key.is_none() {
        return Err(Error::SignalingUnavailable(
            "signaling credentials are not configured".to_string(),
        ));
    }

    let push = Arc::new(PushSignaling::new(config.clone()));
    match push.connect(room_id).await {
        Ok(rx) => return Ok((push, rx)),
        Err(e) => warn!("push signaling unavailable, trying polling: {}", e),
    }

    let polling = Arc::new(PollingSignaling::new(config.clone()));
    let rx = polling.connect(room_id).await?;
    Ok((polling, rx))
}

pub(super) async fn http_publish(
    http: &reqwest::Client,
    config: &SignalingConfig,
    channel: &str,
    message: &SignalMessage,
) -> Result<()> {
    let url = format!(
        "{}/channels/{}/messages",
        config.publish_url.trim_end_matches('/'),
        channel
    );
    let api_key = config
        .api_key
        .as_deref()
        .ok_or_else(|| Error::SignalingUnavailable("missing api key".to_string()))?;

    http.post(&url)
        .header("apikey", api_key)
        .json(message)
        .send()
        .await
        .map_err(|e| Error::Signaling(format!("publish failed: {e}")))?
        .error_for_status()
        .map_err(|e| Error::Signaling(format!("publish rejected: {e}")))?;

    Ok(())
}
