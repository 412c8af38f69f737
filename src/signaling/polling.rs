//! Polling signaling transport
//!
//! Fallback for environments where the push subscription cannot be
//! established: inbound messages are fetched from the bridge with a cursored
//! long-poll, outbound messages use the same HTTP publish endpoint.

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};
use tracing::{debug, info, warn};

use super::protocol::SignalMessage;
use super::transport::{http_publish, room_channel, SignalingTransport};
use crate::config::SignalingConfig;
use crate::{Error, Result};

/// One message as returned by the bridge's history endpoint
#[derive(Debug, Deserialize)]
struct ChannelEnvelope {
    /// Monotonic sequence number assigned by the bridge
    seq: u64,
    /// The raw message payload
    message: serde_json::Value,
}

/// Cursored HTTP polling behind the same interface as the push transport
pub struct PollingSignaling {
    config: SignalingConfig,
    http: reqwest::Client,
    channel: RwLock<Option<String>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl PollingSignaling {
    /// Create a transport over the configured bridge endpoint
    pub fn new(config: SignalingConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
            channel: RwLock::new(None),
            task: Mutex::new(None),
        }
    }

    async fn poll_loop(
        http: reqwest::Client,
        config: SignalingConfig,
        channel: String,
        inbound: mpsc::UnboundedSender<SignalMessage>,
    ) {
        let interval = Duration::from_millis(config.poll_interval_ms);
        let api_key = config.api_key.clone().unwrap_or_default();
        let mut cursor: u64 = 0;

        loop {
            sleep(interval).await;
            if inbound.is_closed() {
                break;
            }

            let url = format!(
                "{}/channels/{}/messages?after={}",
                config.publish_url.trim_end_matches('/'),
                channel,
                cursor
            );
            let envelopes = match http
                .get(&url)
                .header("apikey", &api_key)
                .send()
                .await
                .and_then(reqwest::Response::error_for_status)
            {
                Ok(resp) => match resp.json::<Vec<ChannelEnvelope>>().await {
                    Ok(envelopes) => envelopes,
                    Err(e) => {
                        warn!("malformed poll response: {}", e);
                        continue;
                    }
                },
                Err(e) => {
                    warn!("signaling poll failed: {}", e);
                    continue;
                }
            };

            for envelope in envelopes {
                cursor = cursor.max(envelope.seq);
                match serde_json::from_value::<SignalMessage>(envelope.message) {
                    Ok(message) => {
                        if inbound.send(message).is_err() {
                            return;
                        }
                    }
                    Err(e) => warn!("dropping invalid signaling payload: {}", e),
                }
            }
        }
        debug!("signaling poll loop terminated");
    }
}

#[async_trait]
impl SignalingTransport for PollingSignaling {
    async fn connect(&self, room_id: &str) -> Result<mpsc::UnboundedReceiver<SignalMessage>> {
        if self.config.api_key.is_none() {
            return Err(Error::SignalingUnavailable(
                "signaling credentials are not configured".to_string(),
            ));
        }

        let channel = room_channel(room_id);
        info!("polling signaling channel {}", channel);

        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(Self::poll_loop(
            self.http.clone(),
            self.config.clone(),
            channel.clone(),
            in_tx,
        ));

        *self.task.lock().await = Some(task);
        *self.channel.write().await = Some(channel);
        Ok(in_rx)
    }

    async fn publish(&self, message: &SignalMessage) -> Result<()> {
        let channel = self
            .channel
            .read()
            .await
            .clone()
            .ok_or_else(|| Error::Signaling("publish before connect".to_string()))?;
        debug!("publishing {} to {}", message.kind(), channel);
        http_publish(&self.http, &self.config, &channel, message).await
    }

    async fn disconnect(&self) -> Result<()> {
        if let Some(task) = self.task.lock().await.take() {
            task.abort();
        }
        *self.channel.write().await = None;
        info!("signaling poll loop released");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_without_credentials_fails() {
        let transport = PollingSignaling::new(SignalingConfig::default());
        let err = transport.connect("study-42").await.unwrap_err();
        assert!(matches!(err, Error::SignalingUnavailable(_)));
    }

    #[test]
    fn test_envelope_shape() {
        let json = r#"{"seq": 7, "message": {"kind": "call-ended", "from": "a", "fromName": "A"}}"#;
        let envelope: ChannelEnvelope = serde_json::from_str(json).unwrap();
        assert_eq!(envelope.seq, 7);
        assert!(serde_json::from_value::<SignalMessage>(envelope.message).is_ok());
    }
}
