//! Push signaling transport
//!
//! Inbound messages arrive over a WebSocket subscription to the room
//! channel; outbound messages go through the bridge's HTTP publish endpoint.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use super::protocol::SignalMessage;
use super::transport::{http_publish, room_channel, SignalingTransport};
use crate::config::SignalingConfig;
use crate::{Error, Result};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// WebSocket subscription + HTTP publish
pub struct PushSignaling {
    config: SignalingConfig,
    http: reqwest::Client,
    channel: RwLock<Option<String>>,
    outbound: Mutex<Option<mpsc::UnboundedSender<Message>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl PushSignaling {
    /// Create a transport over the configured endpoints
    pub fn new(config: SignalingConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
            channel: RwLock::new(None),
            outbound: Mutex::new(None),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Sender task: frames queued by the transport go out on the socket
    async fn sender_task(
        mut write: futures::stream::SplitSink<WsStream, Message>,
        mut rx: mpsc::UnboundedReceiver<Message>,
    ) {
        while let Some(msg) = rx.recv().await {
            if let Err(e) = write.send(msg).await {
                error!("failed to send WebSocket frame: {}", e);
                break;
            }
        }
        debug!("signaling sender task terminated");
    }

    /// Receiver task: validates inbound payloads and forwards the good ones
    async fn receiver_task(
        mut read: futures::stream::SplitStream<WsStream>,
        inbound: mpsc::UnboundedSender<SignalMessage>,
    ) {
        while let Some(frame) = read.next().await {
            match frame {
                Ok(Message::Text(text)) => match SignalMessage::decode(&text) {
                    Ok(message) => {
                        if inbound.send(message).is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!("dropping invalid signaling payload: {}", e),
                },
                Ok(Message::Close(_)) => {
                    info!("signaling subscription closed by server");
                    break;
                }
                Err(e) => {
                    error!("signaling subscription error: {}", e);
                    break;
                }
                _ => {}
            }
        }
        debug!("signaling receiver task terminated");
    }
}

#[async_trait]
impl SignalingTransport for PushSignaling {
    async fn connect(&self, room_id: &str) -> Result<mpsc::UnboundedReceiver<SignalMessage>> {
        let api_key = self.config.api_key.as_deref().ok_or_else(|| {
            Error::SignalingUnavailable("signaling credentials are not configured".to_string())
        })?;

        let channel = room_channel(room_id);
        let url = format!(
            "{}/channels/{}?apikey={}",
            self.config.subscribe_url.trim_end_matches('/'),
            channel,
            api_key
        );

        info!("subscribing to signaling channel {}", channel);
        let (ws, _) = connect_async(&url)
            .await
            .map_err(|e| Error::SignalingUnavailable(format!("subscription failed: {e}")))?;
        let (write, read) = ws.split();

        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();

        let mut tasks = self.tasks.lock().await;
        tasks.push(tokio::spawn(Self::sender_task(write, out_rx)));
        tasks.push(tokio::spawn(Self::receiver_task(read, in_tx)));

        *self.outbound.lock().await = Some(out_tx);
        *self.channel.write().await = Some(channel);

        Ok(in_rx)
    }

    async fn publish(&self, message: &SignalMessage) -> Result<()> {
        let channel = self.channel.read().await.clone().ok_or_else(|| {
            Error::Signaling("publish before connect".to_string())
        })?;
        debug!("publishing {} to {}", message.kind(), channel);
        http_publish(&self.http, &self.config, &channel, message).await
    }

    async fn disconnect(&self) -> Result<()> {
        if let Some(outbound) = self.outbound.lock().await.take() {
            let _ = outbound.send(Message::Close(None));
        }
        for task in self.tasks.lock().await.drain(..) {
            task.abort();
        }
        *self.channel.write().await = None;
        info!("signaling subscription released");
        Ok(())
    }
}
