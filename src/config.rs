//! Configuration types for the call subsystem

use serde::{Deserialize, Serialize};

/// Main configuration for a room call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallConfig {
    /// Signaling endpoints and credentials
    pub signaling: SignalingConfig,

    /// STUN server URLs (at least one required)
    pub stun_servers: Vec<String>,

    /// TURN server configurations (optional)
    pub turn_servers: Vec<TurnServerConfig>,

    /// Maximum peers in the mesh (default: 10, max: 10)
    pub max_peers: u32,

    /// Seconds allowed for a peer negotiation to reach `Connected`
    /// before the entry is closed (default: 30)
    pub negotiation_timeout_secs: u32,
}

/// Signaling transport endpoints
///
/// Inbound messages arrive over a push subscription; outbound messages go
/// through an HTTP-bridged publish call. The polling fallback reuses the
/// HTTP endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalingConfig {
    /// HTTP base URL of the pub/sub bridge (publish + polling)
    pub publish_url: String,

    /// WebSocket base URL of the push subscription (ws:// or wss://)
    pub subscribe_url: String,

    /// API key for the pub/sub bridge; `None` disables the call feature
    pub api_key: Option<String>,

    /// Polling cadence in milliseconds for the fallback transport
    /// (default: 750, range: 100-5000)
    pub poll_interval_ms: u64,
}

/// TURN server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnServerConfig {
    /// TURN server URL (turn: or turns:)
    pub url: String,

    /// Username for TURN authentication
    pub username: String,

    /// Credential for TURN authentication
    pub credential: String,
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            signaling: SignalingConfig::default(),
            stun_servers: vec![
                "stun:stun.l.google.com:19302".to_string(),
                "stun:stun1.l.google.com:19302".to_string(),
            ],
            turn_servers: Vec::new(),
            max_peers: 10,
            negotiation_timeout_secs: 30,
        }
    }
}

impl Default for SignalingConfig {
    fn default() -> Self {
        Self {
            publish_url: "http://localhost:8080".to_string(),
            subscribe_url: "ws://localhost:8080".to_string(),
            api_key: None,
            poll_interval_ms: 750,
        }
    }
}

impl CallConfig {
    /// Validate configuration parameters
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `stun_servers` is empty
    /// - `max_peers` is not in range 1-10
    /// - `negotiation_timeout_secs` is not in range 5-120
    /// - `poll_interval_ms` is not in range 100-5000
    /// - a TURN server is missing a username or credential
    /// - an endpoint URL has the wrong scheme
    pub fn validate(&self) -> crate::Result<()> {
        use crate::Error;

        if self.stun_servers.is_empty() {
            return Err(Error::InvalidConfig(
                "at least one STUN server is required".to_string(),
            ));
        }

        if self.max_peers == 0 || self.max_peers > 10 {
            return Err(Error::InvalidConfig(format!(
                "max_peers must be in range 1-10, got {}",
                self.max_peers
            )));
        }

        if self.negotiation_timeout_secs < 5 || self.negotiation_timeout_secs > 120 {
            return Err(Error::InvalidConfig(format!(
                "negotiation_timeout_secs must be in range 5-120, got {}",
                self.negotiation_timeout_secs
            )));
        }

        if self.signaling.poll_interval_ms < 100 || self.signaling.poll_interval_ms > 5000 {
            return Err(Error::InvalidConfig(format!(
                "poll_interval_ms must be in range 100-5000, got {}",
                self.signaling.poll_interval_ms
            )));
        }

        for turn in &self.turn_servers {
            if !turn.url.starts_with("turn:") && !turn.url.starts_with("turns:") {
                return Err(Error::InvalidConfig(format!(
                    "TURN url must start with turn: or turns:, got {}",
                    turn.url
                )));
            }
            if turn.username.is_empty() || turn.credential.is_empty() {
                return Err(Error::InvalidConfig(
                    "TURN servers require a username and credential".to_string(),
                ));
            }
        }

        if !self.signaling.publish_url.starts_with("http://")
            && !self.signaling.publish_url.starts_with("https://")
        {
            return Err(Error::InvalidConfig(format!(
                "publish_url must start with http:// or https://, got {}",
                self.signaling.publish_url
            )));
        }

        if !self.signaling.subscribe_url.starts_with("ws://")
            && !self.signaling.subscribe_url.starts_with("wss://")
        {
            return Err(Error::InvalidConfig(format!(
                "subscribe_url must start with ws:// or wss://, got {}",
                self.signaling.subscribe_url
            )));
        }

        Ok(())
    }
}
