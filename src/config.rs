//! Session configuration

use crate::error::ConnectError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for a room session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Relay base address (ws:// or wss://)
    pub server_url: String,

    /// STUN/TURN URLs handed to every peer connection
    pub ice_servers: Vec<String>,

    /// How long to wait for the relay to accept the WebSocket
    pub connect_timeout: Duration,

    /// Delay between creating a peer connection for a newcomer and offering to it
    pub offer_delay: Duration,

    /// Period of `ping` messages to the relay (`None` disables the heartbeat)
    pub heartbeat_interval: Option<Duration>,

    /// Produce a local audio track
    pub audio: bool,

    /// Produce a local video track
    pub video: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_url: "ws://127.0.0.1:8000".to_string(),
            ice_servers: vec![
                "stun:stun.l.google.com:19302".to_string(),
                "stun:stun1.l.google.com:19302".to_string(),
            ],
            connect_timeout: Duration::from_secs(10),
            offer_delay: Duration::from_millis(100),
            heartbeat_interval: Some(Duration::from_secs(30)),
            audio: true,
            video: true,
        }
    }
}

impl Config {
    /// Relay endpoint for one room: `{server_url}/ws/room/{room_id}/`.
    pub fn room_url(&self, room_id: &str) -> Result<String, ConnectError> {
        let base = self.server_url.trim_end_matches('/');
        if !(base.starts_with("ws://") || base.starts_with("wss://")) {
            return Err(ConnectError::InvalidUrl(format!(
                "expected ws:// or wss:// scheme, got {}",
                self.server_url
            )));
        }
        let room_id = room_id.trim();
        if room_id.is_empty() || room_id.contains('/') {
            return Err(ConnectError::InvalidUrl(format!(
                "invalid room id {:?}",
                room_id
            )));
        }
        Ok(format!("{}/ws/room/{}/", base, room_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn room_url_is_scoped_to_room() {
        let config = Config {
            server_url: "wss://calls.example.com/".to_string(),
            ..Default::default()
        };
        assert_eq!(
            config.room_url("a1b2").unwrap(),
            "wss://calls.example.com/ws/room/a1b2/"
        );
    }

    #[test]
    fn room_url_rejects_http_and_empty_room() {
        let config = Config {
            server_url: "http://localhost:8000".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            config.room_url("abc"),
            Err(ConnectError::InvalidUrl(_))
        ));
        assert!(matches!(
            Config::default().room_url("  "),
            Err(ConnectError::InvalidUrl(_))
        ));
    }

    #[test]
    fn defaults_match_relay_contract() {
        let config = Config::default();
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.offer_delay, Duration::from_millis(100));
        assert_eq!(config.ice_servers.len(), 2);
    }
}
