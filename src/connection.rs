use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::signaling_state::RTCSignalingState;

/// Aggregate state of the call across all peers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::New => write!(f, "new"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Failed => write!(f, "failed"),
        }
    }
}

/// Connection state of a single peer connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl From<RTCPeerConnectionState> for PeerState {
    fn from(state: RTCPeerConnectionState) -> Self {
        match state {
            RTCPeerConnectionState::Connecting => PeerState::Connecting,
            RTCPeerConnectionState::Connected => PeerState::Connected,
            RTCPeerConnectionState::Disconnected => PeerState::Disconnected,
            RTCPeerConnectionState::Failed => PeerState::Failed,
            RTCPeerConnectionState::Closed => PeerState::Closed,
            _ => PeerState::New,
        }
    }
}

/// Negotiation stage of the underlying peer connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalingStage {
    Stable,
    HaveLocalOffer,
    HaveRemoteOffer,
    HaveLocalPranswer,
    HaveRemotePranswer,
    Closed,
}

impl fmt::Display for SignalingStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalingStage::Stable => write!(f, "stable"),
            SignalingStage::HaveLocalOffer => write!(f, "have-local-offer"),
            SignalingStage::HaveRemoteOffer => write!(f, "have-remote-offer"),
            SignalingStage::HaveLocalPranswer => write!(f, "have-local-pranswer"),
            SignalingStage::HaveRemotePranswer => write!(f, "have-remote-pranswer"),
            SignalingStage::Closed => write!(f, "closed"),
        }
    }
}

impl From<RTCSignalingState> for SignalingStage {
    fn from(state: RTCSignalingState) -> Self {
        match state {
            RTCSignalingState::HaveLocalOffer => SignalingStage::HaveLocalOffer,
            RTCSignalingState::HaveRemoteOffer => SignalingStage::HaveRemoteOffer,
            RTCSignalingState::HaveLocalPranswer => SignalingStage::HaveLocalPranswer,
            RTCSignalingState::HaveRemotePranswer => SignalingStage::HaveRemotePranswer,
            RTCSignalingState::Closed => SignalingStage::Closed,
            _ => SignalingStage::Stable,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionStatus {
    pub state: ConnectionState,
    pub channel_open: bool,
    pub peers: usize,
    pub participants: usize,
}

impl Default for ConnectionStatus {
    fn default() -> Self {
        Self {
            state: ConnectionState::New,
            channel_open: false,
            peers: 0,
            participants: 0,
        }
    }
}

/// Publishes the room's [`ConnectionStatus`] to any number of observers.
#[derive(Clone)]
pub struct ConnectionMonitor {
    status: Arc<watch::Sender<ConnectionStatus>>,
    receiver: watch::Receiver<ConnectionStatus>,
}

impl Default for ConnectionMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionMonitor {
    pub fn new() -> Self {
        let (status, receiver) = watch::channel(ConnectionStatus::default());
        Self {
            status: Arc::new(status),
            receiver,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.receiver.borrow().state
    }

    pub fn update_state(&self, state: ConnectionState) {
        self.status.send_if_modified(|status| {
            let changed = status.state != state;
            status.state = state;
            changed
        });
    }

    pub fn set_channel_open(&self, open: bool) {
        self.status.send_if_modified(|status| {
            let changed = status.channel_open != open;
            status.channel_open = open;
            changed
        });
    }

    pub fn update_counts(&self, peers: usize, participants: usize) {
        self.status.send_if_modified(|status| {
            let changed = status.peers != peers || status.participants != participants;
            status.peers = peers;
            status.participants = participants;
            changed
        });
    }

    pub fn reset(&self) {
        self.status.send_replace(ConnectionStatus::default());
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionStatus> {
        self.receiver.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_webrtc_states() {
        assert_eq!(
            SignalingStage::from(RTCSignalingState::HaveLocalOffer),
            SignalingStage::HaveLocalOffer
        );
        assert_eq!(SignalingStage::from(RTCSignalingState::Stable), SignalingStage::Stable);
        assert_eq!(
            PeerState::from(RTCPeerConnectionState::Failed),
            PeerState::Failed
        );
        assert_eq!(SignalingStage::HaveLocalOffer.to_string(), "have-local-offer");
    }

    #[tokio::test]
    async fn subscribers_see_state_changes() {
        let monitor = ConnectionMonitor::new();
        let mut rx = monitor.subscribe();

        monitor.update_state(ConnectionState::Connected);
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().state, ConnectionState::Connected);

        monitor.update_counts(2, 3);
        monitor.reset();
        assert_eq!(*rx.borrow_and_update(), ConnectionStatus::default());
    }
}
