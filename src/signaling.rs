use crate::error::ConnectError;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

/// Close code of a user-initiated teardown.
pub const NORMAL_CLOSURE: u16 = 1000;
/// Reported when the socket went away without a close frame.
pub const ABNORMAL_CLOSURE: u16 = 1006;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Pranswer,
    Answer,
    Rollback,
}

/// Session description in the browser's JSON shape: `{"type": "offer", "sdp": "..."}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(default)]
    pub sdp_mid: Option<String>,
    #[serde(default, rename = "sdpMLineIndex")]
    pub sdp_mline_index: Option<u16>,
    #[serde(default)]
    pub username_fragment: Option<String>,
}

/// Local enabled-state of both media kinds, always broadcast as a pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaState {
    pub video: bool,
    pub audio: bool,
}

/// Every message exchanged with the relay.
///
/// The relay forwards offers and answers as `webrtc_offer` / `webrtc_answer`
/// and stamps a `timestamp` on everything; both are accepted on input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SignalingMessage {
    UserJoined {
        participant_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<String>,
    },
    UserLeft {
        participant_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<String>,
    },
    #[serde(alias = "webrtc_offer")]
    Offer {
        offer: SessionDescription,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sender: Option<String>,
    },
    #[serde(alias = "webrtc_answer")]
    Answer {
        answer: SessionDescription,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sender: Option<String>,
    },
    IceCandidate {
        candidate: IceCandidate,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sender: Option<String>,
    },
    MediaState {
        state: MediaState,
    },
    MediaStateUpdate {
        participant_id: String,
        state: MediaState,
    },
    Error {
        message: String,
    },
    Ping,
    Pong,
}

impl SignalingMessage {
    pub fn offer(offer: SessionDescription, target: &str) -> Self {
        SignalingMessage::Offer {
            offer,
            target: Some(target.to_string()),
            sender: None,
        }
    }

    pub fn answer(answer: SessionDescription, target: &str) -> Self {
        SignalingMessage::Answer {
            answer,
            target: Some(target.to_string()),
            sender: None,
        }
    }

    pub fn ice_candidate(candidate: IceCandidate, target: &str) -> Self {
        SignalingMessage::IceCandidate {
            candidate,
            target: Some(target.to_string()),
            sender: None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            SignalingMessage::UserJoined { .. } => "user_joined",
            SignalingMessage::UserLeft { .. } => "user_left",
            SignalingMessage::Offer { .. } => "offer",
            SignalingMessage::Answer { .. } => "answer",
            SignalingMessage::IceCandidate { .. } => "ice_candidate",
            SignalingMessage::MediaState { .. } => "media_state",
            SignalingMessage::MediaStateUpdate { .. } => "media_state_update",
            SignalingMessage::Error { .. } => "error",
            SignalingMessage::Ping => "ping",
            SignalingMessage::Pong => "pong",
        }
    }
}

/// What the channel delivers to its owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    Message(SignalingMessage),
    Closed { code: u16, reason: String },
}

#[derive(Debug)]
pub(crate) enum Outbound {
    Message(SignalingMessage),
    Close { code: u16, reason: String },
}

/// Cloneable fire-and-forget handle onto an open channel.
///
/// Sending while the channel is not open drops the message with a warning.
#[derive(Debug, Clone)]
pub struct SignalingSender {
    tx: mpsc::UnboundedSender<Outbound>,
    open: Arc<AtomicBool>,
}

impl SignalingSender {
    pub(crate) fn new(tx: mpsc::UnboundedSender<Outbound>) -> Self {
        Self {
            tx,
            open: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    pub fn send(&self, msg: SignalingMessage) {
        if !self.is_open() {
            warn!(kind = msg.kind(), "WebSocket not connected, message not sent");
            return;
        }
        if self.tx.send(Outbound::Message(msg)).is_err() {
            self.open.store(false, Ordering::SeqCst);
            warn!("WebSocket writer gone, message not sent");
        }
    }

    /// Idempotent: only the first call emits a close frame.
    pub fn close(&self, code: u16, reason: &str) {
        if self.open.swap(false, Ordering::SeqCst) {
            let _ = self.tx.send(Outbound::Close {
                code,
                reason: reason.to_string(),
            });
        }
    }

    fn mark_closed(&self) {
        self.open.store(false, Ordering::SeqCst);
    }
}

/// Room-scoped duplex channel to the relay.
pub struct SignalingClient {
    sender: SignalingSender,
    reader: JoinHandle<()>,
}

impl SignalingClient {
    /// Open the WebSocket, failing with `Timeout` if the relay does not
    /// accept within `timeout`.
    pub async fn connect(
        url: &str,
        timeout: Duration,
    ) -> Result<(Self, mpsc::UnboundedReceiver<ChannelEvent>), ConnectError> {
        info!(url, "Connecting to WebSocket");
        let (ws_stream, _) = match tokio::time::timeout(timeout, connect_async(url)).await {
            Ok(result) => result?,
            Err(_) => return Err(ConnectError::Timeout(timeout)),
        };
        info!("WebSocket connected");

        let (mut write, mut read) = ws_stream.split();
        let (outgoing_tx, mut outgoing_rx) = mpsc::unbounded_channel::<Outbound>();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let sender = SignalingSender::new(outgoing_tx);

        // Handle outgoing messages
        let writer_sender = sender.clone();
        tokio::spawn(async move {
            while let Some(outbound) = outgoing_rx.recv().await {
                let frame = match outbound {
                    Outbound::Message(msg) => match serde_json::to_string(&msg) {
                        Ok(json) => Message::Text(json),
                        Err(e) => {
                            warn!("Failed to serialize {} message: {}", msg.kind(), e);
                            continue;
                        }
                    },
                    Outbound::Close { code, reason } => {
                        let frame = CloseFrame {
                            code: CloseCode::from(code),
                            reason: reason.into(),
                        };
                        if let Err(e) = write.send(Message::Close(Some(frame))).await {
                            debug!("Close frame not delivered: {}", e);
                        }
                        break;
                    }
                };
                if let Err(e) = write.send(frame).await {
                    warn!("WebSocket send failed: {}", e);
                    writer_sender.mark_closed();
                    break;
                }
            }
        });

        // Handle incoming messages
        let reader_sender = sender.clone();
        let reader = tokio::spawn(async move {
            let mut closed = (ABNORMAL_CLOSURE, String::new());
            while let Some(frame) = read.next().await {
                match frame {
                    Ok(Message::Text(text)) => match serde_json::from_str::<SignalingMessage>(&text) {
                        Ok(msg) => {
                            if events_tx.send(ChannelEvent::Message(msg)).is_err() {
                                break;
                            }
                        }
                        Err(e) => warn!("Failed to handle WebSocket message: {}", e),
                    },
                    Ok(Message::Close(frame)) => {
                        if let Some(frame) = frame {
                            closed = (u16::from(frame.code), frame.reason.into_owned());
                        } else {
                            closed = (1005, String::new());
                        }
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!("WebSocket error: {}", e);
                        break;
                    }
                }
            }
            reader_sender.mark_closed();
            info!(code = closed.0, reason = %closed.1, "WebSocket closed");
            let _ = events_tx.send(ChannelEvent::Closed {
                code: closed.0,
                reason: closed.1,
            });
        });

        Ok((Self { sender, reader }, events_rx))
    }

    pub fn sender(&self) -> SignalingSender {
        self.sender.clone()
    }

    pub fn send(&self, msg: SignalingMessage) {
        self.sender.send(msg);
    }

    pub fn close(&self, code: u16, reason: &str) {
        self.sender.close(code, reason);
    }

    pub fn is_open(&self) -> bool {
        self.sender.is_open()
    }
}

impl Drop for SignalingClient {
    fn drop(&mut self) {
        self.reader.abort();
    }
}
