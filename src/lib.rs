//! Multi-party mesh video calls: one peer connection per remote participant,
//! brokered through a room-scoped WebSocket relay.

pub mod config;
pub mod connection;
pub mod error;
pub mod media;
pub mod negotiation;
pub mod notify;
pub mod peer;
pub mod room;
pub mod signaling;
pub mod webrtc;

#[cfg(test)]
mod testing;

pub use config::Config;
pub use connection::{ConnectionMonitor, ConnectionState, ConnectionStatus};
pub use error::{AppError, Result};
pub use media::{LocalSession, LocalStream, MediaKind, MediaSource, StaticMediaSource};
pub use notify::{LogNotifier, Notifier, Severity};
pub use peer::{PeerConnectionFactory, PeerTransport};
pub use room::{Participant, RemoteStream, RoomSession};
pub use signaling::{SignalingClient, SignalingMessage};
