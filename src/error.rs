use std::time::Duration;
use thiserror::Error;
use tokio_tungstenite::tungstenite::Error as WsError;
use webrtc::Error as WebRTCError;

/// Local capture could not be started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum MediaAcquisitionError {
    #[error("Camera and microphone access denied. Please allow permissions and try again.")]
    PermissionDenied,
    #[error("No camera or microphone found on this device.")]
    DeviceNotFound,
    #[error("Camera or microphone is already in use by another application.")]
    DeviceBusy,
}

/// The signaling channel never reached the open state.
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("invalid relay address: {0}")]
    InvalidUrl(String),
    #[error("no open acknowledgment within {0:?}")]
    Timeout(Duration),
    #[error("WebSocket error: {0}")]
    Transport(#[from] WsError),
}

/// A peer-connection capability could not be instantiated for one participant.
#[derive(Debug, Error)]
pub enum CreationError {
    #[error("WebRTC error: {0}")]
    WebRTC(#[from] WebRTCError),
    #[error("{0}")]
    Other(String),
}

/// Offer/answer creation or description application failed.
#[derive(Debug, Error)]
pub enum NegotiationError {
    #[error("WebRTC error: {0}")]
    WebRTC(#[from] WebRTCError),
    #[error("invalid session description: {0}")]
    InvalidDescription(String),
    #[error("no local description after applying {0}")]
    MissingLocalDescription(&'static str),
    #[error("{0}")]
    Other(String),
}

/// An inbound message the current signaling stage cannot accept.
///
/// These are never propagated; the dispatcher logs them and moves on.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolViolation {
    #[error("{kind} without a sender")]
    MissingSender { kind: &'static str },
    #[error("{kind} from {participant}: no peer connection")]
    UnknownPeer {
        kind: &'static str,
        participant: String,
    },
    #[error("{kind} from {participant} in signaling stage {stage}")]
    UnexpectedStage {
        kind: &'static str,
        participant: String,
        stage: String,
    },
    #[error("ICE candidate from {participant}: no remote description set")]
    NoRemoteDescription { participant: String },
    #[error("already negotiating with {participant}")]
    NegotiationInProgress { participant: String },
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Media(#[from] MediaAcquisitionError),
    #[error("signaling connection failed: {0}")]
    Connect(#[from] ConnectError),
    #[error("session is not running")]
    SessionClosed,
}

pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn media_errors_carry_user_facing_text() {
        assert_eq!(
            MediaAcquisitionError::DeviceBusy.to_string(),
            "Camera or microphone is already in use by another application."
        );
        let err: AppError = MediaAcquisitionError::DeviceNotFound.into();
        assert_eq!(err.to_string(), "No camera or microphone found on this device.");
    }

    #[test]
    fn connect_timeout_reports_interval() {
        let err: AppError = ConnectError::Timeout(Duration::from_secs(10)).into();
        assert_eq!(
            err.to_string(),
            "signaling connection failed: no open acknowledgment within 10s"
        );
    }
}
