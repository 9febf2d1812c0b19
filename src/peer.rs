//! Seams between the room and the per-participant peer-connection capability.
//!
//! A capability never holds a reference back to the room: everything it
//! observes is posted as a [`PeerEvent`] through the [`PeerEventSink`] it was
//! created with.

use crate::connection::{PeerState, SignalingStage};
use crate::error::{CreationError, NegotiationError};
use crate::media::{LocalStream, MediaKind};
use crate::signaling::{IceCandidate, SessionDescription};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Description of an inbound track announced by a remote participant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTrack {
    pub track_id: String,
    pub stream_id: String,
    pub kind: MediaKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PeerEventKind {
    LocalCandidate(IceCandidate),
    RemoteTrack(RemoteTrack),
    StateChanged(PeerState),
}

#[derive(Debug, Clone)]
pub struct PeerEvent {
    pub participant_id: String,
    /// Identifies which incarnation of the participant's connection emitted the event.
    pub generation: u64,
    pub kind: PeerEventKind,
}

/// Observer handle given to a capability at creation time.
#[derive(Debug, Clone)]
pub struct PeerEventSink {
    participant_id: String,
    generation: u64,
    tx: mpsc::UnboundedSender<PeerEvent>,
}

impl PeerEventSink {
    pub fn new(
        participant_id: impl Into<String>,
        generation: u64,
        tx: mpsc::UnboundedSender<PeerEvent>,
    ) -> Self {
        Self {
            participant_id: participant_id.into(),
            generation,
            tx,
        }
    }

    pub fn participant_id(&self) -> &str {
        &self.participant_id
    }

    /// Returns `false` once the room is gone.
    pub fn emit(&self, kind: PeerEventKind) -> bool {
        self.tx
            .send(PeerEvent {
                participant_id: self.participant_id.clone(),
                generation: self.generation,
                kind,
            })
            .is_ok()
    }

    pub fn local_candidate(&self, candidate: IceCandidate) -> bool {
        self.emit(PeerEventKind::LocalCandidate(candidate))
    }

    pub fn remote_track(&self, track: RemoteTrack) -> bool {
        self.emit(PeerEventKind::RemoteTrack(track))
    }

    pub fn state_changed(&self, state: PeerState) -> bool {
        self.emit(PeerEventKind::StateChanged(state))
    }
}

/// Peer-connection capability for one remote participant.
#[async_trait]
pub trait PeerTransport: Send + Sync {
    fn signaling_stage(&self) -> SignalingStage;

    async fn has_remote_description(&self) -> bool;

    async fn create_offer(&self) -> Result<SessionDescription, NegotiationError>;

    async fn create_answer(&self) -> Result<SessionDescription, NegotiationError>;

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), NegotiationError>;

    async fn set_remote_description(&self, desc: SessionDescription)
        -> Result<(), NegotiationError>;

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), NegotiationError>;

    async fn close(&self) -> Result<(), NegotiationError>;
}

/// Creates one capability per remote participant, wired to the local tracks
/// and reporting through `events`.
#[async_trait]
pub trait PeerConnectionFactory: Send + Sync {
    async fn create(
        &self,
        local: Option<&LocalStream>,
        events: PeerEventSink,
    ) -> Result<Arc<dyn PeerTransport>, CreationError>;
}
