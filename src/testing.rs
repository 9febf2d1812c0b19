//! Scripted collaborators for unit tests.

use crate::connection::SignalingStage;
use crate::error::{CreationError, NegotiationError};
use crate::media::LocalStream;
use crate::notify::{Notifier, Severity};
use crate::peer::{PeerConnectionFactory, PeerEventSink, PeerTransport};
use crate::signaling::{IceCandidate, SdpType, SessionDescription};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Simulates the signaling stages of a peer connection.
#[derive(Default)]
pub struct MockPeer {
    stage: Mutex<Option<SignalingStage>>,
    local: Mutex<Option<SessionDescription>>,
    remote: Mutex<Vec<String>>,
    candidates: Mutex<Vec<IceCandidate>>,
    fail_next: AtomicBool,
    candidate_delay: Mutex<Option<Duration>>,
    closed: AtomicBool,
    counter: AtomicU32,
}

impl MockPeer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next offer/answer creation fail.
    pub fn fail_next(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    /// Hold the next `add_ice_candidate` call for `delay` before recording it.
    pub fn delay_next_candidate(&self, delay: Duration) {
        *self.candidate_delay.lock().unwrap() = Some(delay);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn local_description(&self) -> Option<SessionDescription> {
        self.local.lock().unwrap().clone()
    }

    /// SDP of every remote description applied, in order.
    pub fn applied_remote(&self) -> Vec<String> {
        self.remote.lock().unwrap().clone()
    }

    pub fn candidates(&self) -> Vec<IceCandidate> {
        self.candidates.lock().unwrap().clone()
    }

    fn set_stage(&self, stage: SignalingStage) {
        *self.stage.lock().unwrap() = Some(stage);
    }

    fn injected_failure(&self) -> Result<(), NegotiationError> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(NegotiationError::Other("injected failure".to_string()));
        }
        Ok(())
    }

    fn wrong_stage(&self, what: &str) -> NegotiationError {
        NegotiationError::Other(format!("cannot {} in {}", what, self.signaling_stage()))
    }
}

#[async_trait]
impl PeerTransport for MockPeer {
    fn signaling_stage(&self) -> SignalingStage {
        self.stage.lock().unwrap().unwrap_or(SignalingStage::Stable)
    }

    async fn has_remote_description(&self) -> bool {
        !self.remote.lock().unwrap().is_empty()
    }

    async fn create_offer(&self) -> Result<SessionDescription, NegotiationError> {
        self.injected_failure()?;
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        Ok(SessionDescription::offer(format!("mock-offer-{}", n)))
    }

    async fn create_answer(&self) -> Result<SessionDescription, NegotiationError> {
        self.injected_failure()?;
        if self.signaling_stage() != SignalingStage::HaveRemoteOffer {
            return Err(self.wrong_stage("answer"));
        }
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        Ok(SessionDescription::answer(format!("mock-answer-{}", n)))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), NegotiationError> {
        let next = match (self.signaling_stage(), desc.sdp_type) {
            (SignalingStage::Stable, SdpType::Offer) => SignalingStage::HaveLocalOffer,
            (SignalingStage::HaveRemoteOffer, SdpType::Answer) => SignalingStage::Stable,
            _ => return Err(self.wrong_stage("set local description")),
        };
        self.set_stage(next);
        *self.local.lock().unwrap() = Some(desc);
        Ok(())
    }

    async fn set_remote_description(
        &self,
        desc: SessionDescription,
    ) -> Result<(), NegotiationError> {
        let next = match (self.signaling_stage(), desc.sdp_type) {
            (SignalingStage::Stable | SignalingStage::HaveLocalOffer, SdpType::Offer) => {
                SignalingStage::HaveRemoteOffer
            }
            (SignalingStage::HaveLocalOffer, SdpType::Answer) => SignalingStage::Stable,
            _ => return Err(self.wrong_stage("set remote description")),
        };
        self.set_stage(next);
        self.remote.lock().unwrap().push(desc.sdp);
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), NegotiationError> {
        let delay = self.candidate_delay.lock().unwrap().take();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.candidates.lock().unwrap().push(candidate);
        Ok(())
    }

    async fn close(&self) -> Result<(), NegotiationError> {
        self.closed.store(true, Ordering::SeqCst);
        self.set_stage(SignalingStage::Closed);
        Ok(())
    }
}

/// Hands out [`MockPeer`]s and remembers them by participant.
#[derive(Default)]
pub struct MockFactory {
    peers: Mutex<HashMap<String, Arc<MockPeer>>>,
    sinks: Mutex<HashMap<String, PeerEventSink>>,
    failing: Mutex<HashSet<String>>,
    created: AtomicU32,
}

impl MockFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_for(&self, participant_id: &str) {
        self.failing.lock().unwrap().insert(participant_id.to_string());
    }

    pub fn peer(&self, participant_id: &str) -> Arc<MockPeer> {
        Arc::clone(&self.peers.lock().unwrap()[participant_id])
    }

    pub fn sink(&self, participant_id: &str) -> PeerEventSink {
        self.sinks.lock().unwrap()[participant_id].clone()
    }

    pub fn created(&self) -> u32 {
        self.created.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PeerConnectionFactory for MockFactory {
    async fn create(
        &self,
        _local: Option<&LocalStream>,
        events: PeerEventSink,
    ) -> Result<Arc<dyn PeerTransport>, CreationError> {
        let id = events.participant_id().to_string();
        if self.failing.lock().unwrap().contains(&id) {
            return Err(CreationError::Other(format!("refusing to create {}", id)));
        }
        let peer = Arc::new(MockPeer::new());
        self.peers.lock().unwrap().insert(id.clone(), Arc::clone(&peer));
        self.sinks.lock().unwrap().insert(id, events);
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(peer)
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    entries: Mutex<Vec<(String, Severity, Duration)>>,
}

impl RecordingNotifier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn messages(&self) -> Vec<String> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .map(|(message, _, _)| message.clone())
            .collect()
    }

    pub fn entries(&self) -> Vec<(String, Severity, Duration)> {
        self.entries.lock().unwrap().clone()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, message: &str, severity: Severity, duration: Duration) {
        self.entries
            .lock()
            .unwrap()
            .push((message.to_string(), severity, duration));
    }
}
