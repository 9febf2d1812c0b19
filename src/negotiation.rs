//! Per-participant offer/answer sequencing.
//!
//! A [`Negotiator`] is a lock plus a FIFO of deferred inbound offers. While it
//! is `Negotiating` no local offer may start and no inbound offer is applied;
//! inbound offers queue up and are released one at a time by [`Negotiator::finish`]
//! followed by [`Negotiator::next_deferred`]. The lock is the only glare
//! avoidance: there is no rollback of a local offer.

use crate::connection::SignalingStage;
use crate::error::NegotiationError;
use crate::peer::PeerTransport;
use crate::signaling::SessionDescription;
use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NegotiationState {
    #[default]
    Idle,
    Negotiating,
}

/// Outcome of asking to send a local offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfferDecision {
    /// Lock taken; create and send the offer.
    Proceed,
    /// Another negotiation holds the lock.
    Busy,
    /// The connection is not `stable`.
    WrongStage(SignalingStage),
}

/// Outcome of an inbound offer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundOffer {
    /// Lock taken; apply the offer and answer it.
    Apply(SessionDescription),
    /// Queued behind the running negotiation; `queued` offers are now waiting.
    Deferred { queued: usize },
    /// The connection cannot take an offer in this stage; the offer is dropped.
    Rejected(SignalingStage),
}

#[derive(Debug, Default)]
pub struct Negotiator {
    state: NegotiationState,
    pending: VecDeque<SessionDescription>,
}

impl Negotiator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> NegotiationState {
        self.state
    }

    pub fn pending_offers(&self) -> usize {
        self.pending.len()
    }

    pub fn request_offer(&mut self, stage: SignalingStage) -> OfferDecision {
        if self.state == NegotiationState::Negotiating {
            return OfferDecision::Busy;
        }
        if stage != SignalingStage::Stable {
            return OfferDecision::WrongStage(stage);
        }
        self.state = NegotiationState::Negotiating;
        OfferDecision::Proceed
    }

    /// `have-local-offer` is accepted: the remote offer wins over our own
    /// outstanding one.
    pub fn receive_offer(&mut self, offer: SessionDescription, stage: SignalingStage) -> InboundOffer {
        if self.state == NegotiationState::Negotiating {
            self.pending.push_back(offer);
            return InboundOffer::Deferred {
                queued: self.pending.len(),
            };
        }
        match stage {
            SignalingStage::Stable | SignalingStage::HaveLocalOffer => {
                self.state = NegotiationState::Negotiating;
                InboundOffer::Apply(offer)
            }
            other => InboundOffer::Rejected(other),
        }
    }

    /// Release the lock, whether the negotiation succeeded or failed.
    pub fn finish(&mut self) {
        self.state = NegotiationState::Idle;
    }

    /// Oldest deferred offer, to be fed back through [`Negotiator::receive_offer`].
    pub fn next_deferred(&mut self) -> Option<SessionDescription> {
        self.pending.pop_front()
    }
}

/// Create an offer and install it as the local description.
pub async fn create_local_offer(
    peer: &dyn PeerTransport,
) -> Result<SessionDescription, NegotiationError> {
    let offer = peer.create_offer().await?;
    peer.set_local_description(offer.clone()).await?;
    Ok(offer)
}

/// Apply a remote offer, then create and install the answer.
pub async fn answer_remote_offer(
    peer: &dyn PeerTransport,
    offer: SessionDescription,
) -> Result<SessionDescription, NegotiationError> {
    peer.set_remote_description(offer).await?;
    let answer = peer.create_answer().await?;
    peer.set_local_description(answer.clone()).await?;
    Ok(answer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockPeer;

    fn offer(sdp: &str) -> SessionDescription {
        SessionDescription::offer(sdp)
    }

    #[test]
    fn local_offer_requires_idle_and_stable() {
        let mut negotiator = Negotiator::new();
        assert_eq!(
            negotiator.request_offer(SignalingStage::HaveRemoteOffer),
            OfferDecision::WrongStage(SignalingStage::HaveRemoteOffer)
        );
        assert_eq!(negotiator.state(), NegotiationState::Idle);

        assert_eq!(negotiator.request_offer(SignalingStage::Stable), OfferDecision::Proceed);
        assert_eq!(negotiator.state(), NegotiationState::Negotiating);
        assert_eq!(negotiator.request_offer(SignalingStage::Stable), OfferDecision::Busy);

        negotiator.finish();
        assert_eq!(negotiator.state(), NegotiationState::Idle);
    }

    #[test]
    fn offers_during_negotiation_are_deferred_in_order() {
        let mut negotiator = Negotiator::new();
        negotiator.request_offer(SignalingStage::Stable);

        assert_eq!(
            negotiator.receive_offer(offer("first"), SignalingStage::HaveLocalOffer),
            InboundOffer::Deferred { queued: 1 }
        );
        assert_eq!(
            negotiator.receive_offer(offer("second"), SignalingStage::Stable),
            InboundOffer::Deferred { queued: 2 }
        );

        negotiator.finish();
        let next = negotiator.next_deferred().unwrap();
        assert_eq!(next.sdp, "first");
        assert_eq!(
            negotiator.receive_offer(next, SignalingStage::HaveLocalOffer),
            InboundOffer::Apply(offer("first"))
        );
        // The second offer stays queued behind the one being applied.
        assert_eq!(negotiator.pending_offers(), 1);

        negotiator.finish();
        assert_eq!(negotiator.next_deferred().unwrap().sdp, "second");
        assert!(negotiator.next_deferred().is_none());
    }

    #[test]
    fn offer_in_remote_offer_stage_is_rejected_not_queued() {
        let mut negotiator = Negotiator::new();
        assert_eq!(
            negotiator.receive_offer(offer("x"), SignalingStage::HaveRemoteOffer),
            InboundOffer::Rejected(SignalingStage::HaveRemoteOffer)
        );
        assert_eq!(negotiator.state(), NegotiationState::Idle);
        assert_eq!(negotiator.pending_offers(), 0);
    }

    #[test]
    fn local_offer_and_inbound_offer_exclude_each_other() {
        let mut negotiator = Negotiator::new();
        assert!(matches!(
            negotiator.receive_offer(offer("remote"), SignalingStage::Stable),
            InboundOffer::Apply(_)
        ));
        assert_eq!(negotiator.request_offer(SignalingStage::Stable), OfferDecision::Busy);
    }

    #[tokio::test]
    async fn offer_procedure_installs_local_description() {
        let peer = MockPeer::new();
        let offer = create_local_offer(&peer).await.unwrap();
        assert_eq!(peer.signaling_stage(), SignalingStage::HaveLocalOffer);
        assert_eq!(peer.local_description(), Some(offer));
    }

    #[tokio::test]
    async fn answer_procedure_returns_to_stable() {
        let peer = MockPeer::new();
        let answer = answer_remote_offer(&peer, offer("remote")).await.unwrap();
        assert_eq!(answer.sdp_type, crate::signaling::SdpType::Answer);
        assert_eq!(peer.signaling_stage(), SignalingStage::Stable);
        assert_eq!(peer.applied_remote(), vec!["remote".to_string()]);
    }

    #[tokio::test]
    async fn failures_propagate() {
        let peer = MockPeer::new();
        peer.fail_next();
        assert!(create_local_offer(&peer).await.is_err());
        assert_eq!(peer.signaling_stage(), SignalingStage::Stable);
    }
}
