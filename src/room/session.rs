//! The room actor: one task owns the registry, the local media and the
//! channel handle, and processes every event to completion before the next.
//!
//! Async capability work (offer/answer creation, description and candidate
//! application) runs in spawned tasks so a slow negotiation with one
//! participant never stalls the others. Those tasks only touch the
//! capability; their outcome comes back as a [`RoomEvent::NegotiationFinished`]
//! and all state changes happen here.

use super::state::{Participant, Registry, RemoteStream};
use crate::config::Config;
use crate::connection::{
    ConnectionMonitor, ConnectionState, ConnectionStatus, PeerState, SignalingStage,
};
use crate::error::{AppError, NegotiationError, ProtocolViolation, Result};
use crate::media::{LocalSession, MediaKind, MediaSource};
use crate::negotiation::{self, InboundOffer, OfferDecision};
use crate::notify::{Notifier, Severity};
use crate::peer::{PeerConnectionFactory, PeerEvent, PeerEventKind, PeerEventSink, PeerTransport};
use crate::signaling::{
    ChannelEvent, IceCandidate, MediaState, SessionDescription, SignalingClient, SignalingMessage,
    SignalingSender, NORMAL_CLOSURE,
};
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

const SHORT: Duration = Duration::from_millis(2000);
const MEDIUM: Duration = Duration::from_millis(3000);
const LONG: Duration = Duration::from_millis(5000);
const MEDIA_ERROR: Duration = Duration::from_millis(8000);

#[derive(Debug)]
pub(crate) enum RoomEvent {
    RequestOffer {
        participant_id: String,
    },
    NegotiationFinished {
        participant_id: String,
        generation: u64,
        result: std::result::Result<(), NegotiationError>,
    },
    Toggle(MediaKind),
    Participants(oneshot::Sender<Vec<(Participant, Option<RemoteStream>)>>),
    Shutdown(oneshot::Sender<()>),
}

pub(crate) struct RoomActor {
    config: Config,
    registry: Registry,
    local: LocalSession,
    signaling: SignalingSender,
    factory: Arc<dyn PeerConnectionFactory>,
    notifier: Arc<dyn Notifier>,
    monitor: ConnectionMonitor,
    room_tx: mpsc::UnboundedSender<RoomEvent>,
    peer_tx: mpsc::UnboundedSender<PeerEvent>,
}

impl RoomActor {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        config: Config,
        local: LocalSession,
        signaling: SignalingSender,
        factory: Arc<dyn PeerConnectionFactory>,
        notifier: Arc<dyn Notifier>,
        monitor: ConnectionMonitor,
        room_tx: mpsc::UnboundedSender<RoomEvent>,
        peer_tx: mpsc::UnboundedSender<PeerEvent>,
    ) -> Self {
        Self {
            config,
            registry: Registry::new(),
            local,
            signaling,
            factory,
            notifier,
            monitor,
            room_tx,
            peer_tx,
        }
    }

    #[cfg(test)]
    pub(crate) fn registry(&self) -> &Registry {
        &self.registry
    }

    #[cfg(test)]
    pub(crate) fn negotiation_state(&self, participant_id: &str) -> Option<negotiation::NegotiationState> {
        self.registry
            .peer(participant_id)
            .map(|entry| entry.negotiator.state())
    }

    #[cfg(test)]
    pub(crate) fn pending_offers(&self, participant_id: &str) -> usize {
        self.registry
            .peer(participant_id)
            .map_or(0, |entry| entry.negotiator.pending_offers())
    }

    fn notify(&self, message: &str, severity: Severity, duration: Duration) {
        self.notifier.notify(message, severity, duration);
    }

    fn publish_counts(&self) {
        self.monitor
            .update_counts(self.registry.peer_count(), self.registry.participant_count());
    }

    pub(crate) async fn handle_channel_event(&mut self, event: ChannelEvent) {
        match event {
            ChannelEvent::Message(msg) => self.dispatch(msg).await,
            ChannelEvent::Closed { code, reason } => {
                info!(code, reason = %reason, "Signaling channel closed");
                self.monitor.set_channel_open(false);
                if code != NORMAL_CLOSURE {
                    self.notify("Connection lost", Severity::Error, LONG);
                }
            }
        }
    }

    pub(crate) async fn handle_room_event(&mut self, event: RoomEvent) {
        match event {
            RoomEvent::RequestOffer { participant_id } => {
                if let Err(violation) = self.request_offer(&participant_id) {
                    warn!(%violation, "Offer request dropped");
                }
            }
            RoomEvent::NegotiationFinished {
                participant_id,
                generation,
                result,
            } => self.negotiation_finished(&participant_id, generation, result),
            RoomEvent::Toggle(kind) => self.toggle(kind),
            RoomEvent::Participants(reply) => {
                let _ = reply.send(self.registry.snapshot());
            }
            RoomEvent::Shutdown(ack) => {
                self.teardown().await;
                let _ = ack.send(());
            }
        }
    }

    async fn dispatch(&mut self, msg: SignalingMessage) {
        debug!(kind = msg.kind(), "Received WebSocket message");
        let outcome = match msg {
            SignalingMessage::UserJoined {
                participant_id,
                timestamp,
            } => {
                self.user_joined(&participant_id, timestamp).await;
                Ok(())
            }
            SignalingMessage::UserLeft { participant_id, .. } => {
                self.user_left(&participant_id);
                Ok(())
            }
            SignalingMessage::Offer { offer, sender, .. } => self.inbound_offer(sender, offer).await,
            SignalingMessage::Answer { answer, sender, .. } => self.inbound_answer(sender, answer),
            SignalingMessage::IceCandidate {
                candidate, sender, ..
            } => self.inbound_candidate(sender, candidate),
            SignalingMessage::MediaStateUpdate {
                participant_id,
                state,
            } => {
                if !self.registry.update_media_state(&participant_id, state) {
                    debug!(participant = %participant_id, "Media state for unknown participant");
                }
                Ok(())
            }
            SignalingMessage::Error { message } => {
                warn!(message = %message, "Relay reported an error");
                self.notify(&message, Severity::Error, LONG);
                Ok(())
            }
            SignalingMessage::Pong => Ok(()),
            SignalingMessage::MediaState { .. } | SignalingMessage::Ping => {
                debug!("Ignoring relay-bound message");
                Ok(())
            }
        };
        if let Err(violation) = outcome {
            warn!(%violation, "Dropping signaling message");
        }
        self.publish_counts();
    }

    async fn user_joined(&mut self, participant_id: &str, timestamp: Option<String>) {
        if self.registry.add_participant(participant_id, timestamp) {
            info!(participant = %participant_id, "Participant joined");
        }
        self.notify("Someone joined the call", Severity::Info, MEDIUM);

        if !self.local.is_ready() {
            return;
        }
        if self.ensure_peer(participant_id).await.is_none() {
            return;
        }

        // Let the new entry settle before offering
        let room_tx = self.room_tx.clone();
        let delay = self.config.offer_delay;
        let participant_id = participant_id.to_string();
        tokio::spawn(async move {
            sleep(delay).await;
            let _ = room_tx.send(RoomEvent::RequestOffer { participant_id });
        });
    }

    fn user_left(&mut self, participant_id: &str) {
        let departure = self.registry.remove(participant_id);
        if departure.participant.is_some() {
            info!(participant = %participant_id, "Participant left");
        }
        self.notify("Someone left the call", Severity::Info, MEDIUM);

        if let Some(entry) = departure.peer {
            close_in_background(participant_id.to_string(), entry.transport);
        }
    }

    /// Existing entry's generation, or a freshly created entry's.
    async fn ensure_peer(&mut self, participant_id: &str) -> Option<u64> {
        if let Some(entry) = self.registry.peer(participant_id) {
            return Some(entry.generation);
        }
        let generation = self.registry.reserve_generation();
        let sink = PeerEventSink::new(participant_id, generation, self.peer_tx.clone());
        match self.factory.create(self.local.stream(), sink).await {
            Ok(transport) => {
                let candidates =
                    spawn_candidate_worker(participant_id.to_string(), Arc::clone(&transport));
                self.registry
                    .insert_peer(participant_id, transport, generation, candidates);
                Some(generation)
            }
            Err(e) => {
                error!(participant = %participant_id, "Failed to create peer connection: {}", e);
                None
            }
        }
    }

    fn request_offer(&mut self, participant_id: &str) -> std::result::Result<(), ProtocolViolation> {
        let entry = self
            .registry
            .peer_mut(participant_id)
            .ok_or_else(|| ProtocolViolation::UnknownPeer {
                kind: "local offer",
                participant: participant_id.to_string(),
            })?;
        let stage = entry.transport.signaling_stage();
        match entry.negotiator.request_offer(stage) {
            OfferDecision::Busy => Err(ProtocolViolation::NegotiationInProgress {
                participant: participant_id.to_string(),
            }),
            OfferDecision::WrongStage(stage) => Err(ProtocolViolation::UnexpectedStage {
                kind: "local offer",
                participant: participant_id.to_string(),
                stage: stage.to_string(),
            }),
            OfferDecision::Proceed => {
                info!(participant = %participant_id, %stage, "Creating offer");
                let transport = Arc::clone(&entry.transport);
                let generation = entry.generation;
                let signaling = self.signaling.clone();
                let room_tx = self.room_tx.clone();
                let participant_id = participant_id.to_string();
                tokio::spawn(async move {
                    let result = negotiation::create_local_offer(transport.as_ref())
                        .await
                        .map(|offer| signaling.send(SignalingMessage::offer(offer, &participant_id)));
                    let _ = room_tx.send(RoomEvent::NegotiationFinished {
                        participant_id,
                        generation,
                        result,
                    });
                });
                Ok(())
            }
        }
    }

    async fn inbound_offer(
        &mut self,
        sender: Option<String>,
        offer: SessionDescription,
    ) -> std::result::Result<(), ProtocolViolation> {
        let sender = sender.ok_or(ProtocolViolation::MissingSender { kind: "offer" })?;
        if self.ensure_peer(&sender).await.is_none() {
            return Err(ProtocolViolation::UnknownPeer {
                kind: "offer",
                participant: sender,
            });
        }
        self.apply_offer(&sender, offer)
    }

    fn apply_offer(
        &mut self,
        participant_id: &str,
        offer: SessionDescription,
    ) -> std::result::Result<(), ProtocolViolation> {
        let entry = self
            .registry
            .peer_mut(participant_id)
            .ok_or_else(|| ProtocolViolation::UnknownPeer {
                kind: "offer",
                participant: participant_id.to_string(),
            })?;
        let stage = entry.transport.signaling_stage();
        match entry.negotiator.receive_offer(offer, stage) {
            InboundOffer::Deferred { queued } => {
                warn!(participant = %participant_id, queued, "Already negotiating, queuing offer");
                Ok(())
            }
            InboundOffer::Rejected(stage) => Err(ProtocolViolation::UnexpectedStage {
                kind: "offer",
                participant: participant_id.to_string(),
                stage: stage.to_string(),
            }),
            InboundOffer::Apply(offer) => {
                info!(participant = %participant_id, %stage, "Setting remote description for offer");
                let transport = Arc::clone(&entry.transport);
                let generation = entry.generation;
                let signaling = self.signaling.clone();
                let room_tx = self.room_tx.clone();
                let participant_id = participant_id.to_string();
                tokio::spawn(async move {
                    let result = negotiation::answer_remote_offer(transport.as_ref(), offer)
                        .await
                        .map(|answer| {
                            signaling.send(SignalingMessage::answer(answer, &participant_id))
                        });
                    let _ = room_tx.send(RoomEvent::NegotiationFinished {
                        participant_id,
                        generation,
                        result,
                    });
                });
                Ok(())
            }
        }
    }

    fn negotiation_finished(
        &mut self,
        participant_id: &str,
        generation: u64,
        result: std::result::Result<(), NegotiationError>,
    ) {
        let Some(entry) = self.registry.peer_for(participant_id, generation) else {
            debug!(participant = %participant_id, generation, "Negotiation outcome for a removed peer");
            return;
        };
        entry.negotiator.finish();
        if let Err(e) = result {
            error!(participant = %participant_id, "Negotiation failed: {}", e);
        }

        // Release deferred offers oldest first; the first one applied takes the lock again.
        while let Some(next) = self
            .registry
            .peer_mut(participant_id)
            .and_then(|entry| entry.negotiator.next_deferred())
        {
            match self.apply_offer(participant_id, next) {
                Ok(()) => break,
                Err(violation) => warn!(%violation, "Dropping deferred offer"),
            }
        }
    }

    fn inbound_answer(
        &mut self,
        sender: Option<String>,
        answer: SessionDescription,
    ) -> std::result::Result<(), ProtocolViolation> {
        let sender = sender.ok_or(ProtocolViolation::MissingSender { kind: "answer" })?;
        let entry = self
            .registry
            .peer(&sender)
            .ok_or_else(|| ProtocolViolation::UnknownPeer {
                kind: "answer",
                participant: sender.clone(),
            })?;
        let stage = entry.transport.signaling_stage();
        if stage != SignalingStage::HaveLocalOffer {
            return Err(ProtocolViolation::UnexpectedStage {
                kind: "answer",
                participant: sender,
                stage: stage.to_string(),
            });
        }

        info!(participant = %sender, "Setting remote description for answer");
        let transport = Arc::clone(&entry.transport);
        tokio::spawn(async move {
            if let Err(e) = transport.set_remote_description(answer).await {
                error!(participant = %sender, "Failed to handle WebRTC answer: {}", e);
            }
        });
        Ok(())
    }

    /// Candidates that arrive before any remote description are lost.
    fn inbound_candidate(
        &mut self,
        sender: Option<String>,
        candidate: IceCandidate,
    ) -> std::result::Result<(), ProtocolViolation> {
        let sender = sender.ok_or(ProtocolViolation::MissingSender {
            kind: "ice_candidate",
        })?;
        let entry = self
            .registry
            .peer(&sender)
            .ok_or_else(|| ProtocolViolation::UnknownPeer {
                kind: "ice_candidate",
                participant: sender.clone(),
            })?;

        if entry.candidates.send(candidate).is_err() {
            warn!(participant = %sender, "Candidate queue closed, dropping ICE candidate");
        }
        Ok(())
    }

    pub(crate) fn handle_peer_event(&mut self, event: PeerEvent) {
        let PeerEvent {
            participant_id,
            generation,
            kind,
        } = event;
        if self.registry.peer_for(&participant_id, generation).is_none() {
            debug!(participant = %participant_id, generation, "Event from a removed peer connection");
            return;
        }
        match kind {
            PeerEventKind::LocalCandidate(candidate) => {
                self.signaling
                    .send(SignalingMessage::ice_candidate(candidate, &participant_id));
            }
            PeerEventKind::RemoteTrack(track) => {
                info!(participant = %participant_id, track = %track.track_id, "Received remote track");
                self.registry.attach_track(&participant_id, track);
            }
            PeerEventKind::StateChanged(state) => self.peer_state_changed(&participant_id, state),
        }
        self.publish_counts();
    }

    fn peer_state_changed(&mut self, participant_id: &str, state: PeerState) {
        info!(participant = %participant_id, ?state, "Connection state changed");
        match state {
            PeerState::Connected => {
                self.monitor.update_state(ConnectionState::Connected);
                self.notify(
                    &format!("Connected to {}", participant_id),
                    Severity::Success,
                    SHORT,
                );
            }
            PeerState::Disconnected | PeerState::Failed => {
                if let Some(entry) = self.registry.remove_peer(participant_id) {
                    close_in_background(participant_id.to_string(), entry.transport);
                }
                if state == PeerState::Failed {
                    self.notify(
                        &format!("Connection failed with {}", participant_id),
                        Severity::Error,
                        MEDIUM,
                    );
                }
                if self.registry.peer_count() == 0 {
                    self.monitor.update_state(ConnectionState::Disconnected);
                }
            }
            _ => {}
        }
    }

    fn toggle(&mut self, kind: MediaKind) {
        let Some(state) = self.local.toggle(kind) else {
            return;
        };
        self.signaling.send(SignalingMessage::MediaState { state });

        let message = match (kind, state) {
            (MediaKind::Video, MediaState { video: true, .. }) => "Camera turned on",
            (MediaKind::Video, _) => "Camera turned off",
            (MediaKind::Audio, MediaState { audio: true, .. }) => "Microphone turned on",
            (MediaKind::Audio, _) => "Microphone turned off",
        };
        self.notify(message, Severity::Info, SHORT);
    }

    pub(crate) async fn teardown(&mut self) {
        let entries = self.registry.clear();
        join_all(entries.into_iter().map(|(participant_id, entry)| async move {
            if let Err(e) = entry.transport.close().await {
                warn!(participant = %participant_id, "Error closing peer connection: {}", e);
            }
        }))
        .await;

        self.signaling.close(NORMAL_CLOSURE, "Call ended");
        self.local.release();
        self.monitor.reset();
        info!("Call ended successfully");
    }
}

fn close_in_background(participant_id: String, transport: Arc<dyn PeerTransport>) {
    tokio::spawn(async move {
        if let Err(e) = transport.close().await {
            warn!(participant = %participant_id, "Error closing peer connection: {}", e);
        }
    });
}

/// Applies one participant's candidates strictly in arrival order. Ends when
/// the entry, and with it the sender, is dropped.
fn spawn_candidate_worker(
    participant_id: String,
    transport: Arc<dyn PeerTransport>,
) -> mpsc::UnboundedSender<IceCandidate> {
    let (tx, mut rx) = mpsc::unbounded_channel::<IceCandidate>();
    tokio::spawn(async move {
        while let Some(candidate) = rx.recv().await {
            if !transport.has_remote_description().await {
                let violation = ProtocolViolation::NoRemoteDescription {
                    participant: participant_id.clone(),
                };
                warn!(%violation, "Dropping signaling message");
                continue;
            }
            if let Err(e) = transport.add_ice_candidate(candidate).await {
                error!(participant = %participant_id, "Failed to handle ICE candidate: {}", e);
            }
        }
    });
    tx
}

fn spawn_heartbeat(sender: SignalingSender, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.tick().await;
        loop {
            interval.tick().await;
            if !sender.is_open() {
                break;
            }
            sender.send(SignalingMessage::Ping);
        }
    })
}

async fn run(
    mut actor: RoomActor,
    client: SignalingClient,
    mut channel_rx: mpsc::UnboundedReceiver<ChannelEvent>,
    mut room_rx: mpsc::UnboundedReceiver<RoomEvent>,
    mut peer_rx: mpsc::UnboundedReceiver<PeerEvent>,
) {
    loop {
        tokio::select! {
            Some(event) = room_rx.recv() => {
                let shutdown = matches!(event, RoomEvent::Shutdown(_));
                actor.handle_room_event(event).await;
                if shutdown {
                    break;
                }
            }
            Some(event) = channel_rx.recv() => actor.handle_channel_event(event).await,
            Some(event) = peer_rx.recv() => actor.handle_peer_event(event),
            else => break,
        }
    }
    drop(client);
}

/// Handle to a running call in one room.
///
/// `start` is the only way in and `end` the only way out; between them all
/// state lives inside the room task.
pub struct RoomSession {
    room_id: String,
    commands: mpsc::UnboundedSender<RoomEvent>,
    monitor: ConnectionMonitor,
    task: Option<JoinHandle<()>>,
    heartbeat: Option<JoinHandle<()>>,
}

impl RoomSession {
    /// Acquire local media, connect to the room's relay endpoint and start
    /// processing events. On failure nothing is left running and the local
    /// tracks are stopped.
    pub async fn start(
        room_id: &str,
        config: Config,
        media: &dyn MediaSource,
        factory: Arc<dyn PeerConnectionFactory>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self> {
        let stream = match media.acquire().await {
            Ok(stream) => stream,
            Err(e) => {
                error!("Failed to access camera or microphone: {}", e);
                notifier.notify(&e.to_string(), Severity::Error, MEDIA_ERROR);
                return Err(e.into());
            }
        };

        let connected = match config.room_url(room_id) {
            Ok(url) => SignalingClient::connect(&url, config.connect_timeout).await,
            Err(e) => Err(e),
        };
        let (client, channel_rx) = match connected {
            Ok(connected) => connected,
            Err(e) => {
                error!(room = %room_id, "Failed to connect to room: {}", e);
                stream.stop();
                notifier.notify("Failed to connect to the room", Severity::Error, LONG);
                return Err(e.into());
            }
        };

        let monitor = ConnectionMonitor::new();
        monitor.set_channel_open(true);
        monitor.update_state(ConnectionState::Connecting);

        let mut local = LocalSession::new();
        local.attach(stream);

        let (room_tx, room_rx) = mpsc::unbounded_channel();
        let (peer_tx, peer_rx) = mpsc::unbounded_channel();
        let heartbeat = config
            .heartbeat_interval
            .map(|period| spawn_heartbeat(client.sender(), period));
        let actor = RoomActor::new(
            config,
            local,
            client.sender(),
            factory,
            notifier,
            monitor.clone(),
            room_tx.clone(),
            peer_tx,
        );
        let task = tokio::spawn(run(actor, client, channel_rx, room_rx, peer_rx));

        info!(room = %room_id, "Joined room, awaiting participants");
        Ok(Self {
            room_id: room_id.to_string(),
            commands: room_tx,
            monitor,
            task: Some(task),
            heartbeat,
        })
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    pub fn status(&self) -> watch::Receiver<ConnectionStatus> {
        self.monitor.subscribe()
    }

    pub fn toggle_video(&self) -> Result<()> {
        self.command(RoomEvent::Toggle(MediaKind::Video))
    }

    pub fn toggle_audio(&self) -> Result<()> {
        self.command(RoomEvent::Toggle(MediaKind::Audio))
    }

    /// Remote participants in join order, each with the stream received from
    /// them so far.
    pub async fn participants(&self) -> Result<Vec<(Participant, Option<RemoteStream>)>> {
        let (reply, rx) = oneshot::channel();
        self.command(RoomEvent::Participants(reply))?;
        rx.await.map_err(|_| AppError::SessionClosed)
    }

    fn command(&self, event: RoomEvent) -> Result<()> {
        if self.task.is_none() {
            return Err(AppError::SessionClosed);
        }
        self.commands
            .send(event)
            .map_err(|_| AppError::SessionClosed)
    }

    /// Close every peer connection, the channel and the local tracks.
    /// Calling it again is a no-op.
    pub async fn end(&mut self) {
        let Some(task) = self.task.take() else {
            return;
        };
        if let Some(heartbeat) = self.heartbeat.take() {
            heartbeat.abort();
        }
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.commands.send(RoomEvent::Shutdown(ack_tx)).is_ok() {
            let _ = ack_rx.await;
        }
        if let Err(e) = task.await {
            warn!("Room task ended abnormally: {}", e);
        }
    }
}

impl Drop for RoomSession {
    fn drop(&mut self) {
        if let Some(heartbeat) = self.heartbeat.take() {
            heartbeat.abort();
        }
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
