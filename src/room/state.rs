use crate::negotiation::Negotiator;
use crate::peer::{PeerTransport, RemoteTrack};
use crate::signaling::{IceCandidate, MediaState};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;

/// A remote participant announced by the relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Participant {
    pub id: String,
    pub joined_at: Option<String>,
    pub media_state: Option<MediaState>,
}

/// Inbound media received from one participant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteStream {
    pub stream_id: String,
    pub tracks: Vec<RemoteTrack>,
}

/// Peer connection to one participant plus its negotiation lock and queue.
pub struct PeerConnectionEntry {
    pub transport: Arc<dyn PeerTransport>,
    pub negotiator: Negotiator,
    pub generation: u64,
    /// Inbound candidates, applied one at a time in arrival order.
    pub candidates: mpsc::UnboundedSender<IceCandidate>,
}

/// What a departure removed.
pub struct Departure {
    pub participant: Option<Participant>,
    pub peer: Option<PeerConnectionEntry>,
}

/// Every participant and peer connection of the room, keyed by participant ID.
///
/// A peer connection may exist before its participant record: an offer can
/// arrive before `user_joined`.
#[derive(Default)]
pub struct Registry {
    participants: HashMap<String, Participant>,
    peers: HashMap<String, PeerConnectionEntry>,
    streams: HashMap<String, RemoteStream>,
    next_generation: u64,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` if the participant was already known.
    pub fn add_participant(&mut self, id: &str, joined_at: Option<String>) -> bool {
        if self.participants.contains_key(id) {
            return false;
        }
        self.participants.insert(
            id.to_string(),
            Participant {
                id: id.to_string(),
                joined_at,
                media_state: None,
            },
        );
        true
    }

    pub fn participant(&self, id: &str) -> Option<&Participant> {
        self.participants.get(id)
    }

    fn ordered(&self) -> Vec<&Participant> {
        let mut participants: Vec<&Participant> = self.participants.values().collect();
        participants.sort_by(|a, b| a.joined_at.cmp(&b.joined_at).then(a.id.cmp(&b.id)));
        participants
    }

    /// Participant IDs in join order of the timestamps the relay supplied.
    pub fn participant_ids(&self) -> Vec<String> {
        self.ordered().into_iter().map(|p| p.id.clone()).collect()
    }

    /// Every participant in join order, with the media received from them so far.
    pub fn snapshot(&self) -> Vec<(Participant, Option<RemoteStream>)> {
        self.ordered()
            .into_iter()
            .map(|p| (p.clone(), self.streams.get(&p.id).cloned()))
            .collect()
    }

    pub fn participant_count(&self) -> usize {
        self.participants.len()
    }

    /// No-op for unknown participants.
    pub fn update_media_state(&mut self, id: &str, state: MediaState) -> bool {
        match self.participants.get_mut(id) {
            Some(participant) => {
                participant.media_state = Some(state);
                true
            }
            None => false,
        }
    }

    pub fn reserve_generation(&mut self) -> u64 {
        self.next_generation += 1;
        self.next_generation
    }

    pub fn insert_peer(
        &mut self,
        id: &str,
        transport: Arc<dyn PeerTransport>,
        generation: u64,
        candidates: mpsc::UnboundedSender<IceCandidate>,
    ) {
        self.peers.insert(
            id.to_string(),
            PeerConnectionEntry {
                transport,
                negotiator: Negotiator::new(),
                generation,
                candidates,
            },
        );
    }

    pub fn peer(&self, id: &str) -> Option<&PeerConnectionEntry> {
        self.peers.get(id)
    }

    pub fn peer_mut(&mut self, id: &str) -> Option<&mut PeerConnectionEntry> {
        self.peers.get_mut(id)
    }

    /// The entry only if it is still the incarnation that `generation` names.
    pub fn peer_for(&mut self, id: &str, generation: u64) -> Option<&mut PeerConnectionEntry> {
        self.peers
            .get_mut(id)
            .filter(|entry| entry.generation == generation)
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    /// Drop the peer connection and the stream it delivered.
    pub fn remove_peer(&mut self, id: &str) -> Option<PeerConnectionEntry> {
        self.streams.remove(id);
        self.peers.remove(id)
    }

    pub fn attach_track(&mut self, id: &str, track: RemoteTrack) {
        let stream = self
            .streams
            .entry(id.to_string())
            .or_insert_with(|| RemoteStream {
                stream_id: track.stream_id.clone(),
                tracks: Vec::new(),
            });
        if stream.stream_id != track.stream_id {
            stream.stream_id = track.stream_id.clone();
            stream.tracks.clear();
        }
        if !stream.tracks.iter().any(|t| t.track_id == track.track_id) {
            stream.tracks.push(track);
        }
    }

    pub fn stream(&self, id: &str) -> Option<&RemoteStream> {
        self.streams.get(id)
    }

    /// Forget everything about `id` in one pass.
    pub fn remove(&mut self, id: &str) -> Departure {
        Departure {
            participant: self.participants.remove(id),
            peer: self.remove_peer(id),
        }
    }

    /// Empty the registry, handing back the peer connections to close.
    pub fn clear(&mut self) -> Vec<(String, PeerConnectionEntry)> {
        self.participants.clear();
        self.streams.clear();
        self.peers.drain().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::MediaKind;
    use crate::testing::MockPeer;

    fn insert(registry: &mut Registry, id: &str, generation: u64) {
        let (candidates, _) = mpsc::unbounded_channel();
        registry.insert_peer(id, Arc::new(MockPeer::new()), generation, candidates);
    }

    fn track(stream: &str, id: &str) -> RemoteTrack {
        RemoteTrack {
            track_id: id.to_string(),
            stream_id: stream.to_string(),
            kind: MediaKind::Video,
        }
    }

    #[test]
    fn participants_are_unique() {
        let mut registry = Registry::new();
        assert!(registry.add_participant("alice", Some("2024-01-01T00:00:01".to_string())));
        assert!(!registry.add_participant("alice", Some("2024-01-01T00:00:09".to_string())));
        assert!(registry.add_participant("bob", Some("2024-01-01T00:00:00".to_string())));

        assert_eq!(registry.participant_count(), 2);
        assert_eq!(registry.participant_ids(), vec!["bob", "alice"]);
        assert_eq!(
            registry.participant("alice").unwrap().joined_at.as_deref(),
            Some("2024-01-01T00:00:01")
        );
    }

    #[test]
    fn media_state_update_ignores_unknown() {
        let mut registry = Registry::new();
        registry.add_participant("alice", None);
        let state = MediaState {
            video: false,
            audio: true,
        };
        assert!(registry.update_media_state("alice", state));
        assert!(!registry.update_media_state("ghost", state));
        assert_eq!(registry.participant("alice").unwrap().media_state, Some(state));
        assert!(registry.participant("ghost").is_none());
    }

    #[test]
    fn remove_clears_participant_peer_and_stream() {
        let mut registry = Registry::new();
        registry.add_participant("alice", None);
        let generation = registry.reserve_generation();
        insert(&mut registry, "alice", generation);
        registry.attach_track("alice", track("s1", "v1"));

        let departure = registry.remove("alice");
        assert!(departure.participant.is_some());
        assert!(departure.peer.is_some());
        assert!(registry.participant("alice").is_none());
        assert!(registry.peer("alice").is_none());
        assert!(registry.stream("alice").is_none());
    }

    #[test]
    fn stale_generation_is_not_returned() {
        let mut registry = Registry::new();
        let first = registry.reserve_generation();
        insert(&mut registry, "alice", first);
        registry.remove_peer("alice");
        let second = registry.reserve_generation();
        insert(&mut registry, "alice", second);

        assert!(registry.peer_for("alice", first).is_none());
        assert!(registry.peer_for("alice", second).is_some());
    }

    #[test]
    fn tracks_group_into_one_stream() {
        let mut registry = Registry::new();
        registry.attach_track("alice", track("s1", "a1"));
        registry.attach_track("alice", track("s1", "v1"));
        registry.attach_track("alice", track("s1", "v1"));
        assert_eq!(registry.stream("alice").unwrap().tracks.len(), 2);

        registry.attach_track("alice", track("s2", "v2"));
        let stream = registry.stream("alice").unwrap();
        assert_eq!(stream.stream_id, "s2");
        assert_eq!(stream.tracks.len(), 1);
    }

    #[test]
    fn snapshot_lists_participants_in_join_order_with_media() {
        let mut registry = Registry::new();
        registry.add_participant("carol", Some("2024-01-01T00:00:05".to_string()));
        registry.add_participant("alice", Some("2024-01-01T00:00:01".to_string()));
        let muted = MediaState {
            video: true,
            audio: false,
        };
        registry.update_media_state("carol", muted);
        registry.attach_track("alice", track("s1", "v1"));

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].0.id, "alice");
        assert_eq!(snapshot[0].1.as_ref().map(|s| s.stream_id.as_str()), Some("s1"));
        assert_eq!(snapshot[1].0.id, "carol");
        assert_eq!(snapshot[1].0.media_state, Some(muted));
        assert!(snapshot[1].1.is_none());
    }
}
