//! Local media: the capture collaborator seam and track enablement.

use crate::error::MediaAcquisitionError;
use crate::signaling::MediaState;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Audio,
    Video,
}

/// One local track. Clones share the enabled/live flags with whatever
/// writes samples into `rtp`.
#[derive(Clone)]
pub struct LocalTrack {
    kind: MediaKind,
    rtp: Arc<TrackLocalStaticSample>,
    enabled: Arc<AtomicBool>,
    live: Arc<AtomicBool>,
}

impl LocalTrack {
    pub fn new(kind: MediaKind, rtp: Arc<TrackLocalStaticSample>) -> Self {
        Self {
            kind,
            rtp,
            enabled: Arc::new(AtomicBool::new(true)),
            live: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    pub fn rtp_track(&self) -> Arc<TrackLocalStaticSample> {
        Arc::clone(&self.rtp)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    pub fn stop(&self) {
        self.live.store(false, Ordering::SeqCst);
    }
}

/// Handle to acquired capture tracks.
#[derive(Clone)]
pub struct LocalStream {
    id: String,
    tracks: Vec<LocalTrack>,
}

impl LocalStream {
    pub fn new(id: impl Into<String>, tracks: Vec<LocalTrack>) -> Self {
        Self {
            id: id.into(),
            tracks,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn tracks(&self) -> &[LocalTrack] {
        &self.tracks
    }

    /// First track of the given kind.
    pub fn track(&self, kind: MediaKind) -> Option<&LocalTrack> {
        self.tracks.iter().find(|t| t.kind == kind)
    }

    pub fn stop(&self) {
        for track in &self.tracks {
            track.stop();
        }
    }
}

/// Acquires local capture. Device access itself lives outside this crate.
#[async_trait]
pub trait MediaSource: Send + Sync {
    async fn acquire(&self) -> Result<LocalStream, MediaAcquisitionError>;
}

/// Produces Opus/VP8 sample tracks without touching any device; samples are
/// written into them by whoever owns the capture pipeline.
#[derive(Debug, Clone)]
pub struct StaticMediaSource {
    pub audio: bool,
    pub video: bool,
}

static STREAM_COUNTER: AtomicU64 = AtomicU64::new(0);

#[async_trait]
impl MediaSource for StaticMediaSource {
    async fn acquire(&self) -> Result<LocalStream, MediaAcquisitionError> {
        if !self.audio && !self.video {
            return Err(MediaAcquisitionError::DeviceNotFound);
        }
        let stream_id = format!("local-{}", STREAM_COUNTER.fetch_add(1, Ordering::Relaxed));
        let mut tracks = Vec::new();

        if self.audio {
            let track = Arc::new(TrackLocalStaticSample::new(
                RTCRtpCodecCapability {
                    mime_type: "audio/opus".to_owned(),
                    clock_rate: 48000,
                    channels: 2,
                    ..Default::default()
                },
                "audio".to_owned(),
                stream_id.clone(),
            ));
            tracks.push(LocalTrack::new(MediaKind::Audio, track));
        }
        if self.video {
            let track = Arc::new(TrackLocalStaticSample::new(
                RTCRtpCodecCapability {
                    mime_type: "video/VP8".to_owned(),
                    clock_rate: 90000,
                    ..Default::default()
                },
                "video".to_owned(),
                stream_id.clone(),
            ));
            tracks.push(LocalTrack::new(MediaKind::Video, track));
        }

        info!(stream_id = %stream_id, tracks = tracks.len(), "Local media acquired");
        Ok(LocalStream::new(stream_id, tracks))
    }
}

/// Local half of the call: the acquired stream and its enabled flags.
pub struct LocalSession {
    stream: Option<LocalStream>,
    video_enabled: bool,
    audio_enabled: bool,
}

impl Default for LocalSession {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalSession {
    pub fn new() -> Self {
        Self {
            stream: None,
            video_enabled: true,
            audio_enabled: true,
        }
    }

    /// Take ownership of a freshly acquired stream; flags follow its tracks.
    pub fn attach(&mut self, stream: LocalStream) {
        if let Some(track) = stream.track(MediaKind::Video) {
            self.video_enabled = track.is_enabled();
        }
        if let Some(track) = stream.track(MediaKind::Audio) {
            self.audio_enabled = track.is_enabled();
        }
        self.stream = Some(stream);
    }

    pub fn stream(&self) -> Option<&LocalStream> {
        self.stream.as_ref()
    }

    pub fn is_ready(&self) -> bool {
        self.stream.is_some()
    }

    pub fn media_state(&self) -> MediaState {
        MediaState {
            video: self.video_enabled,
            audio: self.audio_enabled,
        }
    }

    /// Flip the first track of `kind`. Returns the full state to broadcast,
    /// or `None` when there is no stream or no such track.
    pub fn toggle(&mut self, kind: MediaKind) -> Option<MediaState> {
        let track = self.stream.as_ref()?.track(kind)?;
        let enabled = !track.is_enabled();
        track.set_enabled(enabled);
        match kind {
            MediaKind::Video => self.video_enabled = enabled,
            MediaKind::Audio => self.audio_enabled = enabled,
        }
        debug!(?kind, enabled, "Local track toggled");
        Some(self.media_state())
    }

    /// Stop every track and drop the stream.
    pub fn release(&mut self) {
        if let Some(stream) = self.stream.take() {
            stream.stop();
            info!(stream_id = stream.id(), "Local media released");
        }
    }
}
