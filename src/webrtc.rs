use crate::connection::{PeerState, SignalingStage};
use crate::error::{CreationError, NegotiationError};
use crate::media::{LocalStream, MediaKind};
use crate::peer::{PeerConnectionFactory, PeerEventSink, PeerTransport, RemoteTrack};
use crate::signaling::{IceCandidate, SdpType, SessionDescription};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::{APIBuilder, API};
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

/// Builds `RTCPeerConnection`s configured with the room's ICE servers.
pub struct WebRTCPeerFactory {
    api: API,
    ice_servers: Vec<RTCIceServer>,
}

impl WebRTCPeerFactory {
    pub fn new(ice_servers: &[String]) -> Result<Self, CreationError> {
        // Create a MediaEngine object to configure the supported codec
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs()?;

        let registry = register_default_interceptors(Default::default(), &mut media_engine)?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let ice_servers = ice_servers
            .iter()
            .map(|url| RTCIceServer {
                urls: vec![url.clone()],
                ..Default::default()
            })
            .collect();

        Ok(Self { api, ice_servers })
    }
}

#[async_trait]
impl PeerConnectionFactory for WebRTCPeerFactory {
    async fn create(
        &self,
        local: Option<&LocalStream>,
        events: PeerEventSink,
    ) -> Result<Arc<dyn PeerTransport>, CreationError> {
        let participant_id = events.participant_id().to_string();
        let config = RTCConfiguration {
            ice_servers: self.ice_servers.clone(),
            ..Default::default()
        };
        let peer_connection = Arc::new(self.api.new_peer_connection(config).await?);

        if let Some(stream) = local {
            let attached = attach_local_tracks(&peer_connection, stream).await;
            close_on_error(&peer_connection, attached).await?;
        }

        let sink = events.clone();
        peer_connection.on_track(Box::new(
            move |track: Arc<TrackRemote>, _: Arc<RTCRtpReceiver>, _: Arc<RTCRtpTransceiver>| {
                let sink = sink.clone();
                Box::pin(async move {
                    let kind = match track.kind() {
                        RTPCodecType::Video => MediaKind::Video,
                        _ => MediaKind::Audio,
                    };
                    sink.remote_track(RemoteTrack {
                        track_id: track.id(),
                        stream_id: track.stream_id(),
                        kind,
                    });
                })
            },
        ));

        let sink = events.clone();
        peer_connection.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let sink = sink.clone();
            Box::pin(async move {
                let Some(candidate) = candidate else {
                    return;
                };
                match candidate.to_json() {
                    Ok(init) => {
                        sink.local_candidate(IceCandidate {
                            candidate: init.candidate,
                            sdp_mid: init.sdp_mid,
                            sdp_mline_index: init.sdp_mline_index,
                            username_fragment: init.username_fragment,
                        });
                    }
                    Err(e) => warn!("Failed to serialize local ICE candidate: {}", e),
                }
            })
        }));

        let sink = events;
        peer_connection.on_peer_connection_state_change(Box::new(
            move |s: RTCPeerConnectionState| {
                let sink = sink.clone();
                Box::pin(async move {
                    debug!(participant = sink.participant_id(), "Peer Connection State has changed: {}", s);
                    sink.state_changed(PeerState::from(s));
                })
            },
        ));

        info!(participant = %participant_id, "Peer connection created");
        Ok(Arc::new(WebRTCPeer { peer_connection }))
    }
}

async fn attach_local_tracks(
    peer_connection: &RTCPeerConnection,
    stream: &LocalStream,
) -> Result<(), CreationError> {
    for track in stream.tracks() {
        let rtp: Arc<dyn TrackLocal + Send + Sync> = track.rtp_track();
        let sender = peer_connection.add_track(rtp).await?;
        // Drain RTCP so interceptors keep running
        tokio::spawn(async move {
            let mut buf = vec![0u8; 1500];
            while sender.read(&mut buf).await.is_ok() {}
        });
    }
    Ok(())
}

/// A connection that failed half-way through setup is closed before the error is returned.
async fn close_on_error<T>(
    peer_connection: &RTCPeerConnection,
    result: Result<T, CreationError>,
) -> Result<T, CreationError> {
    if result.is_err() {
        if let Err(e) = peer_connection.close().await {
            warn!("Failed to close half-built peer connection: {}", e);
        }
    }
    result
}

pub struct WebRTCPeer {
    peer_connection: Arc<RTCPeerConnection>,
}

fn to_description(desc: RTCSessionDescription) -> Result<SessionDescription, NegotiationError> {
    let sdp_type = match desc.sdp_type {
        RTCSdpType::Offer => SdpType::Offer,
        RTCSdpType::Answer => SdpType::Answer,
        RTCSdpType::Pranswer => SdpType::Pranswer,
        RTCSdpType::Rollback => SdpType::Rollback,
        other => {
            return Err(NegotiationError::InvalidDescription(format!(
                "unexpected sdp type {}",
                other
            )))
        }
    };
    Ok(SessionDescription {
        sdp_type,
        sdp: desc.sdp,
    })
}

fn from_description(desc: SessionDescription) -> Result<RTCSessionDescription, NegotiationError> {
    let parsed = match desc.sdp_type {
        SdpType::Offer => RTCSessionDescription::offer(desc.sdp)?,
        SdpType::Answer => RTCSessionDescription::answer(desc.sdp)?,
        SdpType::Pranswer => RTCSessionDescription::pranswer(desc.sdp)?,
        SdpType::Rollback => {
            return Err(NegotiationError::InvalidDescription(
                "rollback is not supported".to_string(),
            ))
        }
    };
    Ok(parsed)
}

#[async_trait]
impl PeerTransport for WebRTCPeer {
    fn signaling_stage(&self) -> SignalingStage {
        self.peer_connection.signaling_state().into()
    }

    async fn has_remote_description(&self) -> bool {
        self.peer_connection.remote_description().await.is_some()
    }

    async fn create_offer(&self) -> Result<SessionDescription, NegotiationError> {
        let offer = self.peer_connection.create_offer(None).await?;
        to_description(offer)
    }

    async fn create_answer(&self) -> Result<SessionDescription, NegotiationError> {
        let answer = self.peer_connection.create_answer(None).await?;
        to_description(answer)
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), NegotiationError> {
        let desc = from_description(desc)?;
        self.peer_connection.set_local_description(desc).await?;
        Ok(())
    }

    async fn set_remote_description(
        &self,
        desc: SessionDescription,
    ) -> Result<(), NegotiationError> {
        let desc = from_description(desc)?;
        self.peer_connection.set_remote_description(desc).await?;
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), NegotiationError> {
        self.peer_connection
            .add_ice_candidate(RTCIceCandidateInit {
                candidate: candidate.candidate,
                sdp_mid: candidate.sdp_mid,
                sdp_mline_index: candidate.sdp_mline_index,
                username_fragment: candidate.username_fragment,
            })
            .await?;
        Ok(())
    }

    async fn close(&self) -> Result<(), NegotiationError> {
        self.peer_connection.close().await?;
        Ok(())
    }
}
