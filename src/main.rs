use anyhow::Context;
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;
use webrtc_room::webrtc::WebRTCPeerFactory;
use webrtc_room::{Config, LogNotifier, RoomSession, StaticMediaSource};

/// Join a mesh video call and stay in it until Ctrl-C.
#[derive(Parser, Debug)]
#[command(name = "webrtc-room", version)]
struct Args {
    /// Relay base address, e.g. ws://127.0.0.1:8000
    #[arg(long, env = "WEBRTC_ROOM_SERVER", default_value = "ws://127.0.0.1:8000")]
    server: String,

    /// Room to join
    #[arg(long)]
    room: String,

    /// STUN/TURN server URL; repeat for several. Defaults to Google's public STUN.
    #[arg(long = "stun")]
    stun: Vec<String>,

    #[arg(long)]
    no_video: bool,

    #[arg(long)]
    no_audio: bool,

    #[arg(long, default_value_t = 10)]
    connect_timeout_secs: u64,
}

impl Args {
    fn into_config(self) -> (String, Config) {
        let mut config = Config {
            server_url: self.server,
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            audio: !self.no_audio,
            video: !self.no_video,
            ..Default::default()
        };
        if !self.stun.is_empty() {
            config.ice_servers = self.stun;
        }
        (self.room, config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let (room_id, config) = Args::parse().into_config();

    let factory = WebRTCPeerFactory::new(&config.ice_servers)
        .context("failed to initialise the WebRTC stack")?;
    let media = StaticMediaSource {
        audio: config.audio,
        video: config.video,
    };

    let mut session = RoomSession::start(
        &room_id,
        config,
        &media,
        Arc::new(factory),
        Arc::new(LogNotifier),
    )
    .await
    .with_context(|| format!("failed to join room {}", room_id))?;

    let mut status = session.status();
    tokio::spawn(async move {
        while status.changed().await.is_ok() {
            let current = status.borrow_and_update().clone();
            info!(
                state = %current.state,
                channel_open = current.channel_open,
                peers = current.peers,
                participants = current.participants,
                "Room status"
            );
        }
    });

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;
    if let Ok(participants) = session.participants().await {
        for (participant, stream) in participants {
            info!(
                participant = %participant.id,
                media_state = ?participant.media_state,
                tracks = stream.map_or(0, |s| s.tracks.len()),
                "Participant still in room"
            );
        }
    }
    info!(room = %session.room_id(), "Leaving room");
    session.end().await;
    Ok(())
}
