//! clipcast-server - Main entry point
//!
//! Self-hosted audio-command server: shared clip tree, chain playback on
//! the host's audio output, SSE state broadcasting, and optional voice
//! triggers over a pluggable transcription backend.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use clipcast_common::events::EventBus;
use clipcast_server::config::Config;
use clipcast_server::library::NodeStore;
use clipcast_server::media::SymphoniaProbe;
use clipcast_server::orchestrator::Orchestrator;
use clipcast_server::playback::{
    AudioSink, PlaybackCoordinator, RodioSink, TimerSink, VolumeCoordinator,
};
use clipcast_server::speech::{listener, NullTranscriber};
use clipcast_server::{api, db};

/// Command-line arguments for clipcast-server
#[derive(Parser, Debug)]
#[command(name = "clipcast-server")]
#[command(about = "Self-hosted audio-command server")]
#[command(version)]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value = "5750", env = "CLIPCAST_PORT")]
    port: u16,

    /// Directory holding clip audio files
    #[arg(short, long, env = "CLIPCAST_MEDIA_DIR")]
    media_dir: PathBuf,

    /// SQLite database path (defaults to clipcast.db in the media dir)
    #[arg(long, env = "CLIPCAST_DB")]
    db_path: Option<PathBuf>,

    /// Enable the live voice-trigger listener
    #[arg(long, env = "CLIPCAST_VOICE")]
    voice: bool,

    /// Simulate audio output instead of opening a device
    #[arg(long, env = "CLIPCAST_NO_AUDIO")]
    no_audio: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "clipcast=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let config = Config {
        db_path: args
            .db_path
            .unwrap_or_else(|| args.media_dir.join("clipcast.db")),
        media_dir: args.media_dir,
        port: args.port,
        voice: args.voice,
        no_audio: args.no_audio,
    };

    info!("Starting clipcast server on port {}", config.port);
    info!("Media directory: {}", config.media_dir.display());

    tokio::fs::create_dir_all(&config.media_dir)
        .await
        .context("Failed to create media directory")?;

    // Database + node tree
    let pool = db::connect(&config.db_path)
        .await
        .context("Failed to open database")?;
    db::init::initialize_database(&pool)
        .await
        .context("Failed to initialize database")?;
    let store = NodeStore::open(pool.clone())
        .await
        .context("Failed to load node tree")?;

    // Audio output
    let sink: Arc<dyn AudioSink> = if config.no_audio {
        info!("Audio output disabled, simulating playback");
        Arc::new(TimerSink::new())
    } else {
        match RodioSink::open() {
            Ok(sink) => Arc::new(sink),
            Err(e) => {
                warn!("Audio device unavailable ({e}), simulating playback");
                Arc::new(TimerSink::new())
            }
        }
    };

    // Event bus + playback stack
    let bus = EventBus::new(1000);
    let volume = VolumeCoordinator::load(pool.clone(), Arc::clone(&sink), bus.clone())
        .await
        .context("Failed to load volume settings")?;
    let playback = PlaybackCoordinator::new(Arc::clone(&sink), Arc::clone(&volume), bus.clone());

    // Orchestrator facade; the transcription backend is pluggable and
    // absent by default.
    let orchestrator = Orchestrator::new(
        store,
        playback,
        volume,
        Arc::new(NullTranscriber),
        Arc::new(SymphoniaProbe),
        bus,
        config.media_dir.clone(),
        pool,
    );

    if config.voice {
        let _listener = listener::spawn(Arc::clone(&orchestrator));
        info!("Voice trigger listener enabled");
    }

    api::run(&config, orchestrator)
        .await
        .context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}
