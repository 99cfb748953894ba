mod player;

use crate::player::{Deck, Playlist};
use flexi_logger::{Cleanup, Criterion, Duplicate, FileSpec, Logger, Naming};
use log::{error, info};
use std::path::Path;
use std::sync::Arc;
use tandem::{
    DbusTransport, DriftCorrector, PlayerSession, Role, Settings, StateSink, SyncConfig, SyncError,
    Transport,
};
use tokio::fs;
use tokio::signal::unix::{signal, SignalKind};

#[tokio::main]
async fn main() -> Result<(), SyncError> {
    let home_dir = std::env::var("HOME")
        .map_err(|e| SyncError::Io(format!("Failed to get HOME environment variable: {e}")))?;

    let required_dirs = [
        format!("{home_dir}/.config/tandem/logs"),
        format!("{home_dir}/.config/tandem/playlists"),
    ];
    for dir in &required_dirs {
        fs::create_dir_all(dir).await?;
    }

    let playlist_path = format!("{home_dir}/.config/tandem/playlists/playlist.toml");
    if !Path::new(&playlist_path).exists() {
        fs::write(&playlist_path, "").await?;
    }

    let config_path = format!("{home_dir}/.config/tandem/config.toml");
    let config = SyncConfig::load(Path::new(&config_path))
        .await?
        .with_role(Role::Player);

    let _logger = Logger::try_with_str(&config.log_level)?
        .log_to_file(FileSpec::default().directory(&required_dirs[0]))
        .rotate(
            Criterion::Size(1_000_000),
            Naming::Timestamps,
            Cleanup::KeepLogFiles(3),
        )
        .duplicate_to_stderr(Duplicate::None)
        .start()?;

    gstreamer::init()?;

    let playlist = Playlist::load_from_file(Path::new(&playlist_path)).await?;
    let transport: Arc<dyn Transport> = Arc::new(DbusTransport::connect().await?);
    let (sink, updates) = StateSink::channel();
    let settings = Settings {
        accent_color: config.accent_color.clone(),
        ..Settings::default()
    };
    let deck = Deck::new(playlist, settings, sink)?;

    // No foreground notion here, so Hidden/Visible are never sent. A host with
    // one must feed them for the background pause and resync to apply.
    let corrector = deck.video().map(|video| {
        info!("Playlist has video, starting drift correction");
        DriftCorrector::new(video, config.drift.clone()).spawn()
    });
    if let Some((clock, _)) = &corrector {
        deck.attach_clock(clock.clone())?;
    }

    let session = PlayerSession::start(
        &config,
        Arc::clone(&transport),
        deck.clone(),
        deck.state()?,
        updates,
    )
    .await?;
    let poller = deck.spawn_position_poller();
    let end_of_stream = deck.spawn_end_of_stream_listener()?;
    deck.start()?;

    wait_for_stop_signal().await?;
    info!("Stopping player");

    poller.abort();
    end_of_stream.abort();
    let deck = session.shutdown().await?;
    deck.detach_clock()?;
    if let Some((clock, handle)) = corrector {
        drop(clock);
        if let Err(e) = handle.await {
            error!("Drift corrector ended abnormally: {}", e);
        }
    }
    deck.stop()?;
    Ok(())
}

async fn wait_for_stop_signal() -> Result<(), SyncError> {
    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result?,
        _ = terminate.recv() => {}
    }
    Ok(())
}
