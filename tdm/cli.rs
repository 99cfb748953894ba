use clap::{Parser, Subcommand, ValueEnum};
use flexi_logger::Logger;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tandem::{
    ConnectionStatus, ControllerSession, DbusTransport, Directive, PlaybackSnapshot, ReadModel,
    Role, SyncConfig, SyncError, Transport,
};
use tokio::process::Command;
use tokio::time::{self, Instant};

type StdResult<T> = std::result::Result<T, SyncError>;

#[derive(Parser)]
#[command(
    name = "tdm",
    about = "Control the tandem player.",
    version = "1.0.0"
)]
struct Cli {
    #[arg(
        long = "timeout-ms",
        default_value_t = 1500,
        help = "How long to wait for the player to answer"
    )]
    timeout_ms: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Resume playback")]
    Play,

    #[command(about = "Pause playback")]
    Pause,

    #[command(about = "Toggle between playing and paused")]
    Toggle,

    #[command(about = "Play the next track")]
    Next,

    #[command(about = "Play the previous track")]
    Prev,

    #[command(about = "Jump to a position in the current track")]
    Seek {
        #[arg(help = "Position in seconds")]
        seconds: f64,
    },

    #[command(about = "Set the volume")]
    Volume {
        #[arg(help = "Volume between 0.0 and 1.0")]
        level: f64,
    },

    #[command(about = "Repeat the current track")]
    Loop {
        #[arg(value_enum)]
        switch: Switch,
    },

    #[command(about = "Pick the next track at random")]
    Shuffle {
        #[arg(value_enum)]
        switch: Switch,
    },

    #[command(about = "Move a track to another position in the playlist")]
    Reorder { from: usize, to: usize },

    #[command(about = "Play a track from the playlist by id")]
    PlaySong { id: String },

    #[command(about = "Measure the round trip to the player")]
    Ping,

    #[command(about = "Show what the player is doing")]
    Status,

    #[command(about = "Print every state update until interrupted")]
    Watch,

    #[command(about = "Start the tandem player")]
    Start,
}

#[derive(Clone, Copy, ValueEnum)]
enum Switch {
    On,
    Off,
}

impl Switch {
    fn enabled(self) -> bool {
        matches!(self, Switch::On)
    }
}

impl Commands {
    fn directive(&self) -> Option<Directive> {
        let directive = match self {
            Commands::Play => Directive::Play,
            Commands::Pause => Directive::Pause,
            Commands::Toggle => Directive::TogglePlay,
            Commands::Next => Directive::Next,
            Commands::Prev => Directive::Prev,
            Commands::Seek { seconds } => Directive::Seek(*seconds),
            Commands::Volume { level } => Directive::SetVolume(*level),
            Commands::Loop { switch } => Directive::SetLoop(switch.enabled()),
            Commands::Shuffle { switch } => Directive::SetShuffle(switch.enabled()),
            Commands::Reorder { from, to } => Directive::Reorder {
                from: *from,
                to: *to,
            },
            Commands::PlaySong { id } => Directive::PlaySong(id.clone()),
            Commands::Ping | Commands::Status | Commands::Watch | Commands::Start => return None,
        };
        Some(directive)
    }
}

#[tokio::main]
async fn main() -> StdResult<()> {
    let cli = Cli::parse();
    let _logger = Logger::try_with_str("warn")?.log_to_stderr().start()?;

    let home_dir = std::env::var("HOME")
        .map_err(|e| SyncError::Io(format!("Failed to get HOME environment variable: {e}")))?;
    let config_path = format!("{home_dir}/.config/tandem/config.toml");
    let config = SyncConfig::load(Path::new(&config_path))
        .await?
        .with_role(Role::Controller);

    let transport = Arc::new(DbusTransport::connect().await?);
    let session = ControllerSession::start(&config, Arc::clone(&transport) as Arc<dyn Transport>)?;
    let result = handle_command(&cli, &session).await;

    session.shutdown().await?;
    transport.flush().await?;
    result
}

async fn handle_command(cli: &Cli, session: &ControllerSession) -> StdResult<()> {
    let timeout = Duration::from_millis(cli.timeout_ms);
    match &cli.command {
        Commands::Start => start_tandem(session, timeout).await,
        Commands::Watch => watch_state(session, timeout).await,
        Commands::Status => show_status(session, timeout).await,
        Commands::Ping => ping_player(session, timeout).await,
        command => {
            let Some(directive) = command.directive() else {
                return Ok(());
            };
            if !is_tandem_running(session, timeout).await {
                eprintln!("tandem is not running");
                return Ok(());
            }
            session.send(directive.clone())?;
            println!("Sent {:?}", directive.kind());
            Ok(())
        }
    }
}

async fn is_tandem_running(session: &ControllerSession, timeout: Duration) -> bool {
    session.wait_initialized(timeout).await.is_some()
}

async fn ping_player(session: &ControllerSession, timeout: Duration) -> StdResult<()> {
    let mut status = session.status();
    let sent_at = Instant::now();
    session.ping()?;
    let connected = time::timeout(
        timeout,
        status.wait_for(|status| *status == ConnectionStatus::Connected),
    )
    .await;
    match connected {
        Ok(Ok(_)) => println!("pong in {} ms", sent_at.elapsed().as_millis()),
        _ => eprintln!("no pong within {} ms", timeout.as_millis()),
    }
    Ok(())
}

async fn show_status(session: &ControllerSession, timeout: Duration) -> StdResult<()> {
    match session.wait_initialized(timeout).await {
        Some(ReadModel::Ready(snapshot)) => {
            print_snapshot(&snapshot);
            println!("connection: {:?}", *session.status().borrow());
        }
        _ => eprintln!("tandem is not running"),
    }
    Ok(())
}

async fn watch_state(session: &ControllerSession, timeout: Duration) -> StdResult<()> {
    if !is_tandem_running(session, timeout).await {
        eprintln!("tandem is not running");
        return Ok(());
    }
    let mut state = session.state();
    loop {
        if let Some(snapshot) = state.borrow_and_update().snapshot() {
            print_snapshot(snapshot);
        }
        tokio::select! {
            result = tokio::signal::ctrl_c() => return Ok(result?),
            changed = state.changed() => {
                if changed.is_err() {
                    return Err(SyncError::SessionClosed);
                }
            }
        }
    }
}

fn print_snapshot(snapshot: &PlaybackSnapshot) {
    let audio = &snapshot.state.audio_state;
    let title = snapshot
        .state
        .current_song_ref
        .as_ref()
        .map_or_else(|| "-".to_string(), |song| format!("{} - {}", song.title, song.artist));
    let flags = [
        (audio.is_looping, "loop"),
        (audio.is_shuffle, "shuffle"),
    ]
    .iter()
    .filter(|(on, _)| *on)
    .map(|(_, name)| *name)
    .collect::<Vec<_>>()
    .join(",");
    println!(
        "{} {} [{:.1}/{:.1}s] vol {:.0}% {} ({} tracks)",
        if audio.is_playing { "playing" } else { "paused" },
        title,
        audio.current_time,
        audio.duration,
        audio.volume * 100.0,
        flags,
        snapshot.state.playlist.len()
    );
}

async fn start_tandem(session: &ControllerSession, timeout: Duration) -> StdResult<()> {
    if is_tandem_running(session, timeout).await {
        println!("tandem is already running");
        return Ok(());
    }

    let current_exe_path = std::env::current_exe()?;
    let exe_dir = current_exe_path
        .parent()
        .ok_or_else(|| SyncError::Io("Failed to get the directory of the executable".to_string()))?;
    let tandem_path = exe_dir.join("tandem");

    if !tandem_path.exists() {
        return Err(SyncError::Io(
            "tandem executable not found in the same directory".to_string(),
        ));
    }

    let child = Command::new(tandem_path).spawn()?;
    println!("tandem started, process ID: {:?}", child.id());
    Ok(())
}
