//! Playback synchronization between one Player and any number of Controllers.
//!
//! The Player owns the authoritative playback state and replicates it as full
//! snapshots over a best-effort bus; Controllers mirror it and send commands
//! back. Independently of role, a secondary video track can be held in step
//! with the audio clock by the drift corrector.

pub mod command;
pub mod config;
pub mod drift;
pub mod error;
pub mod liveness;
pub mod protocol;
pub mod publisher;
pub mod session;
pub mod subscriber;
pub mod transport;

pub use command::{CommandDispatcher, CommandSender, PlaybackControl};
pub use config::{DriftConfig, Role, SyncConfig};
pub use drift::{ClockEvent, DriftCorrector, SecondaryTrack, Zone};
pub use error::SyncError;
pub use liveness::{ConnectionStatus, LivenessMonitor};
pub use protocol::{
    AudioState, Command, CommandKind, Directive, Message, PlaybackSnapshot, PlaybackState, Settings,
    SongSummary,
};
pub use session::{ControllerSession, PlayerSession, StateSink, StateUpdates};
pub use subscriber::ReadModel;
pub use transport::{DbusTransport, LocalBus, Transport};
