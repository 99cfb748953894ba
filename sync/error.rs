use flexi_logger::FlexiLoggerError;
use glib::BoolError;
use std::io;
use thiserror::Error;
use tokio::sync::mpsc::error::SendError;
use tokio::task::JoinError;
use zbus::Error as ZbusError;

#[derive(Error, Debug, Clone)]
pub enum SyncError {
    #[error("I/O error: {0}")]
    Io(String),

    #[error("Message encoding error: {0}")]
    Codec(String),

    #[error("TOML parsing error: {0}")]
    TomlParsing(String),

    #[error("Invalid command payload: {0}")]
    InvalidPayload(String),

    #[error("Logger initialization error: {0}")]
    Logger(String),

    #[error("Channel send error: {0}")]
    Send(String),

    #[error("Join task error: {0}")]
    JoinTask(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("ZBus error: {0}")]
    ZBus(String),

    #[error("GLib error: {0}")]
    Init(String),

    #[error("GStreamer element error: {0}")]
    Element(String),

    #[error("GStreamer state error: {0}")]
    State(String),

    #[error("Playback engine error: {0}")]
    Engine(String),

    #[error("Role mismatch: {0}")]
    RoleMismatch(String),

    #[error("Another player is already publishing on this bus")]
    PlayerAlreadyActive,

    #[error("Session has been shut down")]
    SessionClosed,
}

impl From<io::Error> for SyncError {
    fn from(error: io::Error) -> Self {
        SyncError::Io(error.to_string())
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(error: serde_json::Error) -> Self {
        SyncError::Codec(error.to_string())
    }
}

impl From<toml::de::Error> for SyncError {
    fn from(error: toml::de::Error) -> Self {
        SyncError::TomlParsing(error.to_string())
    }
}

impl From<FlexiLoggerError> for SyncError {
    fn from(error: FlexiLoggerError) -> Self {
        SyncError::Logger(error.to_string())
    }
}

impl<T> From<SendError<T>> for SyncError {
    fn from(error: SendError<T>) -> Self {
        SyncError::Send(error.to_string())
    }
}

impl From<JoinError> for SyncError {
    fn from(error: JoinError) -> Self {
        SyncError::JoinTask(error.to_string())
    }
}

impl From<ZbusError> for SyncError {
    fn from(error: ZbusError) -> Self {
        SyncError::ZBus(error.to_string())
    }
}

impl From<zbus::fdo::Error> for SyncError {
    fn from(error: zbus::fdo::Error) -> Self {
        SyncError::ZBus(error.to_string())
    }
}

impl From<glib::Error> for SyncError {
    fn from(error: glib::Error) -> Self {
        SyncError::Init(error.to_string())
    }
}

impl From<BoolError> for SyncError {
    fn from(error: BoolError) -> Self {
        SyncError::Element(error.to_string())
    }
}
