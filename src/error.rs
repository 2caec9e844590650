use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AttendanceError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Video source error: {0}")]
    VideoSource(#[from] VideoSourceError),

    #[error("Event bus error: {0}")]
    EventBus(#[from] EventBusError),

    #[error("System error: {message}")]
    System { message: String },

    #[error("Component error in {component}: {message}")]
    Component { component: String, message: String },
}

impl AttendanceError {
    pub fn system<S: Into<String>>(message: S) -> Self {
        Self::System {
            message: message.into(),
        }
    }

    pub fn component<S: Into<String>>(component: S, message: S) -> Self {
        Self::Component {
            component: component.into(),
            message: message.into(),
        }
    }
}

/// Failures opening, repairing or saving the ledger workbook
#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Ledger file not found: {}", path.display())]
    NotFound { path: PathBuf },

    #[error("Ledger {} could not be read: {details}", path.display())]
    Unreadable { path: PathBuf, details: String },

    #[error("Ledger {} is corrupt and could not be repaired: {details}", path.display())]
    RepairFailed { path: PathBuf, details: String },

    #[error("Ledger has no active sheet")]
    NoActiveSheet,

    #[error("Failed to save ledger {}: {details}", path.display())]
    Write { path: PathBuf, details: String },
}

#[derive(Error, Debug)]
pub enum VideoSourceError {
    #[error("Failed to open video source {source_name}: {details}")]
    Open { source_name: String, details: String },

    #[error("Video source {source_name} did not produce a first frame: {details}")]
    NoFirstFrame { source_name: String, details: String },

    #[error("Frame read failed: {details}")]
    Read { details: String },

    #[error("Video stream failed after {consecutive_failures} consecutive read failures: {last_error}")]
    StreamFailed {
        consecutive_failures: u32,
        last_error: String,
    },

    #[error("Video source '{source_name}' is not supported in this build")]
    Unsupported { source_name: String },

    #[error("Frame acquisition is already running")]
    AlreadyRunning,
}

#[derive(Error, Debug)]
pub enum EventBusError {
    #[error("Failed to publish event: {details}")]
    PublishFailed { details: String },

    #[error("Event channel closed")]
    ChannelClosed,
}

/// Per-frame decode noise. Never propagated past the scanner.
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Frame conversion failed: {details}")]
    Conversion { details: String },

    #[error("Frame {frame_id} has inconsistent size ({actual} bytes for {width}x{height})")]
    BadDimensions {
        frame_id: u64,
        width: u32,
        height: u32,
        actual: usize,
    },
}

pub type Result<T> = std::result::Result<T, AttendanceError>;
