use std::path::PathBuf;

/// Failures surfaced by the acquisition engine.
///
/// A console transaction that never sees a prompt is not an error: the
/// partial reply comes back and [`crate::protocol::RawReply::is_complete`]
/// tells the caller. Undecodable lines are skipped inside the decoders.
#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    #[error("console I/O error: {0}")]
    Channel(#[from] std::io::Error),

    #[error("serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("module {0} is not present in the power summary")]
    ModuleNotFound(u8),

    #[error("history storage unavailable at {}: {source}", .path.display())]
    PersistenceUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("history file is corrupt: {0}")]
    CorruptHistory(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl MonitorError {
    pub(crate) fn storage(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        MonitorError::PersistenceUnavailable {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T, E = MonitorError> = std::result::Result<T, E>;
