use std::path::PathBuf;

/// Errors surfaced by the scheduler core.
#[derive(Debug, thiserror::Error)]
pub enum DaemonError {
    #[error("rate must be positive, got {0}")]
    InvalidRate(i64),

    #[error("invalid rate_period: {0:?} (must be hour, day, or week)")]
    InvalidPeriod(String),

    #[error("daemon already running with pid {pid}")]
    AlreadyRunning { pid: i32 },

    #[error("daemon is not running")]
    NotRunning,

    #[error("daemon instance was already started; create a new instance to run again")]
    AlreadyStarted,

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("state file {path} is corrupt: {source}")]
    CorruptState {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to signal pid {pid}: {source}")]
    Signal {
        pid: i32,
        #[source]
        source: std::io::Error,
    },
}

impl DaemonError {
    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, DaemonError>;
