//! Persisted run state (`daemon.state`).
//!
//! Written only by the running daemon, read by status queries. Saves go
//! through a temp file plus rename so a reader never sees a half-written
//! snapshot.

use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{DaemonError, Result};
use crate::paths::Paths;

/// Progress snapshot of a running daemon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunState {
    pub process_id: i32,
    pub started_at: DateTime<Utc>,
    pub next_trigger: DateTime<Utc>,
    /// Successful work units since start.
    pub completed_count: u64,
    pub last_completed_at: Option<DateTime<Utc>>,
    pub last_variant: Option<String>,
}

impl RunState {
    pub fn new(process_id: i32, started_at: DateTime<Utc>, next_trigger: DateTime<Utc>) -> Self {
        Self {
            process_id,
            started_at,
            next_trigger,
            completed_count: 0,
            last_completed_at: None,
            last_variant: None,
        }
    }

    /// Record a successful work unit.
    pub fn record_completion(&mut self, at: DateTime<Utc>, variant: &str) {
        self.completed_count += 1;
        self.last_completed_at = Some(at);
        self.last_variant = Some(variant.to_string());
    }
}

/// Load/save/remove for the state file.
#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn from_paths(paths: &Paths) -> Self {
        Self::new(paths.state())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write `state` atomically: write a sibling `.tmp`, then rename.
    pub fn save(&self, state: &RunState) -> Result<()> {
        let json = serde_json::to_string_pretty(state).map_err(|e| {
            DaemonError::io("failed to serialize run state", std::io::Error::other(e))
        })?;

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DaemonError::io(format!("failed to create {}", parent.display()), e)
            })?;
        }

        let tmp_path = self.path.with_extension("state.tmp");
        let result = write_then_rename(&tmp_path, &self.path, json.as_bytes());
        if result.is_err() {
            let _ = std::fs::remove_file(&tmp_path);
        }
        result.map_err(|e| DaemonError::io(format!("failed to write {}", self.path.display()), e))
    }

    /// Read the snapshot. A missing file is `Ok(None)`; an unparseable one
    /// is [`DaemonError::CorruptState`].
    pub fn load(&self) -> Result<Option<RunState>> {
        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(DaemonError::io(
                    format!("failed to read {}", self.path.display()),
                    e,
                ))
            }
        };

        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|source| DaemonError::CorruptState {
                path: self.path.clone(),
                source,
            })
    }

    /// Delete the file. Absence is not an error.
    pub fn remove(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(DaemonError::io(
                format!("failed to remove {}", self.path.display()),
                e,
            )),
        }
    }
}

fn write_then_rename(tmp_path: &Path, path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut opts = OpenOptions::new();
    opts.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt as _;
        opts.mode(0o644);
    }
    {
        let mut file = opts.open(tmp_path)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    std::fs::rename(tmp_path, path)
}
