//! Well-known on-disk locations.
//!
//! The instance marker and the run-state file live side by side in the
//! per-user data directory (`~/.local/share/jernel` on Linux). Set
//! `JERNEL_DATA_DIR` to relocate both.

use std::path::{Path, PathBuf};

/// Environment variable that overrides the data directory.
pub const DATA_DIR_ENV: &str = "JERNEL_DATA_DIR";

const APP_DIR: &str = "jernel";
const MARKER_FILE: &str = "daemon.pid";
const STATE_FILE: &str = "daemon.state";
const CONFIG_FILE: &str = "config.toml";

/// Root directory for the daemon's durable files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Paths {
    root: PathBuf,
}

impl Paths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolve the data directory from `JERNEL_DATA_DIR`, falling back to
    /// the platform data directory.
    pub fn from_env() -> Self {
        if let Some(dir) = std::env::var_os(DATA_DIR_ENV).filter(|v| !v.is_empty()) {
            return Self::new(dir);
        }
        let base = dirs::data_dir().unwrap_or_else(|| PathBuf::from("."));
        Self::new(base.join(APP_DIR))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `daemon.pid`, the instance marker.
    pub fn marker(&self) -> PathBuf {
        self.root.join(MARKER_FILE)
    }

    /// `daemon.state`, the JSON run-state snapshot.
    pub fn state(&self) -> PathBuf {
        self.root.join(STATE_FILE)
    }
}

/// `<config dir>/jernel/config.toml`.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
        .join(CONFIG_FILE)
}
