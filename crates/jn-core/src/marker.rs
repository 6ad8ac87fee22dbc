//! Single-instance marker (`daemon.pid`).
//!
//! The marker holds the pid of the process that claims the schedule. Its
//! presence is the only signal that an instance is running; whether that
//! instance is actually alive is decided by probing the pid with signal 0.
//!
//! ## Stale marker recovery
//!
//! `probe()` removes a marker whose process is gone (crash, SIGKILL) or whose
//! content is not a valid pid, so callers never observe a marker for a dead
//! process.
//!
//! ## Race safety
//!
//! `claim()` creates the file with `O_CREAT | O_EXCL`. If two daemons race
//! past their probes, exactly one wins the create and the other gets
//! `AlreadyRunning`.

use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::error::{DaemonError, Result};
use crate::paths::Paths;

/// Outcome of [`InstanceMarker::probe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstanceStatus {
    pub running: bool,
    /// Recorded pid, `0` when not running.
    pub pid: i32,
}

impl InstanceStatus {
    pub const NOT_RUNNING: Self = Self {
        running: false,
        pid: 0,
    };

    pub fn running(pid: i32) -> Self {
        Self { running: true, pid }
    }
}

/// Handle on the marker file. Cheap to clone; holds only the path.
#[derive(Debug, Clone)]
pub struct InstanceMarker {
    path: PathBuf,
}

impl InstanceMarker {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn from_paths(paths: &Paths) -> Self {
        Self::new(paths.marker())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Record the current process as the owner of the schedule.
    ///
    /// A marker left by a dead process (or holding garbage) is replaced.
    /// Returns the pid written.
    pub fn claim(&self) -> Result<i32> {
        let pid = current_pid();
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DaemonError::io(format!("failed to create {}", parent.display()), e)
            })?;
        }

        match self.create_exclusive(pid) {
            Ok(()) => return Ok(pid),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {}
            Err(e) => return Err(self.claim_error(e)),
        }

        let holder = self.probe()?;
        if holder.running {
            return Err(DaemonError::AlreadyRunning { pid: holder.pid });
        }

        // probe() removed the stale marker; a racing claimant may still win.
        match self.create_exclusive(pid) {
            Ok(()) => Ok(pid),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Err(DaemonError::AlreadyRunning {
                pid: self.read_pid()?.unwrap_or(0),
            }),
            Err(e) => Err(self.claim_error(e)),
        }
    }

    /// `O_CREAT | O_EXCL` the marker and write `pid` into it.
    fn create_exclusive(&self, pid: i32) -> std::io::Result<()> {
        let mut opts = OpenOptions::new();
        opts.write(true).create_new(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt as _;
            opts.mode(0o644);
        }

        let mut file = opts.open(&self.path)?;
        file.write_all(pid.to_string().as_bytes())
            .and_then(|()| file.sync_all())
            .inspect_err(|_| {
                let _ = std::fs::remove_file(&self.path);
            })
    }

    fn claim_error(&self, source: std::io::Error) -> DaemonError {
        DaemonError::io(format!("failed to claim {}", self.path.display()), source)
    }

    /// Report whether the recorded process is alive, removing stale markers.
    pub fn probe(&self) -> Result<InstanceStatus> {
        let Some(raw) = self.read_raw()? else {
            return Ok(InstanceStatus::NOT_RUNNING);
        };

        let Some(pid) = parse_pid(&raw) else {
            warn!(path = %self.path.display(), content = %raw.trim(), "removing unreadable daemon marker");
            self.release()?;
            return Ok(InstanceStatus::NOT_RUNNING);
        };

        if pid_alive(pid) {
            Ok(InstanceStatus::running(pid))
        } else {
            info!(pid, "removing stale daemon marker (process not running)");
            self.release()?;
            Ok(InstanceStatus::NOT_RUNNING)
        }
    }

    /// Ask the recorded process to shut down with SIGTERM.
    ///
    /// Does not wait for the process to exit; poll [`probe`](Self::probe).
    pub fn request_stop(&self) -> Result<i32> {
        let pid = self
            .read_raw()?
            .as_deref()
            .and_then(parse_pid)
            .ok_or(DaemonError::NotRunning)?;

        match send_terminate(pid) {
            Ok(()) => {
                info!(pid, "sent SIGTERM to daemon");
                Ok(pid)
            }
            Err(e) if e.raw_os_error() == Some(libc::ESRCH) => {
                info!(pid, "removing stale daemon marker (process not running)");
                self.release()?;
                Err(DaemonError::NotRunning)
            }
            Err(source) => Err(DaemonError::Signal { pid, source }),
        }
    }

    /// Remove the marker. Absence is not an error.
    pub fn release(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(DaemonError::io(
                format!("failed to remove {}", self.path.display()),
                e,
            )),
        }
    }

    /// The recorded pid, if the marker exists and holds a valid one.
    pub fn read_pid(&self) -> Result<Option<i32>> {
        Ok(self.read_raw()?.as_deref().and_then(parse_pid))
    }

    fn read_raw(&self) -> Result<Option<String>> {
        match std::fs::read_to_string(&self.path) {
            Ok(raw) => Ok(Some(raw)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(DaemonError::io(
                format!("failed to read {}", self.path.display()),
                e,
            )),
        }
    }
}

/// Only positive pids are accepted: `kill(0, ..)` and `kill(-1, ..)` address
/// process groups, not a single process.
fn parse_pid(raw: &str) -> Option<i32> {
    raw.trim().parse::<i32>().ok().filter(|pid| *pid > 0)
}

fn current_pid() -> i32 {
    i32::try_from(std::process::id()).unwrap_or(i32::MAX)
}

/// Check if a process with the given pid is alive.
///
/// `EPERM` means the process exists but belongs to another user.
#[cfg(unix)]
fn pid_alive(pid: i32) -> bool {
    // SAFETY: kill with signal 0 checks existence without sending a signal.
    if unsafe { libc::kill(pid, 0) } == 0 {
        return true;
    }
    std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

#[cfg(not(unix))]
fn pid_alive(_pid: i32) -> bool {
    // No portable probe; assume alive rather than delete a live marker.
    true
}

#[cfg(unix)]
fn send_terminate(pid: i32) -> std::io::Result<()> {
    // SAFETY: plain kill(2) on a positive pid.
    if unsafe { libc::kill(pid, libc::SIGTERM) } == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}

#[cfg(not(unix))]
fn send_terminate(_pid: i32) -> std::io::Result<()> {
    Err(std::io::Error::new(
        ErrorKind::Unsupported,
        "remote stop is only supported on unix",
    ))
}
