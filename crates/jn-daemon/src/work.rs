//! The work unit the daemon triggers.
//!
//! The daemon only needs something that, given a variant name and the
//! shutdown signal, succeeds with an identifier or fails. What a unit does
//! is up to the implementation.

use std::process::Stdio;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, info};

use crate::shutdown::ShutdownSignal;

/// Environment variable carrying the selected variant to a command.
pub const VARIANT_ENV: &str = "JERNEL_VARIANT";

/// Result of a successful work unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkOutcome {
    /// Identifier of whatever the unit produced.
    pub id: String,
}

impl WorkOutcome {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum WorkUnitError {
    #[error("work unit failed: {0}")]
    Failed(String),
    #[error("work unit cancelled")]
    Cancelled,
    #[error("work unit io: {0}")]
    Io(#[from] std::io::Error),
}

/// One unit of work, invoked once per trigger.
///
/// Implementations should return [`WorkUnitError::Cancelled`] promptly once
/// `shutdown` fires; the daemon waits for `run` to return before exiting.
#[async_trait]
pub trait WorkUnit: Send + Sync {
    async fn run(
        &self,
        variant: &str,
        shutdown: &ShutdownSignal,
    ) -> Result<WorkOutcome, WorkUnitError>;
}

// ---------------------------------------------------------------------------
// CommandWorkUnit
// ---------------------------------------------------------------------------

/// Runs an external program per work unit.
///
/// The variant is exported as `JERNEL_VARIANT`. Exit status 0 is success and
/// the first non-empty stdout line becomes the identifier.
#[derive(Debug, Clone)]
pub struct CommandWorkUnit {
    program: String,
    args: Vec<String>,
}

impl CommandWorkUnit {
    /// Build from an argv list. Returns `None` for an empty list.
    pub fn from_argv(argv: &[String]) -> Option<Self> {
        let (program, args) = argv.split_first()?;
        Some(Self {
            program: program.clone(),
            args: args.to_vec(),
        })
    }

    pub fn program(&self) -> &str {
        &self.program
    }
}

#[async_trait]
impl WorkUnit for CommandWorkUnit {
    async fn run(
        &self,
        variant: &str,
        shutdown: &ShutdownSignal,
    ) -> Result<WorkOutcome, WorkUnitError> {
        debug!(program = %self.program, %variant, "spawning work unit command");
        let child = tokio::process::Command::new(&self.program)
            .args(&self.args)
            .env(VARIANT_ENV, variant)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        // Dropping `child` on cancellation kills it.
        let output = tokio::select! {
            biased;
            _ = shutdown.cancelled() => return Err(WorkUnitError::Cancelled),
            output = child.wait_with_output() => output?,
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(WorkUnitError::Failed(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let id = stdout
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .unwrap_or("exit 0")
            .to_string();
        Ok(WorkOutcome { id })
    }
}

// ---------------------------------------------------------------------------
// LogWorkUnit
// ---------------------------------------------------------------------------

/// Records each trigger in the log. Used when no command is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogWorkUnit;

#[async_trait]
impl WorkUnit for LogWorkUnit {
    async fn run(
        &self,
        variant: &str,
        _shutdown: &ShutdownSignal,
    ) -> Result<WorkOutcome, WorkUnitError> {
        let id = Utc::now().to_rfc3339();
        info!(%variant, %id, "work unit triggered (no command configured)");
        Ok(WorkOutcome { id })
    }
}
