use std::fmt;
use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, Local, Utc};
use jn_core::{Config, DaemonError, InstanceMarker, InstanceStatus, Paths, RunState, StateStore};
use jn_daemon::{CommandWorkUnit, Daemon, DaemonOptions, LogWorkUnit};

const STOP_TIMEOUT: Duration = Duration::from_secs(3);
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Flag values that replace config.toml settings for one run.
#[derive(Debug, Default)]
pub struct StartOverrides {
    pub rate: Option<i64>,
    pub rate_period: Option<String>,
    pub variants: Option<String>,
}

/// Run the daemon in the foreground until it is signalled to stop.
pub async fn start(config: &Config, overrides: StartOverrides, paths: &Paths) -> anyhow::Result<()> {
    let mut settings = config.daemon.clone();
    if let Some(rate) = overrides.rate {
        settings.rate = rate;
    }
    if let Some(period) = overrides.rate_period {
        settings.rate_period = period;
    }
    if let Some(variants) = overrides.variants {
        settings.variants = split_variants(&variants);
    }

    let rate = settings
        .rate_config()
        .context("invalid daemon configuration")?;
    let options = DaemonOptions {
        default_variant: config.default_variant.clone(),
        handle_signals: true,
    };
    let mut daemon = Daemon::new(paths, rate, options);

    match settings.command.as_deref().and_then(CommandWorkUnit::from_argv) {
        Some(unit) => {
            tracing::info!(program = %unit.program(), "work units run an external command");
            daemon.start(unit)?;
        }
        None => daemon.start(LogWorkUnit)?,
    }

    println!("Daemon running (pid {}). Press Ctrl+C to stop.", std::process::id());
    daemon.wait().await;
    Ok(())
}

/// Send SIGTERM to the running daemon and wait for it to exit.
pub async fn stop(paths: &Paths) -> anyhow::Result<()> {
    let marker = InstanceMarker::from_paths(paths);

    let status = marker.probe().context("failed to check daemon status")?;
    if !status.running {
        println!("Daemon is not running");
        return Ok(());
    }

    println!("Stopping daemon (pid {})...", status.pid);
    match marker.request_stop() {
        Ok(_) => {}
        Err(DaemonError::NotRunning) => {
            println!("Daemon stopped");
            return Ok(());
        }
        Err(e) => return Err(e).context("failed to stop daemon"),
    }

    if wait_for_exit(&marker, STOP_TIMEOUT, STOP_POLL_INTERVAL).await? {
        println!("Daemon stopped");
        Ok(())
    } else {
        anyhow::bail!("daemon did not stop within {}s", STOP_TIMEOUT.as_secs())
    }
}

/// Poll the marker until no live instance holds it. Returns `false` if
/// `timeout` elapses first.
async fn wait_for_exit(
    marker: &InstanceMarker,
    timeout: Duration,
    poll: Duration,
) -> jn_core::Result<bool> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if !marker.probe()?.running {
            return Ok(true);
        }
        if tokio::time::Instant::now() >= deadline {
            return Ok(false);
        }
        tokio::time::sleep(poll).await;
    }
}

/// Print configuration, liveness and the last persisted progress.
pub fn status(config: &Config, paths: &Paths) -> anyhow::Result<()> {
    let instance = InstanceMarker::from_paths(paths)
        .probe()
        .context("failed to check daemon status")?;
    let state = if instance.running {
        Some(StateStore::from_paths(paths).load())
    } else {
        None
    };

    let report = StatusReport {
        config,
        instance,
        state: state.as_ref(),
        now: Utc::now(),
    };
    print!("{report}");
    Ok(())
}

/// What `jernel daemon status` prints.
struct StatusReport<'a> {
    config: &'a Config,
    instance: InstanceStatus,
    /// `None` when no live instance exists, so the state file was not read.
    state: Option<&'a jn_core::Result<Option<RunState>>>,
    now: DateTime<Utc>,
}

impl fmt::Display for StatusReport<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let daemon = &self.config.daemon;
        writeln!(f, "Daemon Configuration:")?;
        writeln!(f, "  Rate:        {} per {}", daemon.rate, daemon.rate_period)?;
        if daemon.variants.is_empty() {
            writeln!(f, "  Variants:    [{}] (default)", self.config.default_variant)?;
        } else {
            writeln!(f, "  Variants:    [{}]", daemon.variants.join(", "))?;
        }
        writeln!(f)?;

        if !self.instance.running {
            return writeln!(f, "Status: NOT RUNNING");
        }

        writeln!(f, "Status: RUNNING (pid {})", self.instance.pid)?;
        match self.state {
            Some(Ok(Some(state))) => {
                let wait = jn_daemon::scheduler::remaining(state.next_trigger, self.now);
                writeln!(f, "  Started:     {}", fmt_time(state.started_at))?;
                writeln!(
                    f,
                    "  Next run:    {} (in {})",
                    fmt_time(state.next_trigger),
                    fmt_wait(wait)
                )?;
                writeln!(f, "  Completed:   {}", state.completed_count)?;
                if let Some(at) = state.last_completed_at {
                    let variant = state.last_variant.as_deref().unwrap_or("unknown");
                    writeln!(f, "  Last run:    {} (variant: {variant})", fmt_time(at))?;
                }
                Ok(())
            }
            Some(Ok(None)) | None => writeln!(f, "  (no state recorded yet)"),
            Some(Err(e)) => writeln!(f, "  (could not load state: {e})"),
        }
    }
}

fn split_variants(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .collect()
}

fn fmt_time(at: DateTime<Utc>) -> String {
    at.with_timezone(&Local).format("%a, %d %b %Y %H:%M:%S %Z").to_string()
}

fn fmt_wait(wait: Duration) -> String {
    let secs = wait.as_secs();
    let (hours, minutes) = (secs / 3600, (secs % 3600) / 60);
    if hours > 0 {
        format!("{hours}h {minutes}m")
    } else if minutes > 0 {
        format!("{minutes}m")
    } else {
        "under a minute".to_string()
    }
}
