use std::sync::Arc;

use chrono::Utc;
use jn_core::{DaemonError, InstanceMarker, Paths, RateConfig, Result, RunState, StateStore};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::scheduler;
use crate::shutdown::{ShutdownReason, ShutdownSignal};
use crate::work::WorkUnit;

/// Lifecycle of a [`Daemon`] value.
///
/// `Idle -> Starting -> Running -> Stopping -> Stopped`. A failed start
/// returns to `Idle`; `Stopped` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Starting,
    Running,
    Stopping,
    Stopped,
}

/// Knobs that are not part of the rate itself.
#[derive(Debug, Clone)]
pub struct DaemonOptions {
    /// Variant handed to the work unit when the rate config has none.
    pub default_variant: String,
    /// Route SIGINT/SIGTERM into the daemon's shutdown.
    pub handle_signals: bool,
}

impl Default for DaemonOptions {
    fn default() -> Self {
        Self {
            default_variant: "default".to_string(),
            handle_signals: false,
        }
    }
}

/// The background scheduler.
///
/// Owns one Tokio task that sleeps until the next trigger, runs the work
/// unit, records the outcome in the state file and reschedules. The caller
/// keeps the `Daemon` to [`stop`](Self::stop) and [`wait`](Self::wait) on it.
pub struct Daemon {
    marker: InstanceMarker,
    store: StateStore,
    rate: RateConfig,
    options: DaemonOptions,
    shutdown: ShutdownSignal,
    phase: Arc<watch::Sender<Phase>>,
    task: Option<JoinHandle<()>>,
    signal_task: Option<JoinHandle<()>>,
}

impl Daemon {
    pub fn new(paths: &Paths, rate: RateConfig, options: DaemonOptions) -> Self {
        let (phase, _) = watch::channel(Phase::Idle);
        Self {
            marker: InstanceMarker::from_paths(paths),
            store: StateStore::from_paths(paths),
            rate,
            options,
            shutdown: ShutdownSignal::new(),
            phase: Arc::new(phase),
            task: None,
            signal_task: None,
        }
    }

    pub fn phase(&self) -> Phase {
        *self.phase.borrow()
    }

    /// Returns a handle that can be used to trigger shutdown from another task.
    pub fn shutdown_handle(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }

    /// Claim the schedule and launch the background loop.
    ///
    /// Returns as soon as the loop is spawned. Fails with `AlreadyRunning`
    /// if a live instance holds the marker, leaving this value `Idle`. Must
    /// be called inside a Tokio runtime.
    pub fn start<W>(&mut self, work: W) -> Result<()>
    where
        W: WorkUnit + 'static,
    {
        if self.phase() != Phase::Idle {
            return Err(DaemonError::AlreadyStarted);
        }

        self.phase.send_replace(Phase::Starting);
        if let Err(e) = self.launch(Box::new(work)) {
            self.phase.send_replace(Phase::Idle);
            return Err(e);
        }
        Ok(())
    }

    fn launch(&mut self, work: Box<dyn WorkUnit>) -> Result<()> {
        let status = self.marker.probe()?;
        if status.running {
            return Err(DaemonError::AlreadyRunning { pid: status.pid });
        }

        let pid = self.marker.claim()?;

        let now = Utc::now();
        let state = RunState::new(pid, now, scheduler::trigger_for(&self.rate, now));
        if let Err(e) = self.store.save(&state) {
            self.release_marker();
            return Err(e);
        }

        if self.options.handle_signals {
            match self.shutdown.listen_for_signals() {
                Ok(handle) => self.signal_task = Some(handle),
                Err(e) => {
                    cleanup(&self.marker, &self.store);
                    return Err(DaemonError::Io {
                        context: "failed to install signal handlers".into(),
                        source: e,
                    });
                }
            }
        }

        info!(pid, "daemon started");
        info!(
            rate = self.rate.rate(),
            period = %self.rate.period(),
            variants = ?self.rate.variants(),
            next_trigger = %state.next_trigger.to_rfc2822(),
            "work unit schedule"
        );

        let runner = Runner {
            marker: self.marker.clone(),
            store: self.store.clone(),
            rate: self.rate.clone(),
            default_variant: self.options.default_variant.clone(),
            shutdown: self.shutdown.clone(),
            phase: Arc::clone(&self.phase),
            work,
            state,
        };

        self.phase.send_replace(Phase::Running);
        self.task = Some(tokio::spawn(runner.run()));
        Ok(())
    }

    /// Ask the loop to stop. The pending wait unblocks immediately; no work
    /// unit is started early.
    pub fn stop(&self) {
        self.shutdown.trigger(ShutdownReason::Requested);
    }

    /// Block until the loop has exited and cleaned up its files.
    ///
    /// Returns immediately if the daemon was never started.
    pub async fn wait(&mut self) {
        let Some(task) = self.task.take() else {
            return;
        };

        if let Err(e) = task.await {
            // The loop never reached its own cleanup.
            error!(error = %e, "daemon task terminated abnormally");
            self.phase.send_replace(Phase::Stopping);
            cleanup(&self.marker, &self.store);
            self.phase.send_replace(Phase::Stopped);
        }

        if let Some(listener) = self.signal_task.take() {
            listener.abort();
        }
    }

    fn release_marker(&self) {
        if let Err(e) = self.marker.release() {
            warn!(error = %e, "failed to remove daemon marker");
        }
    }
}

/// State moved into the background task. Only this task mutates `state`.
struct Runner {
    marker: InstanceMarker,
    store: StateStore,
    rate: RateConfig,
    default_variant: String,
    shutdown: ShutdownSignal,
    phase: Arc<watch::Sender<Phase>>,
    work: Box<dyn WorkUnit>,
    state: RunState,
}

impl Runner {
    async fn run(mut self) {
        let reason = self.run_until_shutdown().await;
        info!(%reason, "shutting down");

        self.phase.send_replace(Phase::Stopping);
        cleanup(&self.marker, &self.store);
        self.phase.send_replace(Phase::Stopped);
    }

    async fn run_until_shutdown(&mut self) -> ShutdownReason {
        loop {
            let wait = scheduler::remaining(self.state.next_trigger, Utc::now());
            info!(wait_secs = wait.as_secs(), "waiting until next work unit");

            // Shutdown is polled first so it wins over a trigger that is
            // already due.
            tokio::select! {
                biased;
                reason = self.shutdown.cancelled() => return reason,
                () = tokio::time::sleep(wait) => {}
            }

            self.run_cycle().await;
        }
    }

    /// One trigger: run the work unit, record the outcome, reschedule and
    /// persist. Failures are logged; the cadence continues regardless.
    async fn run_cycle(&mut self) {
        let variant =
            scheduler::select_variant(self.rate.variants(), &self.default_variant).to_string();
        info!(%variant, "starting work unit");

        match self.work.run(&variant, &self.shutdown).await {
            Ok(outcome) => {
                self.state.record_completion(Utc::now(), &variant);
                info!(
                    count = self.state.completed_count,
                    id = %outcome.id,
                    %variant,
                    "work unit completed"
                );
            }
            Err(e) => {
                warn!(error = %e, %variant, "work unit failed");
            }
        }

        self.state.next_trigger = scheduler::trigger_for(&self.rate, Utc::now());
        if let Err(e) = self.store.save(&self.state) {
            error!(error = %e, "failed to save run state");
        }
        info!(next_trigger = %self.state.next_trigger.to_rfc2822(), "next work unit scheduled");
    }
}

/// Remove the marker, then the state file. Each step runs even if the other
/// fails.
fn cleanup(marker: &InstanceMarker, store: &StateStore) {
    info!("cleaning up");
    if let Err(e) = marker.release() {
        warn!(error = %e, "failed to remove daemon marker");
    }
    if let Err(e) = store.remove() {
        warn!(error = %e, "failed to remove state file");
    }
    info!("daemon stopped");
}
