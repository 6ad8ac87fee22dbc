use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use jn_core::{DaemonError, InstanceMarker, InstanceStatus, Paths, RateConfig, StateStore};
use jn_daemon::{
    Daemon, DaemonOptions, LogWorkUnit, Phase, ShutdownSignal, WorkOutcome, WorkUnit,
    WorkUnitError,
};
use tokio::sync::{mpsc, Semaphore};

fn three_a_day(variants: &[&str]) -> RateConfig {
    RateConfig::try_new(3, "day", variants.iter().map(|v| v.to_string()).collect()).unwrap()
}

/// Reports every call, then parks until the test hands out a permit.
/// Even-numbered calls fail.
struct Scripted {
    calls: mpsc::UnboundedSender<(u32, String)>,
    count: AtomicU32,
    gate: Arc<Semaphore>,
}

impl Scripted {
    fn new() -> (Self, mpsc::UnboundedReceiver<(u32, String)>, Arc<Semaphore>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let gate = Arc::new(Semaphore::new(0));
        let unit = Self {
            calls: tx,
            count: AtomicU32::new(0),
            gate: Arc::clone(&gate),
        };
        (unit, rx, gate)
    }
}

#[async_trait]
impl WorkUnit for Scripted {
    async fn run(
        &self,
        variant: &str,
        shutdown: &ShutdownSignal,
    ) -> Result<WorkOutcome, WorkUnitError> {
        let n = self.count.fetch_add(1, Ordering::SeqCst) + 1;
        let _ = self.calls.send((n, variant.to_string()));

        tokio::select! {
            biased;
            _ = shutdown.cancelled() => return Err(WorkUnitError::Cancelled),
            permit = self.gate.acquire() => {
                permit.expect("gate closed").forget();
            }
        }

        if n % 2 == 0 {
            Err(WorkUnitError::Failed(format!("scripted failure {n}")))
        } else {
            Ok(WorkOutcome::new(format!("entry-{n}")))
        }
    }
}

#[tokio::test]
async fn start_persists_state_and_stop_cleans_up() {
    let dir = tempfile::tempdir().unwrap();
    let paths = Paths::new(dir.path());
    let marker = InstanceMarker::from_paths(&paths);
    let store = StateStore::from_paths(&paths);

    let before = Utc::now();
    let mut daemon = Daemon::new(&paths, three_a_day(&[]), DaemonOptions::default());
    daemon.start(LogWorkUnit).expect("start on a clean directory");
    assert_eq!(daemon.phase(), Phase::Running);

    let own_pid = std::process::id() as i32;
    assert_eq!(marker.probe().unwrap(), InstanceStatus::running(own_pid));

    let state = store.load().unwrap().expect("state persisted on start");
    assert_eq!(state.process_id, own_pid);
    assert_eq!(state.completed_count, 0);
    assert!(state.last_completed_at.is_none());
    assert!(state.last_variant.is_none());
    assert!(state.next_trigger >= before + chrono::Duration::hours(4));
    assert!(state.next_trigger <= Utc::now() + chrono::Duration::hours(12));

    // A second instance against the same files is refused.
    let mut second = Daemon::new(&paths, three_a_day(&[]), DaemonOptions::default());
    match second.start(LogWorkUnit) {
        Err(DaemonError::AlreadyRunning { pid }) => assert_eq!(pid, own_pid),
        other => panic!("expected AlreadyRunning, got {other:?}"),
    }
    assert_eq!(second.phase(), Phase::Idle);

    daemon.stop();
    tokio::time::timeout(Duration::from_secs(5), daemon.wait())
        .await
        .expect("daemon should stop promptly");

    assert_eq!(daemon.phase(), Phase::Stopped);
    assert!(!paths.marker().exists(), "marker must be removed");
    assert!(!paths.state().exists(), "state file must be removed");
}

#[tokio::test]
async fn stale_marker_does_not_block_start() {
    let dir = tempfile::tempdir().unwrap();
    let paths = Paths::new(dir.path());
    std::fs::write(paths.marker(), "999999999").unwrap();

    let mut daemon = Daemon::new(&paths, three_a_day(&[]), DaemonOptions::default());
    daemon.start(LogWorkUnit).expect("stale marker should be replaced");

    let marker = InstanceMarker::from_paths(&paths);
    assert_eq!(marker.read_pid().unwrap(), Some(std::process::id() as i32));

    daemon.stop();
    daemon.wait().await;
}

#[tokio::test]
async fn failed_initial_save_releases_marker() {
    let dir = tempfile::tempdir().unwrap();
    let paths = Paths::new(dir.path());
    // A non-empty directory where the state file should go makes the rename fail.
    std::fs::create_dir_all(paths.state().join("occupied")).unwrap();

    let mut daemon = Daemon::new(&paths, three_a_day(&[]), DaemonOptions::default());
    let err = daemon.start(LogWorkUnit).unwrap_err();
    assert!(matches!(err, DaemonError::Io { .. }), "got {err:?}");
    assert_eq!(daemon.phase(), Phase::Idle);
    assert!(!paths.marker().exists(), "marker must be rolled back");
}

#[tokio::test(start_paused = true)]
async fn cycles_record_successes_and_survive_failures() {
    let dir = tempfile::tempdir().unwrap();
    let paths = Paths::new(dir.path());
    let store = StateStore::from_paths(&paths);
    let variants = ["calm", "dramatic"];

    let (unit, mut calls, gate) = Scripted::new();
    let mut daemon = Daemon::new(&paths, three_a_day(&variants), DaemonOptions::default());
    daemon.start(unit).unwrap();

    for expected in 1..=3 {
        let (n, variant) = calls.recv().await.expect("work unit call");
        assert_eq!(n, expected);
        assert!(variants.contains(&variant.as_str()), "unexpected variant {variant}");
        gate.add_permits(1);
    }

    // Call 4 is parked on the gate, so cycles 1..=3 are on disk.
    let (n, _) = calls.recv().await.expect("fourth call");
    assert_eq!(n, 4);

    let state = store.load().unwrap().expect("state while running");
    assert_eq!(state.completed_count, 2, "calls 1 and 3 succeed, 2 fails");
    assert!(state.last_completed_at.is_some());
    let last = state.last_variant.expect("last variant recorded");
    assert!(variants.contains(&last.as_str()));
    assert!(state.next_trigger > state.started_at);

    daemon.stop();
    daemon.wait().await;

    assert_eq!(daemon.phase(), Phase::Stopped);
    assert!(!paths.marker().exists());
    assert!(!paths.state().exists());
}

#[tokio::test(start_paused = true)]
async fn default_variant_is_used_without_pool() {
    let dir = tempfile::tempdir().unwrap();
    let paths = Paths::new(dir.path());

    let (unit, mut calls, _gate) = Scripted::new();
    let options = DaemonOptions {
        default_variant: "fallback".into(),
        ..DaemonOptions::default()
    };
    let mut daemon = Daemon::new(&paths, three_a_day(&[]), options);
    daemon.start(unit).unwrap();

    let (_, variant) = calls.recv().await.expect("first call");
    assert_eq!(variant, "fallback");

    daemon.stop();
    daemon.wait().await;
    assert_eq!(daemon.phase(), Phase::Stopped);
}

#[tokio::test(start_paused = true)]
async fn stop_before_first_trigger_never_runs_work() {
    let dir = tempfile::tempdir().unwrap();
    let paths = Paths::new(dir.path());

    let (unit, mut calls, _gate) = Scripted::new();
    let mut daemon = Daemon::new(&paths, three_a_day(&[]), DaemonOptions::default());
    daemon.start(unit).unwrap();
    daemon.stop();
    daemon.wait().await;

    assert!(calls.try_recv().is_err(), "no work unit should have run");
    assert_eq!(daemon.phase(), Phase::Stopped);
}

#[tokio::test]
async fn external_shutdown_handle_stops_the_loop() {
    let dir = tempfile::tempdir().unwrap();
    let paths = Paths::new(dir.path());

    let mut daemon = Daemon::new(&paths, three_a_day(&[]), DaemonOptions::default());
    daemon.start(LogWorkUnit).unwrap();

    let handle = daemon.shutdown_handle();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        handle.trigger(jn_daemon::ShutdownReason::Terminate);
    });

    tokio::time::timeout(Duration::from_secs(5), daemon.wait())
        .await
        .expect("daemon should observe the shared shutdown");
    assert!(!paths.marker().exists());
}

#[tokio::test]
async fn failed_marker_removal_still_removes_state() {
    let dir = tempfile::tempdir().unwrap();
    let paths = Paths::new(dir.path());

    let mut daemon = Daemon::new(&paths, three_a_day(&[]), DaemonOptions::default());
    daemon.start(LogWorkUnit).unwrap();

    // A non-empty directory at the marker path cannot be unlinked.
    std::fs::remove_file(paths.marker()).unwrap();
    std::fs::create_dir_all(paths.marker().join("pinned")).unwrap();

    daemon.stop();
    tokio::time::timeout(Duration::from_secs(5), daemon.wait())
        .await
        .expect("daemon should stop promptly");

    assert_eq!(daemon.phase(), Phase::Stopped);
    assert!(paths.marker().is_dir(), "marker removal was expected to fail");
    assert!(!paths.state().exists(), "state file must still be removed");
}

#[tokio::test(start_paused = true)]
async fn failed_state_save_does_not_stop_the_loop() {
    let dir = tempfile::tempdir().unwrap();
    let paths = Paths::new(dir.path());

    let (unit, mut calls, gate) = Scripted::new();
    let mut daemon = Daemon::new(&paths, three_a_day(&[]), DaemonOptions::default());
    daemon.start(unit).unwrap();

    // Every later save fails: the rename target is a non-empty directory.
    std::fs::remove_file(paths.state()).unwrap();
    std::fs::create_dir_all(paths.state().join("pinned")).unwrap();

    let (n, _) = calls.recv().await.expect("first call");
    assert_eq!(n, 1);
    gate.add_permits(1);

    let (n, _) = calls.recv().await.expect("loop keeps running after a failed save");
    assert_eq!(n, 2);
    assert!(paths.state().is_dir(), "failed save must not clobber the path");

    daemon.stop();
    daemon.wait().await;
    assert_eq!(daemon.phase(), Phase::Stopped);
    assert!(!paths.marker().exists());
}
