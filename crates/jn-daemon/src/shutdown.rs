use std::fmt;
use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

// ---------------------------------------------------------------------------
// ShutdownReason
// ---------------------------------------------------------------------------

/// Why the daemon is stopping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// `Daemon::stop()` or another in-process caller.
    Requested,
    /// SIGINT / ctrl-c.
    Interrupt,
    /// SIGTERM, e.g. from `jernel daemon stop`.
    Terminate,
}

impl fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ShutdownReason::Requested => "requested",
            ShutdownReason::Interrupt => "SIGINT",
            ShutdownReason::Terminate => "SIGTERM",
        })
    }
}

// ---------------------------------------------------------------------------
// ShutdownSignal
// ---------------------------------------------------------------------------

/// One-shot, cloneable cancellation shared by the caller, the OS signal
/// listener and the daemon loop.
///
/// Backed by a `watch` channel so a waiter that subscribes after the trigger
/// still observes it. The first trigger wins; later ones are ignored.
///
/// ```ignore
/// let shutdown = ShutdownSignal::new();
///
/// tokio::select! {
///     biased;
///     reason = shutdown.cancelled() => { /* graceful cleanup */ }
///     _ = tokio::time::sleep(wait) => {}
/// }
/// ```
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    tx: Arc<watch::Sender<Option<ShutdownReason>>>,
    rx: watch::Receiver<Option<ShutdownReason>>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(None);
        Self {
            tx: Arc::new(tx),
            rx,
        }
    }

    /// Check if shutdown has been triggered (non-blocking).
    pub fn is_shutting_down(&self) -> bool {
        self.rx.borrow().is_some()
    }

    /// The reason of the first trigger, if any.
    pub fn reason(&self) -> Option<ShutdownReason> {
        *self.rx.borrow()
    }

    /// Trigger shutdown. Returns `true` if this call was the first.
    pub fn trigger(&self, reason: ShutdownReason) -> bool {
        let first = self.tx.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(reason);
            true
        });
        if first {
            info!(%reason, "shutdown signal triggered");
        } else {
            debug!(%reason, "shutdown already triggered");
        }
        first
    }

    /// Resolve once shutdown has been triggered, immediately if it already was.
    pub async fn cancelled(&self) -> ShutdownReason {
        let mut rx = self.rx.clone();
        // The borrowed `Ref` must be released before `rx` goes out of scope.
        let reason = match rx.wait_for(Option::is_some).await {
            Ok(reason) => (*reason).unwrap_or(ShutdownReason::Requested),
            // `self.tx` keeps the sender alive, so this arm is unreachable.
            Err(_) => ShutdownReason::Requested,
        };
        reason
    }

    /// Install SIGINT/SIGTERM handlers and forward the first signal into
    /// this shutdown. The listener exits once shutdown happens for any reason.
    ///
    /// Handlers are registered before returning, so a signal that arrives
    /// right after this call is not lost. Must be called inside a Tokio
    /// runtime.
    pub fn listen_for_signals(&self) -> std::io::Result<JoinHandle<()>> {
        let mut signals = TerminationSignals::install()?;
        let shutdown = self.clone();
        Ok(tokio::spawn(async move {
            tokio::select! {
                reason = signals.recv() => {
                    info!(%reason, "termination signal received");
                    shutdown.trigger(reason);
                }
                _ = shutdown.cancelled() => {}
            }
        }))
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// TerminationSignals
// ---------------------------------------------------------------------------

#[cfg(unix)]
struct TerminationSignals {
    interrupt: tokio::signal::unix::Signal,
    terminate: tokio::signal::unix::Signal,
}

#[cfg(unix)]
impl TerminationSignals {
    fn install() -> std::io::Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};
        Ok(Self {
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
        })
    }

    async fn recv(&mut self) -> ShutdownReason {
        tokio::select! {
            _ = self.interrupt.recv() => ShutdownReason::Interrupt,
            _ = self.terminate.recv() => ShutdownReason::Terminate,
        }
    }
}

#[cfg(not(unix))]
struct TerminationSignals {
    ctrl_c: tokio::signal::windows::CtrlC,
}

#[cfg(not(unix))]
impl TerminationSignals {
    fn install() -> std::io::Result<Self> {
        Ok(Self {
            ctrl_c: tokio::signal::windows::ctrl_c()?,
        })
    }

    async fn recv(&mut self) -> ShutdownReason {
        self.ctrl_c.recv().await;
        ShutdownReason::Interrupt
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
