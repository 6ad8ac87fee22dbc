//! Jittered background scheduler for the jernel daemon.
//!
//! - [`scheduler`]: rate + period to a randomized wait
//! - [`daemon`]: the single background loop and its lifecycle
//! - [`shutdown`]: cooperative cancellation shared with signal handlers
//! - [`work`]: the work-unit seam and its command/log implementations

pub mod daemon;
pub mod scheduler;
pub mod shutdown;
pub mod work;

pub use daemon::{Daemon, DaemonOptions, Phase};
pub use shutdown::{ShutdownReason, ShutdownSignal};
pub use work::{CommandWorkUnit, LogWorkUnit, WorkOutcome, WorkUnit, WorkUnitError};
