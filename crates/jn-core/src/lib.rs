//! Shared domain types for the jernel scheduler daemon.
//!
//! - [`config`]: user configuration and the validated [`RateConfig`]
//! - [`marker`]: the single-instance pid marker and liveness probe
//! - [`state`]: the persisted [`RunState`] snapshot
//! - [`paths`]: where those files live

pub mod config;
pub mod error;
pub mod marker;
pub mod paths;
pub mod state;

pub use config::{Config, ConfigError, DaemonConfig, Period, RateConfig};
pub use error::{DaemonError, Result};
pub use marker::{InstanceMarker, InstanceStatus};
pub use paths::Paths;
pub use state::{RunState, StateStore};
