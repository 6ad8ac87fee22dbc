//! Logging setup shared by the jernel binaries.

pub mod logging;

pub use logging::{init, init_logging, init_logging_json, LogFormat};
