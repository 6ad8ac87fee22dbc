use tracing_subscriber::EnvFilter;

/// Output shape of the global subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Compact human-readable lines.
    Text,
    /// One JSON object per event, for log shippers.
    Json,
}

/// Human-readable logging on stderr. See [`init`].
pub fn init_logging(service_name: &str, default_level: &str) {
    init(LogFormat::Text, service_name, default_level);
}

/// JSON-lines logging on stderr. See [`init`].
pub fn init_logging_json(service_name: &str, default_level: &str) {
    init(LogFormat::Json, service_name, default_level);
}

/// Install the global subscriber.
///
/// `RUST_LOG` wins over `default_level` (e.g. `"info"` or
/// `"jn_daemon=debug,warn"`). Logs go to stderr so command output on stdout
/// stays clean. Only the first call in a process takes effect.
pub fn init(format: LogFormat, service_name: &str, default_level: &str) {
    let env = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    let filter = build_filter(env.as_deref(), default_level);
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    let installed = match format {
        LogFormat::Text => builder.with_target(false).try_init().is_ok(),
        LogFormat::Json => builder.json().with_current_span(false).try_init().is_ok(),
    };

    if installed {
        tracing::debug!(service = service_name, ?format, "logging initialised");
    }
}

/// Directives from `env` when set and parseable, else `default_level`.
fn build_filter(env: Option<&str>, default_level: &str) -> EnvFilter {
    env.filter(|raw| !raw.trim().is_empty())
        .and_then(|raw| EnvFilter::try_new(raw).ok())
        .unwrap_or_else(|| EnvFilter::new(default_level))
}
