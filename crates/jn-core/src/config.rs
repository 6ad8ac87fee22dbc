use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::DaemonError;
use crate::paths::default_config_path;

const HOUR: Duration = Duration::from_secs(60 * 60);

/// Top-level configuration loaded from `<config dir>/jernel/config.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Variant used when `daemon.variants` is empty.
    #[serde(default = "default_variant")]
    pub default_variant: String,
    #[serde(default)]
    pub daemon: DaemonConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_variant: default_variant(),
            daemon: DaemonConfig::default(),
        }
    }
}

impl Config {
    /// Load config from the default location, falling back to defaults
    /// when the file does not exist.
    pub fn load() -> Result<Self, ConfigError> {
        let path = default_config_path();
        if path.exists() {
            Self::load_from(path)
        } else {
            tracing::debug!(path = %path.display(), "no config file found, using defaults");
            let cfg = Config::default();
            cfg.validate()?;
            Ok(cfg)
        }
    }

    /// Load from a specific path.
    pub fn load_from(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let text = std::fs::read_to_string(&path)
            .map_err(|e| ConfigError::Io(format!("{}: {e}", path.display())))?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let cfg: Config = toml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Serialize config to TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Write the config to `path`, creating the parent directory.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Io(e.to_string()))?;
        }
        std::fs::write(path, self.to_toml()?).map_err(|e| ConfigError::Io(e.to_string()))
    }

    /// Semantic validation for settings that are not expressible via types.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_variant.trim().is_empty() {
            return Err(ConfigError::Validation(
                "default_variant must not be empty".into(),
            ));
        }
        self.daemon.validate()
    }
}

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("io: {0}")]
    Io(String),
    #[error("parse: {0}")]
    Parse(String),
    #[error("validation: {0}")]
    Validation(String),
}

impl From<DaemonError> for ConfigError {
    fn from(err: DaemonError) -> Self {
        ConfigError::Validation(err.to_string())
    }
}

// ---------------------------------------------------------------------------
// [daemon]
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Work units per period.
    #[serde(default = "default_rate")]
    pub rate: i64,
    /// `hour`, `day` or `week`.
    #[serde(default = "default_rate_period")]
    pub rate_period: String,
    /// Variants to pick from at random for each work unit.
    #[serde(default)]
    pub variants: Vec<String>,
    /// External command run for each work unit (program followed by args).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<Vec<String>>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            rate: default_rate(),
            rate_period: default_rate_period(),
            variants: Vec::new(),
            command: None,
        }
    }
}

impl DaemonConfig {
    /// Resolve into a validated [`RateConfig`].
    pub fn rate_config(&self) -> Result<RateConfig, DaemonError> {
        RateConfig::try_new(self.rate, &self.rate_period, self.variants.clone())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.rate_config()?;
        if let Some(command) = &self.command {
            if command.first().map_or(true, |p| p.trim().is_empty()) {
                return Err(ConfigError::Validation(
                    "daemon.command must name a program".into(),
                ));
            }
        }
        Ok(())
    }
}

fn default_rate() -> i64 {
    3
}

fn default_rate_period() -> String {
    Period::Day.to_string()
}

fn default_variant() -> String {
    "default".to_string()
}

// ---------------------------------------------------------------------------
// Period
// ---------------------------------------------------------------------------

/// The window a rate is expressed against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Period {
    Hour,
    Day,
    Week,
}

impl Period {
    /// Fixed length of the period: 1h, 24h or 168h.
    pub fn duration(self) -> Duration {
        match self {
            Period::Hour => HOUR,
            Period::Day => HOUR * 24,
            Period::Week => HOUR * 24 * 7,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Period::Hour => "hour",
            Period::Day => "day",
            Period::Week => "week",
        }
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Period {
    type Err = DaemonError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "hour" => Ok(Period::Hour),
            "day" => Ok(Period::Day),
            "week" => Ok(Period::Week),
            other => Err(DaemonError::InvalidPeriod(other.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// RateConfig
// ---------------------------------------------------------------------------

/// Validated scheduling input: `rate` work units per `period`.
///
/// Construction is the only place rate and period are checked, so holders
/// of a `RateConfig` can compute intervals without further error handling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateConfig {
    rate: u32,
    period: Period,
    variants: Vec<String>,
}

impl RateConfig {
    /// Validate `rate` and `period`.
    ///
    /// Rates above `u32::MAX` are rejected along with non-positive ones; at
    /// that density the average interval would collapse toward zero.
    /// Variants are trimmed, blanks dropped and duplicates removed while
    /// keeping first-seen order.
    pub fn try_new(rate: i64, period: &str, variants: Vec<String>) -> Result<Self, DaemonError> {
        let rate = u32::try_from(rate)
            .ok()
            .filter(|r| *r > 0)
            .ok_or(DaemonError::InvalidRate(rate))?;
        let period = period.parse::<Period>()?;

        let mut pool: Vec<String> = Vec::with_capacity(variants.len());
        for variant in variants {
            let variant = variant.trim();
            if !variant.is_empty() && !pool.iter().any(|v| v == variant) {
                pool.push(variant.to_string());
            }
        }

        Ok(Self {
            rate,
            period,
            variants: pool,
        })
    }

    pub fn rate(&self) -> u32 {
        self.rate
    }

    pub fn period(&self) -> Period {
        self.period
    }

    pub fn variants(&self) -> &[String] {
        &self.variants
    }

    /// `period / rate`.
    pub fn average_interval(&self) -> Duration {
        self.period.duration() / self.rate
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
