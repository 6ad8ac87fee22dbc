use std::time::Duration;

use chrono::{DateTime, Utc};
use jn_core::{Period, RateConfig, Result};
use rand::rngs::{OsRng, StdRng};
use rand::{Rng, SeedableRng};
use tracing::{debug, warn};

/// Length of a named period: `hour`, `day` or `week`.
pub fn period_duration(period: &str) -> Result<Duration> {
    Ok(period.parse::<Period>()?.duration())
}

/// Random wait before the next work unit for `rate` units per `period`.
///
/// Fails with `InvalidRate` for `rate <= 0` and `InvalidPeriod` for an
/// unknown period; otherwise see [`interval_for`].
pub fn next_interval(rate: i64, period: &str) -> Result<Duration> {
    let config = RateConfig::try_new(rate, period, Vec::new())?;
    Ok(interval_for(&config))
}

/// `now + next_interval(rate, period)`.
pub fn next_trigger(rate: i64, period: &str) -> Result<DateTime<Utc>> {
    let config = RateConfig::try_new(rate, period, Vec::new())?;
    Ok(trigger_for(&config, Utc::now()))
}

/// Draw a wait uniformly from `[average / 2, average * 1.5)` where
/// `average = period / rate`.
///
/// Never fails: if the OS random source is unavailable the average itself
/// is returned.
pub fn interval_for(config: &RateConfig) -> Duration {
    jitter(config.average_interval(), random_below)
}

/// Absolute time of the next trigger, counted from `now`.
pub fn trigger_for(config: &RateConfig, now: DateTime<Utc>) -> DateTime<Utc> {
    let interval = interval_for(config);
    chrono::Duration::from_std(interval)
        .ok()
        .and_then(|delta| now.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Time left until `trigger`, clamped to zero once it has passed.
pub fn remaining(trigger: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (trigger - now).to_std().unwrap_or(Duration::ZERO)
}

/// Pick the variant for the next work unit: uniform over `variants`, or
/// `default` when none are configured.
pub fn select_variant<'a>(variants: &'a [String], default: &'a str) -> &'a str {
    match variants {
        [] => default,
        [only] => only.as_str(),
        _ => {
            let idx = random_below(variants.len() as u64).unwrap_or(0) as usize;
            variants[idx].as_str()
        }
    }
}

/// Midpoint ± 50% jitter around `average`, with `draw(n)` returning a value
/// in `0..n` or `None` when randomness is unavailable.
fn jitter(average: Duration, draw: impl FnOnce(u64) -> Option<u64>) -> Duration {
    let span = u64::try_from(average.as_nanos()).unwrap_or(u64::MAX);
    if span == 0 {
        return average;
    }

    match draw(span) {
        Some(offset) => {
            let interval = average / 2 + Duration::from_nanos(offset);
            debug!(
                average_secs = average.as_secs(),
                interval_secs = interval.as_secs(),
                "interval drawn"
            );
            interval
        }
        None => {
            warn!(
                average_secs = average.as_secs(),
                "random source unavailable, using average interval"
            );
            average
        }
    }
}

fn random_below(bound: u64) -> Option<u64> {
    let mut rng = StdRng::from_rng(OsRng).ok()?;
    Some(rng.gen_range(0..bound))
}
