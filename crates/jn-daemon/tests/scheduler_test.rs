use std::collections::HashSet;
use std::time::Duration;

use chrono::Utc;
use jn_core::DaemonError;
use jn_daemon::scheduler::{next_interval, next_trigger, period_duration};

const HOUR: Duration = Duration::from_secs(3600);

#[test]
fn period_duration_for_known_periods() {
    assert_eq!(period_duration("hour").unwrap(), HOUR);
    assert_eq!(period_duration("day").unwrap(), 24 * HOUR);
    assert_eq!(period_duration("week").unwrap(), 168 * HOUR);
}

#[test]
fn period_duration_rejects_anything_else() {
    for period in ["invalid", "", "month", "HOUR", " day"] {
        assert!(
            matches!(period_duration(period), Err(DaemonError::InvalidPeriod(_))),
            "{period:?} should be rejected"
        );
    }
}

#[test]
fn intervals_stay_within_half_to_one_and_a_half_average() {
    let cases = [
        (3, "day", 8 * HOUR),
        (1, "hour", HOUR),
        (6, "day", 4 * HOUR),
        (14, "week", 12 * HOUR),
    ];

    for (rate, period, average) in cases {
        let min = average / 2;
        let max = average + average / 2;
        for _ in 0..100 {
            let interval = next_interval(rate, period).unwrap();
            assert!(interval >= min, "{rate}/{period}: {interval:?} below {min:?}");
            assert!(interval <= max, "{rate}/{period}: {interval:?} above {max:?}");
        }
    }
}

#[test]
fn intervals_vary_between_calls() {
    let seen: HashSet<Duration> = (0..50).map(|_| next_interval(3, "day").unwrap()).collect();
    assert!(
        seen.len() >= 10,
        "expected variance in intervals, only got {} unique values",
        seen.len()
    );
}

#[test]
fn non_positive_rate_is_invalid() {
    assert!(matches!(next_interval(0, "day"), Err(DaemonError::InvalidRate(0))));
    assert!(matches!(next_interval(-1, "day"), Err(DaemonError::InvalidRate(-1))));
}

#[test]
fn unknown_period_is_invalid() {
    assert!(matches!(
        next_interval(3, "invalid"),
        Err(DaemonError::InvalidPeriod(p)) if p == "invalid"
    ));
}

#[test]
fn rate_is_checked_before_period() {
    assert!(matches!(next_interval(0, "invalid"), Err(DaemonError::InvalidRate(0))));
}

#[test]
fn next_trigger_is_four_to_twelve_hours_out_for_three_a_day() {
    let before = Utc::now();
    let trigger = next_trigger(3, "day").unwrap();
    let after = Utc::now();

    assert!(trigger > before, "next trigger should be in the future");
    assert!(trigger >= before + chrono::Duration::hours(4), "{trigger} too soon");
    assert!(trigger <= after + chrono::Duration::hours(12), "{trigger} too late");
}

#[test]
fn next_trigger_rejects_invalid_input() {
    assert!(matches!(next_trigger(0, "day"), Err(DaemonError::InvalidRate(0))));
    assert!(matches!(next_trigger(1, "year"), Err(DaemonError::InvalidPeriod(_))));
}
