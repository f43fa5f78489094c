//! Parsing of the deadline expressions given with dead man's switch check-ins.
//!
//! A deadline is one of:
//!  * `+<N>d@<HH>:<MM>`, which is HH:MM (UTC) on the N-th day after today.
//!  * `+<duration>`, such as `+24h`, `+90m` or `+1h 30m`, which is relative
//!    to now. Decimal fractions of units are also accepted, as in `+1.5h`
//!    or `+2h45.5m`.
//!  * A fully-qualified RFC3339 timestamp.
use chrono::{DateTime, Duration, Utc};
use std::sync::LazyLock;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("duration in bad format")]
    BadDuration,
    #[error("not in RFC3339: {0}")]
    NotRfc3339(String),
    #[error("deadline {0} is out of range")]
    OutOfRange(String),
}

static DAY_AT_TIME_RE: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new(r"^\+([0-9]+)d@([0-9]{2}):([0-9]{2})$").unwrap());

static DECIMAL_DURATION_RE: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"^(?:[0-9]*\.?[0-9]+(?:ns|us|µs|ms|s|m|h))+$").unwrap()
});
static DECIMAL_PART_RE: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new(r"([0-9]*\.?[0-9]+)(ns|us|µs|ms|s|m|h)").unwrap());

/// Parse the deadline expression `spec`, resolving relative forms against `now`.
pub fn parse(spec: &str, now: DateTime<Utc>) -> Result<DateTime<Utc>, Error> {
    if let Some(captures) = DAY_AT_TIME_RE.captures(spec) {
        let out_of_range = || Error::OutOfRange(spec.to_string());

        let days: i64 = captures[1].parse().map_err(|_| out_of_range())?;
        let hours: i64 = captures[2].parse().map_err(|_| out_of_range())?;
        let minutes: i64 = captures[3].parse().map_err(|_| out_of_range())?;

        // Out-of-range clock values roll over, so "+0d@24:00" is tomorrow's midnight.
        let offset = Duration::try_days(days)
            .and_then(|d| d.checked_add(&Duration::hours(hours)))
            .and_then(|d| d.checked_add(&Duration::minutes(minutes)))
            .ok_or_else(out_of_range)?;

        let midnight = now.date_naive().and_time(chrono::NaiveTime::MIN).and_utc();
        return midnight.checked_add_signed(offset).ok_or_else(out_of_range);
    }

    if let Some(relative) = spec.strip_prefix('+') {
        let duration = humantime::parse_duration(relative)
            .ok()
            .or_else(|| parse_decimal_duration(relative))
            .ok_or(Error::BadDuration)?;
        let duration = Duration::from_std(duration).map_err(|_| Error::BadDuration)?;

        return now
            .checked_add_signed(duration)
            .ok_or_else(|| Error::OutOfRange(spec.to_string()));
    }

    DateTime::parse_from_rfc3339(spec)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|_| Error::NotRfc3339(spec.to_string()))
}

// Parse a duration whose units may have decimal fractions, such as "1.5h".
fn parse_decimal_duration(text: &str) -> Option<std::time::Duration> {
    if !DECIMAL_DURATION_RE.is_match(text) {
        return None;
    }

    let mut seconds = 0.0;
    for part in DECIMAL_PART_RE.captures_iter(text) {
        let value: f64 = part[1].parse().ok()?;
        let unit = match &part[2] {
            "ns" => 1e-9,
            "us" | "µs" => 1e-6,
            "ms" => 1e-3,
            "s" => 1.0,
            "m" => 60.0,
            "h" => 3600.0,
            _ => return None,
        };
        seconds += value * unit;
    }
    std::time::Duration::try_from_secs_f64(seconds).ok()
}
