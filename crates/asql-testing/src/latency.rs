//! `SLEEP(x)` statements.

use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;

static SLEEP_RE: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"(?i)\bSLEEP\s*\(\s*([0-9]*\.?[0-9]+)\s*\)").ok());

/// Build a statement that takes `seconds` on the simulated server.
#[must_use]
pub fn sleep_query(seconds: f64) -> String {
    format!("SELECT SLEEP({seconds})")
}

/// The latency requested by the first `SLEEP(x)` in `sql`, if any.
#[must_use]
pub fn sleep_duration(sql: &str) -> Option<Duration> {
    let captures = SLEEP_RE.as_ref()?.captures(sql)?;
    let seconds: f64 = captures.get(1)?.as_str().parse().ok()?;
    if !seconds.is_finite() {
        return None;
    }
    // microsecond resolution keeps decimal latencies exact
    Some(Duration::from_micros((seconds * 1e6).round() as u64))
}
