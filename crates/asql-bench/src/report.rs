//! Plain-text benchmark report.

use std::fmt;
use std::time::Duration;

use crate::runner::RunResult;
use crate::timeline::Timeline;

/// Width of a bar for a query that finished last.
const BAR_WIDTH: usize = 40;

/// Sequential and concurrent results side by side.
#[derive(Debug, Clone)]
pub struct Report {
    /// The blocking, one-after-another run.
    pub sequential: RunResult,
    /// The pooled run.
    pub concurrent: RunResult,
}

impl Report {
    /// Pair two runs.
    #[must_use]
    pub fn new(sequential: RunResult, concurrent: RunResult) -> Self {
        Self {
            sequential,
            concurrent,
        }
    }

    /// Time saved by the concurrent run, as a percentage of the sequential
    /// total.
    #[must_use]
    pub fn improvement_percent(&self) -> f64 {
        let sequential = self.sequential.total.as_secs_f64();
        let concurrent = self.concurrent.total.as_secs_f64();
        (sequential - concurrent) / sequential.max(1e-9) * 100.0
    }

    /// How many times faster the concurrent run was.
    ///
    /// Infinite when the concurrent run took no measurable time.
    #[must_use]
    pub fn speedup(&self) -> f64 {
        let concurrent = self.concurrent.total.as_secs_f64();
        if concurrent > 0.0 {
            self.sequential.total.as_secs_f64() / concurrent
        } else {
            f64::INFINITY
        }
    }
}

fn millis(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

/// One `Query N (Xms)` line with a bar proportional to its finish time.
fn render_bar(key: &str, finish: Duration, total: Duration) -> String {
    let fraction = if total.is_zero() {
        0.0
    } else {
        (finish.as_secs_f64() / total.as_secs_f64()).clamp(0.0, 1.0)
    };
    let width = (fraction * BAR_WIDTH as f64).round() as usize;
    format!(
        "{:<BAR_WIDTH$} {key} ({:.0}ms)",
        "█".repeat(width),
        millis(finish)
    )
}

fn write_run(
    f: &mut fmt::Formatter<'_>,
    title: &str,
    entries: &[(&str, Duration)],
    total: Duration,
) -> fmt::Result {
    writeln!(f, "{title}")?;
    writeln!(f, "Total: {:.2}ms", millis(total))?;
    for (key, finish) in entries {
        writeln!(f, "  {}", render_bar(key, *finish, total))?;
    }
    Ok(())
}

fn ordered(timeline: &Timeline) -> Vec<(&str, Duration)> {
    timeline.iter().collect()
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_run(
            f,
            "Sequential (one blocking session per query)",
            &ordered(&self.sequential.timeline),
            self.sequential.total,
        )?;
        writeln!(f)?;
        write_run(
            f,
            "Concurrent (pooled, promise-driven)",
            &self.concurrent.timeline.by_finish(),
            self.concurrent.total,
        )?;
        writeln!(f)?;
        write!(
            f,
            "{:.1}% reduction in execution time ({:.2}x faster)",
            self.improvement_percent(),
            self.speedup()
        )
    }
}
