//! Per-query completion times.

use std::sync::Arc;
use std::time::Duration;

use indexmap::IndexMap;
use parking_lot::Mutex;
use tokio::time::Instant;

/// Completion offsets keyed by query label, in recording order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Timeline {
    entries: IndexMap<String, Duration>,
}

impl Timeline {
    /// Create an empty timeline.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `key` finished `at` after the run started.
    ///
    /// A key recorded twice keeps its position and takes the later time.
    pub fn record(&mut self, key: impl Into<String>, at: Duration) {
        self.entries.insert(key.into(), at);
    }

    /// Finish offset for `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Duration> {
        self.entries.get(key).copied()
    }

    /// Entries in recording order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, Duration)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Entries ordered by finish time; ties keep recording order.
    #[must_use]
    pub fn by_finish(&self) -> Vec<(&str, Duration)> {
        let mut entries: Vec<_> = self.iter().collect();
        entries.sort_by_key(|&(_, at)| at);
        entries
    }

    /// Latest finish offset.
    #[must_use]
    pub fn last_finish(&self) -> Option<Duration> {
        self.entries.values().copied().max()
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Records into a shared [`Timeline`] relative to a fixed start.
///
/// Cloned into continuations; each clone writes to the same timeline.
#[derive(Debug, Clone)]
pub struct Recorder {
    start: Instant,
    timeline: Arc<Mutex<Timeline>>,
}

impl Recorder {
    /// Start measuring now.
    #[must_use]
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
            timeline: Arc::new(Mutex::new(Timeline::new())),
        }
    }

    /// Record `key` as finished now.
    pub fn record(&self, key: impl Into<String>) {
        let at = self.start.elapsed();
        self.timeline.lock().record(key, at);
    }

    /// Time since the start.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Copy of what was recorded so far.
    #[must_use]
    pub fn snapshot(&self) -> Timeline {
        self.timeline.lock().clone()
    }
}
