//! Query values.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

/// Query text plus the moment it was submitted.
///
/// Cheap to clone; the text is shared.
#[derive(Debug, Clone)]
pub struct Query {
    sql: Arc<str>,
    submitted_at: Instant,
}

impl Query {
    /// Create a query submitted now.
    #[must_use]
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: Arc::from(sql.into()),
            submitted_at: Instant::now(),
        }
    }

    /// Get the SQL text.
    #[must_use]
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// When the query was created.
    #[must_use]
    pub fn submitted_at(&self) -> Instant {
        self.submitted_at
    }

    /// Time since submission.
    #[must_use]
    pub fn age(&self) -> Duration {
        self.submitted_at.elapsed()
    }
}

impl From<&str> for Query {
    fn from(sql: &str) -> Self {
        Self::new(sql)
    }
}

impl From<String> for Query {
    fn from(sql: String) -> Self {
        Self::new(sql)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_age_tracks_submission() {
        let query = Query::from("SELECT SLEEP(0.25)");
        tokio::time::advance(Duration::from_millis(120)).await;

        assert_eq!(query.sql(), "SELECT SLEEP(0.25)");
        assert_eq!(query.age(), Duration::from_millis(120));

        let copy = query.clone();
        assert_eq!(copy.submitted_at(), query.submitted_at());
    }
}
