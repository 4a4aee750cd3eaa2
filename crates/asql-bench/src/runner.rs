//! The two benchmark runs.

use std::time::Duration;

use asql_pool::{Pool, PoolConfig};
use asql_testing::sleep_query;
use asql_transport::{ConnectOptions, Connector};

use crate::error::BenchError;
use crate::timeline::{Recorder, Timeline};

/// What to run.
#[derive(Debug, Clone)]
pub struct BenchConfig {
    /// Latency of each statement in seconds, one entry per query.
    pub latencies: Vec<f64>,
    /// Pool size for the concurrent run.
    pub pool_size: u32,
    /// Endpoint both runs connect to.
    pub connect: ConnectOptions,
}

impl BenchConfig {
    /// `queries` statements of `delay` seconds each, with one pooled
    /// connection per query.
    #[must_use]
    pub fn new(queries: usize, delay: f64) -> Self {
        Self {
            latencies: vec![delay; queries],
            pool_size: u32::try_from(queries).unwrap_or(u32::MAX).max(1),
            connect: ConnectOptions::default(),
        }
    }

    /// Statements with individual latencies.
    #[must_use]
    pub fn with_latencies(latencies: Vec<f64>) -> Self {
        let mut config = Self::new(latencies.len(), 0.0);
        config.latencies = latencies;
        config
    }

    /// Set the pool size for the concurrent run.
    #[must_use]
    pub fn pool_size(mut self, size: u32) -> Self {
        self.pool_size = size;
        self
    }

    /// Set the endpoint.
    #[must_use]
    pub fn connect(mut self, options: ConnectOptions) -> Self {
        self.connect = options;
        self
    }

    /// Labelled statements, `Query 1` first.
    pub fn statements(&self) -> Result<Vec<(String, String)>, BenchError> {
        if self.latencies.is_empty() {
            return Err(BenchError::NoQueries);
        }

        self.latencies
            .iter()
            .enumerate()
            .map(|(i, &secs)| {
                if !secs.is_finite() || secs < 0.0 {
                    return Err(BenchError::InvalidLatency(secs));
                }
                Ok((format!("Query {}", i + 1), sleep_query(secs)))
            })
            .collect()
    }
}

/// Outcome of one run.
#[derive(Debug, Clone)]
pub struct RunResult {
    /// When each query finished, relative to the run's start.
    pub timeline: Timeline,
    /// Wall time of the whole run.
    pub total: Duration,
}

/// Run every statement on its own fresh session, one after another.
pub async fn run_sequential<C>(connector: &C, config: &BenchConfig) -> Result<RunResult, BenchError>
where
    C: Connector + ?Sized,
{
    let statements = config.statements()?;
    let recorder = Recorder::start();

    for (key, sql) in &statements {
        let mut session = connector
            .connect(&config.connect)
            .await
            .map_err(BenchError::Connect)?;
        session.execute(sql).await.map_err(BenchError::Query)?;
        recorder.record(key.as_str());

        if let Err(error) = session.close().await {
            tracing::debug!(error = %error, "closing sequential session failed");
        }
    }

    let total = recorder.elapsed();
    tracing::info!(
        queries = statements.len(),
        total_ms = total.as_millis() as u64,
        "sequential run finished"
    );

    Ok(RunResult {
        timeline: recorder.snapshot(),
        total,
    })
}

/// Submit every statement to a pool at once and wait for all of them.
///
/// Each query's completion time is recorded by a continuation holding its
/// own label, so the timeline is correct whatever order queries finish in.
pub async fn run_concurrent(
    connector: impl Connector,
    config: &BenchConfig,
) -> Result<RunResult, BenchError> {
    let statements = config.statements()?;
    let pool_config = PoolConfig {
        connect: config.connect.clone(),
        pool_size: config.pool_size,
        ..PoolConfig::default()
    };
    let pool = Pool::new(pool_config, connector).await?;

    let recorder = Recorder::start();
    let promises: Vec<_> = statements
        .into_iter()
        .map(|(key, sql)| {
            let recorder = recorder.clone();
            let label = key.clone();
            let promise = pool.query(sql).map(move |rows| {
                recorder.record(label);
                rows
            });
            (key, promise)
        })
        .collect();

    let outcome = pool.all_keyed(promises).await;
    let total = recorder.elapsed();
    pool.close().await;
    let results = outcome?;

    tracing::info!(
        queries = results.len(),
        pool_size = config.pool_size,
        total_ms = total.as_millis() as u64,
        "concurrent run finished"
    );

    Ok(RunResult {
        timeline: recorder.snapshot(),
        total,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_statements_are_labelled_in_order() {
        let config = BenchConfig::with_latencies(vec![0.25, 0.1]);
        let statements = config.statements().unwrap();
        assert_eq!(
            statements,
            [
                ("Query 1".to_string(), "SELECT SLEEP(0.25)".to_string()),
                ("Query 2".to_string(), "SELECT SLEEP(0.1)".to_string()),
            ]
        );
        assert_eq!(config.pool_size, 2);
    }

    #[test]
    fn test_invalid_latencies_are_rejected() {
        assert!(matches!(
            BenchConfig::with_latencies(vec![0.1, -1.0]).statements(),
            Err(BenchError::InvalidLatency(_))
        ));
        assert!(matches!(
            BenchConfig::with_latencies(vec![f64::NAN]).statements(),
            Err(BenchError::InvalidLatency(_))
        ));
        assert!(matches!(
            BenchConfig::new(0, 0.25).statements(),
            Err(BenchError::NoQueries)
        ));
    }

    #[test]
    fn test_pool_size_at_least_one() {
        assert_eq!(BenchConfig::new(0, 0.1).pool_size, 1);
        assert_eq!(BenchConfig::new(5, 0.1).pool_size(2).pool_size, 2);
    }
}
