//! Compare sequential and pooled concurrent execution of slow queries.
//!
//! Run with `cargo run -p asql-bench -- --queries 5 --delay 0.25`.

use std::time::Duration;

use anyhow::{Context, Result};
use asql_bench::{BenchConfig, Report, run_concurrent, run_sequential};
use asql_testing::SimulatedConnector;
use asql_transport::ConnectOptions;
use clap::Parser;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "asql-bench",
    about = "Run slow queries sequentially, then concurrently through a pool, and compare"
)]
struct Cli {
    /// Number of queries
    #[arg(long, default_value_t = 5)]
    queries: usize,

    /// Latency of each query in seconds
    #[arg(long, default_value_t = 0.25)]
    delay: f64,

    /// Per-query latencies in seconds; overrides --queries and --delay
    #[arg(long, value_delimiter = ',')]
    latencies: Option<Vec<f64>>,

    /// Pool size for the concurrent run [default: one per query]
    #[arg(long)]
    pool_size: Option<u32>,

    /// Simulated time to open one connection, in milliseconds
    #[arg(long, default_value_t = 0)]
    connect_latency_ms: u64,

    /// Server host label
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Server port
    #[arg(long, default_value_t = 3306)]
    port: u16,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();

    let mut config = match cli.latencies {
        Some(latencies) => BenchConfig::with_latencies(latencies),
        None => BenchConfig::new(cli.queries, cli.delay),
    };
    if let Some(size) = cli.pool_size {
        config = config.pool_size(size);
    }
    config = config.connect(ConnectOptions::new(cli.host, cli.port));

    let server = SimulatedConnector::new()
        .with_connect_latency(Duration::from_millis(cli.connect_latency_ms));

    let sequential = run_sequential(&server, &config)
        .await
        .context("sequential run failed")?;
    let concurrent = run_concurrent(server, &config)
        .await
        .context("concurrent run failed")?;

    println!("{}", Report::new(sequential, concurrent));
    Ok(())
}
