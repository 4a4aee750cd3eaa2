//! Workspace automation for asql.
//!
//! Run with `cargo xtask <command>`.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use xshell::{Shell, cmd};

#[derive(Parser)]
#[command(name = "xtask", about = "Workspace automation for asql")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Format check, lint and test
    Ci,
    /// Run cargo fmt --check
    Fmt,
    /// Run clippy over every target
    Clippy,
    /// Run the workspace tests
    Test,
    /// Build the API docs
    Doc,
    /// Run the criterion benches of the pool
    Bench,
    /// Run the sequential vs concurrent comparison
    Compare {
        /// Number of queries
        #[arg(long, default_value_t = 5)]
        queries: usize,
        /// Latency of each query in seconds
        #[arg(long, default_value_t = 0.25)]
        delay: f64,
    },
    /// Remove build artifacts
    Clean,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let sh = Shell::new()?;
    sh.change_dir(workspace_root()?);

    match cli.command {
        Command::Ci => {
            fmt(&sh)?;
            clippy(&sh)?;
            test(&sh)?;
            println!("ci: ok");
        }
        Command::Fmt => fmt(&sh)?,
        Command::Clippy => clippy(&sh)?,
        Command::Test => test(&sh)?,
        Command::Doc => cmd!(sh, "cargo doc --workspace --no-deps").run()?,
        Command::Bench => cmd!(sh, "cargo bench -p asql-pool").run()?,
        Command::Compare { queries, delay } => {
            let queries = queries.to_string();
            let delay = delay.to_string();
            cmd!(
                sh,
                "cargo run --release -p asql-bench -- --queries {queries} --delay {delay}"
            )
            .run()?;
        }
        Command::Clean => cmd!(sh, "cargo clean").run()?,
    }

    Ok(())
}

fn workspace_root() -> Result<PathBuf> {
    let output = std::process::Command::new("cargo")
        .args(["locate-project", "--workspace", "--message-format=plain"])
        .output()
        .context("failed to run cargo locate-project")?;

    let manifest = String::from_utf8(output.stdout).context("invalid UTF-8 in cargo output")?;
    Ok(PathBuf::from(manifest.trim())
        .parent()
        .context("workspace manifest has no parent directory")?
        .to_path_buf())
}

fn fmt(sh: &Shell) -> Result<()> {
    println!("checking formatting");
    cmd!(sh, "cargo fmt --all -- --check").run()?;
    Ok(())
}

fn clippy(sh: &Shell) -> Result<()> {
    println!("running clippy");
    cmd!(sh, "cargo clippy --workspace --all-targets -- -D warnings").run()?;
    Ok(())
}

fn test(sh: &Shell) -> Result<()> {
    println!("running tests");
    cmd!(sh, "cargo test --workspace").run()?;
    Ok(())
}
