//! Restart worker process.
//!
//! Reads one JSON restart bundle from stdin, runs the assigned restarts and
//! writes the JSON reply to stdout. Logs go to stderr.

use anyhow::Result;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let stdin = std::io::stdin();
    let stdout = std::io::stdout();
    let processed = at_model::worker::serve(stdin.lock(), stdout.lock())?;

    info!(processed, "restart worker finished");
    Ok(())
}
