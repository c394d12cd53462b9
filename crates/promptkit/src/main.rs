//! Promptkit CLI binary.

use anyhow::Result;
use promptkit::cli::Cli;
use tracing_subscriber::EnvFilter;

/// Main entry point for the promptkit CLI.
///
/// Commands run one after another, so a current-thread runtime is enough.
#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // RUST_LOG overrides, e.g. RUST_LOG=promptkit=debug,promptkit_jsonl=trace
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("promptkit=info,promptkit_jsonl=info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    tracing::debug!("Starting promptkit CLI");

    let cli = Cli::parse_args();
    cli.execute().await?;

    tracing::debug!("Promptkit CLI completed successfully");
    Ok(())
}
