use anyhow::{Context, Result};
use clap::CommandFactory;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use echoping::cli::Args;
use echoping::config::SessionConfig;
use echoping::lookup::resolve;
use echoping::ping::{InterruptBridge, PingSession};

#[tokio::main]
async fn main() -> Result<()> {
    // Diagnostics go to stderr so they never interleave with ping output
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let args = Args::parse_normalized();

    let Some(host) = args.host.as_deref() else {
        Args::command().print_help()?;
        println!();
        return Ok(());
    };

    // Validate arguments
    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    let config = SessionConfig::from(&args);
    let target = resolve(host, config.family)
        .with_context(|| format!("Failed to resolve target: {}", host))?;

    let interrupts = InterruptBridge::install(CancellationToken::new());

    let mut session = PingSession::open(target, config, interrupts.token())
        .context("Failed to open ICMP socket")?;

    let stdout = std::io::stdout();
    let state = session
        .run(&mut stdout.lock())
        .await
        .context("Ping session failed")?;
    tracing::debug!(?state, "exiting");

    Ok(())
}
