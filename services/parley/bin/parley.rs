//! Main Entrypoint for the Parley Service
//!
//! 1. Loads configuration from the environment.
//! 2. Initializes logging on stderr, leaving stdout to the conversation.
//! 3. Resolves who we are and whether we call or wait, from flags or prompts.
//! 4. Runs one call to completion.

use anyhow::Context;
use clap::Parser;
use parley_service::{
    call::run_call,
    config::Config,
    prompt::{self, Cli},
};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // --- 1. Load Configuration ---
    let config = Config::from_env().context("Failed to load configuration")?;

    // --- 2. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .with_writer(std::io::stderr)
        .init();

    // --- 3. Startup Input ---
    let startup = {
        let stdin = std::io::stdin();
        let mut input = stdin.lock();
        let mut output = std::io::stdout();
        prompt::resolve(cli, &mut input, &mut output).context("Invalid startup input")?
    };
    info!(user = %startup.user, role = ?startup.role, "Starting.");

    // --- 4. Run the Call ---
    run_call(&config, startup).await?;

    info!("Goodbye.");
    Ok(())
}
