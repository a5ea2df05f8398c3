//! Tradecouncil server - headless orchestration process.
//!
//! Runs the mode controller, provider router, agent pipeline, risk
//! engine and position manager. The fan-out gateway runs as a separate
//! process (`gateway` binary) and shares the virtual clock through
//! Redis.
//!
//! # Usage
//! ```sh
//! TRADING_MODE=paper_mock cargo run --bin server
//! cargo run --bin server -- --once   # single cycle, then exit
//! ```

use clap::Parser;
use tracing::{Level, info};
use tracing_subscriber::prelude::*;
use tradecouncil::application::system::Application;
use tradecouncil::config::Config;

#[derive(Parser, Debug)]
#[command(name = "server", about = "Multi-agent trading orchestrator")]
struct Args {
    /// Run exactly one cycle and exit.
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        // Startup failures surface as one line on stderr.
        eprintln!("fatal: {:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let stdout_layer = tracing_subscriber::fmt::layer().with_target(false);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with(stdout_layer)
        .init();

    let args = Args::parse();

    info!("Tradecouncil server {} starting...", env!("CARGO_PKG_VERSION"));

    let config = Config::from_env()?;
    info!(
        "Configuration loaded: mode={}, instrument={}, providers={}",
        config.default_mode,
        config.instrument,
        config.providers.len()
    );

    let app = Application::build(config).await?;

    if args.once {
        info!("Running a single cycle (--once)...");
        match app.orchestrator.tick().await? {
            Some(decision) => info!(
                "Cycle {} complete: {} at {:.2}",
                decision.cycle_id, decision.final_signal, decision.confidence
            ),
            None => info!("Market closed; no cycle produced"),
        }
        return Ok(());
    }

    let handle = app.start().await?;
    info!("Server running. Press Ctrl+C to shut down.");

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received.");
    handle.stop().await;
    Ok(())
}
