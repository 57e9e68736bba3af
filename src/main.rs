mod app;
mod cli;

use clap::Parser;
use tracing::Level;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::{app::App, cli::Cli};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env is fine; a broken one is not.
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            return Err(e.into());
        }
    }

    let cli = Cli::parse();

    let filter = if cli.verbose {
        llm_gateway::telemetry::env_filter_with_level("info", Level::DEBUG)
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(llm_gateway::telemetry::layer())
        .try_init()?;

    let app = App::build()?;
    let outcome = app.run(cli.command).await;
    app.shutdown().await;
    outcome
}
