mod cli;

use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;

use swap_quote_relay::api::{self, AppState};
use swap_quote_relay::config::Config;
use swap_quote_relay::eth::RpcWallet;
use swap_quote_relay::executor::Orchestrator;
use swap_quote_relay::models::CanonicalRecord;
use swap_quote_relay::normalize::parse_and_normalize;
use swap_quote_relay::preview::build_preview;

use crate::cli::{Cli, Commands};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    let config = Config::from_env().context("failed to load configuration")?;

    match cli.command {
        Commands::Serve { addr } => {
            let bind = addr.unwrap_or_else(|| config.http_bind_addr.clone());
            let state = AppState {
                orchestrator: Arc::new(build_orchestrator(&config)?),
            };
            api::run_http_server(&bind, state).await?;
        }
        Commands::Preview { input } => {
            let record = load_record(input.as_deref())?;
            print!("{}", build_preview(&record)?);
        }
        Commands::Execute { input } => {
            let record = load_record(input.as_deref())?;
            match build_preview(&record) {
                Ok(preview) => print!("{}", preview),
                Err(err) => tracing::warn!("could not build preview: {}", err),
            }

            let orchestrator = build_orchestrator(&config)?;
            let tx_hash = orchestrator.execute(&record).await?;
            println!("Confirmed: {:?}", tx_hash);
        }
    }

    Ok(())
}

fn build_orchestrator(config: &Config) -> anyhow::Result<Orchestrator> {
    let wallet = RpcWallet::new(&config.wallet_rpc_url, config.confirmations)?;
    tracing::info!("using wallet endpoint {}", config.wallet_rpc_url);
    Ok(Orchestrator::with_backend(Arc::new(wallet)))
}

fn load_record(input: Option<&Path>) -> anyhow::Result<CanonicalRecord> {
    let text = match input {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("failed to read quote from {}", path.display()))?,
        None => {
            let mut text = String::new();
            std::io::stdin()
                .read_to_string(&mut text)
                .context("failed to read quote from stdin")?;
            text
        }
    };
    Ok(parse_and_normalize(&text)?)
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();
}
