mod cli;
mod server;

use clap::Parser;
use cli::{Cli, Commands};
use hako::api::{AppState, Stores};
use hako::config::Config;
use hako::ledger::Ledger;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

type AnyError = Box<dyn std::error::Error + Send + Sync>;

#[tokio::main]
async fn main() -> Result<(), AnyError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = Config::load()?;

    match cli.command {
        Commands::Server(args) => server::run(config, args.address).await?,
        Commands::Reclaim => reclaim(config).await?,
        Commands::Inspect(args) => inspect(config, &args.handle)?,
    }

    Ok(())
}

async fn reclaim(config: Config) -> Result<(), AnyError> {
    let stores = Stores::open(&config)?;
    let state = AppState::from_stores(config, &stores);

    let cancel = CancellationToken::new();
    tokio::spawn(server::cancel_on_signal(cancel.clone()));

    let stats = state.reclaimer().run_cycle(&cancel).await?;
    stores.ledger.persist()?;

    println!(
        "scanned={} reclaimed={} already_absent={} shared_retained={} failed={} inconsistent={}{}",
        stats.scanned,
        stats.reclaimed,
        stats.already_absent,
        stats.shared_retained,
        stats.failed,
        stats.inconsistent,
        if stats.interrupted { " (interrupted)" } else { "" },
    );
    Ok(())
}

fn inspect(config: Config, handle: &str) -> Result<(), AnyError> {
    let id = hako::api::parse_handle(handle)?;
    let stores = Stores::open(&config)?;
    let record = stores.ledger.get(id)?;
    println!("{}", serde_json::to_string_pretty(&record)?);
    Ok(())
}
