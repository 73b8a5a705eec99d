use clap::{Parser, Subcommand};
use std::net::SocketAddr;

#[derive(Parser, Debug)]
#[command(name = "hako")]
#[command(about = "Ephemeral file host", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the HTTP server and the background reclaimer
    Server(ServerArgs),
    /// Run a single reclamation cycle and exit
    Reclaim,
    /// Print the ledger record behind a download handle
    Inspect(InspectArgs),
}

#[derive(clap::Args, Debug)]
pub struct ServerArgs {
    /// Address to bind the HTTP server to (overrides server.bind_addr)
    #[arg(long)]
    pub address: Option<SocketAddr>,
}

#[derive(clap::Args, Debug)]
pub struct InspectArgs {
    /// Handle as returned by an upload, with or without extension
    pub handle: String,
}
