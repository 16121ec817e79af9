use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "seedbox")]
#[command(about = "Seedbox download orchestrator", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the HTTP server and the download orchestrator
    Server(ServerArgs),
    /// Print the effective configuration as TOML
    Config(ConfigArgs),
}

#[derive(clap::Args, Debug)]
pub struct ServerArgs {
    /// Address to bind the HTTP server to (overrides `server.bind_addr`)
    #[arg(long)]
    pub address: Option<SocketAddr>,

    /// Configuration file (overrides `SEEDBOX_CONFIG`)
    #[arg(long)]
    pub config: Option<PathBuf>,
}

#[derive(clap::Args, Debug)]
pub struct ConfigArgs {
    /// Configuration file (overrides `SEEDBOX_CONFIG`)
    #[arg(long)]
    pub config: Option<PathBuf>,
}
