mod cli;

use clap::Parser;
use cli::{Cli, Commands};
use seedbox::config::Config;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Server(args) => {
            let mut config = match args.config {
                Some(path) => Config::load_from_path(path)?,
                None => Config::load()?,
            };
            if let Some(address) = args.address {
                config.server.bind_addr = address;
            }

            seedbox::observability::init_tracing(&config.telemetry.log_filter);

            let engine = seedbox::api::build_engine(&config);
            seedbox::api::run(config, engine).await?;
        }
        Commands::Config(args) => {
            let config = match args.config {
                Some(path) => Config::load_from_path(path)?,
                None => Config::load()?,
            };
            print!("{}", config.to_toml()?);
        }
    }

    Ok(())
}
