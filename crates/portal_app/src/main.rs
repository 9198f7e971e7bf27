mod cli;
mod commands;
mod config;
mod persistence;

use clap::Parser;
use portal_logging::portal_info;

use cli::{Cli, Command};
use commands::{init_config, Session};
use config::PortalConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    portal_logging::initialize(cli.log.into(), cli.log_level());
    portal_info!("portal {} starting", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Command::Init {
            repo,
            dataset,
            base_url,
            force,
        } => init_config(&cli.config, repo, dataset, base_url, force),
        command => {
            let config = PortalConfig::load(&cli.config)?;
            Session::new(config, cli.config)?.run(command).await
        }
    }
}
