use std::process;

use anyhow::Result;
use clap::Parser;
use eksctl::{Cli, Commands, DeleteCommands, DrainCommands, GetCommands, UpgradeCommands, config};
use tracing::error;
use tracing_log::AsTrace;
use tracing_subscriber::{EnvFilter, fmt};

/// `RUST_LOG` takes precedence over `-v` / `-q`
fn init_tracing(cli: &Cli) -> Result<()> {
  let level = cli.verbose.log_level_filter().as_trace();
  let filter = EnvFilter::builder().with_default_directive(level.into()).from_env_lossy();

  fmt()
    .with_env_filter(filter)
    .with_target(false)
    .with_writer(std::io::stderr)
    .try_init()
    .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {e}"))
}

async fn run(cli: &Cli) -> Result<()> {
  let config = config::load(cli.config_file.as_deref())?;

  match &cli.commands {
    Commands::Get(GetCommands::Cluster(args)) => eksctl::get_cluster(args, &config).await,
    Commands::Delete(DeleteCommands::Cluster(args)) => eksctl::delete_cluster(args, &config).await,
    Commands::Delete(DeleteCommands::Nodegroup(args)) => eksctl::delete_nodegroup(args, &config).await,
    Commands::Upgrade(UpgradeCommands::Cluster(args)) => eksctl::upgrade_cluster(args, &config).await,
    Commands::Upgrade(UpgradeCommands::Nodegroup(args)) => eksctl::upgrade_nodegroup(args, &config).await,
    Commands::Drain(DrainCommands::Nodegroup(args)) => eksctl::drain_nodegroup(args, &config).await,
  }
}

#[tokio::main]
async fn main() -> Result<()> {
  let cli = Cli::parse();
  init_tracing(&cli)?;

  if let Err(err) = run(&cli).await {
    error!("{err:#}");
    process::exit(1);
  }

  Ok(())
}
