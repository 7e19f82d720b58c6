use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use embatch::cli::commands::{handle_config, handle_embed, handle_status};
use embatch::cli::{Cli, Commands};
use embatch::models::OutputFormat;

fn init_tracing(verbose: bool) {
    let default = if verbose { "info,embatch=debug" } else { "warn" };
    let filter = EnvFilter::try_from_env("EMBATCH_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    // a missing .env is normal
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let format = cli.format.unwrap_or_default();
    run_command(cli.command, format, cli.verbose).await
}

async fn run_command(command: Commands, format: OutputFormat, verbose: bool) -> Result<()> {
    match command {
        Commands::Embed(args) => {
            handle_embed(args, format, verbose).await?;
        }
        Commands::Status => {
            handle_status(format, verbose).await?;
        }
        Commands::Config(cmd) => {
            handle_config(cmd, format, verbose).await?;
        }
    }

    Ok(())
}
