//! TestMind CLI - AI-assisted test generation and self-healing.

use clap::Parser;

mod cli;

use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .init();

    match cli.command {
        Commands::Init(args) => cli::init_command(&cli.project, args)?,
        Commands::Index(args) => cli::index_command(&cli.project, args).await?,
        Commands::Generate(args) => cli::generate_command(&cli.project, args).await?,
        Commands::Heal(args) => cli::heal_command(&cli.project, args).await?,
        Commands::Stats => cli::stats_command(&cli.project).await?,
    }

    Ok(())
}
