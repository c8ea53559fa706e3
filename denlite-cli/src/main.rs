mod cli;
mod commands;

use clap::Parser;

use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    cli.global.init_logging();

    match cli.command {
        Commands::Up(args) => commands::up::execute(args, &cli.global).await,
        Commands::Down(args) => commands::down::execute(args, &cli.global).await,
    }
}
