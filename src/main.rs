use clap::Parser;
use std::process::ExitCode;

use resilient_gateway::cli::{run_commands, Cli, Commands};
use resilient_gateway::infra;

#[tokio::main]
async fn main() -> ExitCode {
    infra::logging::init();
    let cli = Cli::parse();
    run_commands(cli.command.unwrap_or(Commands::Serve)).await
}
