//! lockstep CLI entry point.

use std::process::ExitCode;

use clap::Parser;

use lockstep_client::cli::{Cli, Command, ConfigAction};
use lockstep_client::commands::server::ServerOverrides;
use lockstep_client::config::ClientConfig;
use lockstep_client::error::{ClientError, ClientResult};
use lockstep_core::init_tracing;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Load configuration
    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    // Initialize tracing
    let tracing_config = cli.tracing_config(config.debug);
    if let Err(e) = init_tracing(tracing_config) {
        eprintln!("warning: {}", e);
    }

    // Run the command
    match run(cli, config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn load_config(cli: &Cli) -> ClientResult<ClientConfig> {
    match cli.config {
        Some(ref path) => ClientConfig::load_from(path).map_err(ClientError::Config),
        None => ClientConfig::load().map_err(ClientError::Config),
    }
}

async fn run(cli: Cli, config: ClientConfig) -> ClientResult<()> {
    match cli.command {
        Command::Server {
            bind,
            max_sessions,
            frame_rate,
        } => {
            let overrides = ServerOverrides {
                bind,
                max_sessions,
                frame_rate,
            };
            lockstep_client::commands::server::run(&config, overrides).await
        }
        Command::Client(args) => lockstep_client::commands::client::run(&config, args).await,
        Command::Config { action } => match action {
            ConfigAction::Dump => lockstep_client::commands::config::dump(&config),
            ConfigAction::Validate => lockstep_client::commands::config::validate(&config),
            ConfigAction::Path => lockstep_client::commands::config::path(),
        },
    }
}
