//! Command-line interface definition.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::Level;

use lockstep_core::{TracingConfig, TracingOutputFormat};

/// lockstep - frame-locked rendering across machines
#[derive(Debug, Parser)]
#[command(name = "lockstep")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(long, short, env = "LOCKSTEP_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Enable debug output
    #[arg(long, short = 'v', global = true)]
    pub debug: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    /// Picks the log setup for this invocation.
    ///
    /// `--debug` (or `debug = true` in the config file) wins; otherwise the
    /// server logs as a coordinator and the demo client only warns.
    pub fn tracing_config(&self, config_debug: bool) -> TracingConfig {
        let config = if self.debug || config_debug {
            TracingConfig::cli_debug()
        } else if matches!(self.command, Command::Server { .. }) {
            TracingConfig::coordinator()
        } else {
            TracingConfig::default().with_level(Level::WARN)
        };
        if self.json_logs {
            config.with_format(TracingOutputFormat::Json)
        } else {
            config
        }
    }
}

/// Available commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the frame barrier coordinator in the foreground
    Server {
        /// Listen address, overriding server.bind
        #[arg(long)]
        bind: Option<String>,

        /// Maximum concurrent sessions, overriding server.max_sessions
        #[arg(long)]
        max_sessions: Option<usize>,

        /// Cap frame advances per second (0 = uncapped)
        #[arg(long)]
        frame_rate: Option<u32>,
    },

    /// Run a headless demo client
    Client(ClientArgs),

    /// Configuration commands
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Overrides for the `[client]` and `[demo]` sections.
#[derive(Debug, Default, clap::Args)]
pub struct ClientArgs {
    /// Client id
    #[arg(long)]
    pub id: Option<u32>,

    /// Display name
    #[arg(long)]
    pub name: Option<String>,

    /// Coordinator host
    #[arg(long)]
    pub host: Option<String>,

    /// Coordinator port
    #[arg(long, short)]
    pub port: Option<u16>,

    /// Run as an asynchronous client
    #[arg(long = "async")]
    pub asynchronous: bool,

    /// Asynchronous clients only: receive data messages
    #[arg(long, requires = "asynchronous")]
    pub wants_data: bool,

    /// Render ticks per second
    #[arg(long)]
    pub fps: Option<u32>,

    /// Broadcast the ball position every N frames
    #[arg(long)]
    pub message_every: Option<u64>,

    /// Stop after this many frames
    #[arg(long)]
    pub frames: Option<u64>,

    /// Run the network side on a dedicated I/O thread
    #[arg(long)]
    pub io_thread: bool,
}

/// Configuration actions.
#[derive(Debug, Subcommand)]
pub enum ConfigAction {
    /// Dump current configuration
    Dump,

    /// Validate configuration
    Validate,

    /// Show configuration file path
    Path,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_client_overrides() {
        let cli = Cli::try_parse_from([
            "lockstep", "client", "--id", "3", "--async", "--wants-data", "--frames", "10",
        ])
        .unwrap();

        let Command::Client(args) = cli.command else {
            panic!("expected client command");
        };
        assert_eq!(args.id, Some(3));
        assert!(args.asynchronous);
        assert!(args.wants_data);
        assert_eq!(args.frames, Some(10));
    }

    #[test]
    fn server_logs_as_coordinator() {
        let cli = Cli::try_parse_from(["lockstep", "server"]).unwrap();
        let config = cli.tracing_config(false);
        assert_eq!(config.output_format, TracingOutputFormat::Json);
        assert!(config.include_span_events);

        let debug = cli.tracing_config(true);
        assert_eq!(debug.default_level, Level::DEBUG);

        let client = Cli::try_parse_from(["lockstep", "client", "--json-logs"]).unwrap();
        let config = client.tracing_config(false);
        assert_eq!(config.default_level, Level::WARN);
        assert_eq!(config.output_format, TracingOutputFormat::Json);
    }

    #[test]
    fn wants_data_requires_async() {
        let result = Cli::try_parse_from(["lockstep", "client", "--wants-data"]);
        assert!(result.is_err());
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["lockstep", "server", "--frame-rate", "30", "-v"]).unwrap();
        assert!(cli.debug);
        assert!(matches!(
            cli.command,
            Command::Server {
                frame_rate: Some(30),
                ..
            }
        ));
    }

    #[test]
    fn verifies_command_definition() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
