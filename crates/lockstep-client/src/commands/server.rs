//! Server command: runs the coordinator in the foreground.

use tracing::info;

use lockstep_server::{SignalHandler, SyncServer};

use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};

/// Command-line overrides for the `[server]` section.
#[derive(Debug, Default)]
pub struct ServerOverrides {
    pub bind: Option<String>,
    pub max_sessions: Option<usize>,
    pub frame_rate: Option<u32>,
}

/// Applies `overrides` on top of the file configuration.
pub fn apply_overrides(config: &ClientConfig, overrides: ServerOverrides) -> ClientConfig {
    let mut config = config.clone();
    if let Some(bind) = overrides.bind {
        config.server.bind = bind;
    }
    if let Some(max) = overrides.max_sessions {
        config.server.max_sessions = max;
    }
    if let Some(rate) = overrides.frame_rate {
        config.server.frame_rate = rate;
    }
    config
}

/// Starts the coordinator and blocks until SIGTERM/SIGINT.
pub async fn run(config: &ClientConfig, overrides: ServerOverrides) -> ClientResult<()> {
    let config = apply_overrides(config, overrides);
    let server_config = config.server_config().map_err(ClientError::Config)?;

    let signal_handler = SignalHandler::new();
    signal_handler.spawn_listener();

    let server = SyncServer::bind(server_config).await?;
    info!(addr = %server.local_addr()?, "Coordinator ready");

    server
        .run_until_shutdown(signal_handler.shutdown().wait())
        .await?;

    info!("Coordinator stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overrides_replace_file_values() {
        let config = ClientConfig::default();
        let merged = apply_overrides(
            &config,
            ServerOverrides {
                bind: Some("127.0.0.1:7100".into()),
                max_sessions: None,
                frame_rate: Some(24),
            },
        );

        assert_eq!(merged.server.bind, "127.0.0.1:7100");
        assert_eq!(merged.server.max_sessions, 64);
        assert_eq!(merged.server.frame_rate, 24);
        assert!(merged.server_config().is_ok());
    }
}
