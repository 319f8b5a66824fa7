//! Client configuration.
//!
//! All settings live in a single `config.toml` file at
//! `~/.config/lockstep/config.toml` by default:
//!
//! ```toml
//! debug = false
//!
//! [client]
//! id = 2
//! name = "wall-left"
//! mode = "sync"          # or "async"
//! wants_data = false     # async clients only
//! host = "10.0.0.1"
//! port = 9002
//!
//! [server]
//! bind = "0.0.0.0:9002"
//! max_sessions = 64
//! frame_rate = 60        # 0 leaves advances uncapped
//!
//! [demo]
//! fps = 60
//! message_every = 0
//! ```

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use lockstep_core::{ClientSettings, SyncMode};
use lockstep_server::{DEFAULT_PORT, ServerConfig};

/// Configuration for the lockstep binary.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Debug mode.
    pub debug: bool,

    /// Identity and coordinator address of this client.
    pub client: ClientSection,

    /// Coordinator settings for `lockstep server`.
    pub server: ServerSection,

    /// Simulated render loop for `lockstep client`.
    pub demo: DemoSection,
}

/// Client identity and coordinator address.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientSection {
    /// Numeric client id, unique per coordinator.
    pub id: u32,

    /// Display name; a default is derived from the id when unset.
    pub name: Option<String>,

    /// Whether this client takes part in the frame barrier.
    pub mode: SyncMode,

    /// Async clients only: receive data messages.
    pub wants_data: bool,

    /// Coordinator host.
    pub host: String,

    /// Coordinator port.
    pub port: u16,
}

impl Default for ClientSection {
    fn default() -> Self {
        Self {
            id: 1,
            name: None,
            mode: SyncMode::Sync,
            wants_data: false,
            host: "localhost".to_string(),
            port: DEFAULT_PORT,
        }
    }
}

/// Coordinator settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    /// Listen address.
    pub bind: String,

    /// Maximum concurrent sessions.
    pub max_sessions: usize,

    /// Frame advances per second at most; 0 means uncapped.
    pub frame_rate: u32,

    /// Seconds a new connection has to send its connect line.
    pub handshake_timeout: u64,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind: format!("0.0.0.0:{DEFAULT_PORT}"),
            max_sessions: 64,
            frame_rate: 0,
            handshake_timeout: 10,
        }
    }
}

/// Headless demo settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DemoSection {
    /// Render ticks per second.
    pub fps: u32,

    /// Broadcast the ball position every N frames; 0 disables.
    pub message_every: u64,
}

impl Default for DemoSection {
    fn default() -> Self {
        Self {
            fps: 60,
            message_every: 0,
        }
    }
}

impl ClientConfig {
    /// Loads configuration from the default path.
    pub fn load() -> Result<Self, String> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Loads configuration from a specific path.
    pub fn load_from(path: &Path) -> Result<Self, String> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("failed to read config {}: {}", path.display(), e))?;
        toml::from_str(&content).map_err(|e| format!("failed to parse config: {}", e))
    }

    /// Returns the default configuration file path.
    pub fn default_path() -> PathBuf {
        Self::default_config_dir().join("config.toml")
    }

    /// Returns the default configuration directory.
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("lockstep")
    }

    /// The identity handed to the client runtime.
    pub fn client_settings(&self) -> ClientSettings {
        let c = &self.client;
        let mut settings = ClientSettings::new(c.id, c.host.clone(), c.port);
        if let Some(ref name) = c.name {
            settings = settings.with_name(name.clone());
        }
        if c.mode == SyncMode::Async {
            settings = settings.asynchronous(c.wants_data);
        }
        settings
    }

    /// The coordinator configuration for `lockstep server`.
    pub fn server_config(&self) -> Result<ServerConfig, String> {
        let s = &self.server;
        let bind: SocketAddr = s
            .bind
            .parse()
            .map_err(|e| format!("invalid server.bind {:?}: {}", s.bind, e))?;

        let config = ServerConfig::new(bind)
            .with_max_sessions(s.max_sessions)
            .with_handshake_timeout(Duration::from_secs(s.handshake_timeout))
            .with_frame_rate(s.frame_rate);
        config.validate().map_err(|e| e.to_string())?;
        Ok(config)
    }

    /// Checks every section.
    pub fn validate(&self) -> Result<(), String> {
        if self.client.host.trim().is_empty() {
            return Err("client.host must not be empty".into());
        }
        if self.client.port == 0 {
            return Err("client.port must not be 0".into());
        }
        if self.client.mode == SyncMode::Sync && self.client.wants_data {
            return Err("client.wants_data only applies to async clients".into());
        }
        if self.demo.fps == 0 {
            return Err("demo.fps must be at least 1".into());
        }
        self.server_config()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lockstep_core::ClientId;
    use tempfile::tempdir;

    #[test]
    fn defaults() {
        let config = ClientConfig::default();
        assert!(!config.debug);
        assert_eq!(config.client.id, 1);
        assert_eq!(config.client.port, 9002);
        assert_eq!(config.server.bind, "0.0.0.0:9002");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn default_path_is_under_lockstep() {
        let path = ClientConfig::default_path();
        assert!(path.ends_with("lockstep/config.toml"));
    }

    #[test]
    fn load_from_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
debug = true

[client]
id = 7
mode = "async"
wants_data = true
host = "10.0.0.5"

[server]
frame_rate = 30
"#,
        )
        .unwrap();

        let config = ClientConfig::load_from(&path).unwrap();
        assert!(config.debug);

        let settings = config.client_settings();
        assert_eq!(settings.client_id, ClientId(7));
        assert!(settings.is_async());
        assert!(settings.wants_data);
        assert_eq!(settings.address(), "10.0.0.5:9002");
        assert_eq!(settings.display_name(), "Non-Rendering Client 7");

        let server = config.server_config().unwrap();
        assert_eq!(server.min_frame_interval, Some(Duration::from_secs(1) / 30));
        assert_eq!(server.max_sessions, 64);
    }

    #[test]
    fn load_from_missing_file_fails() {
        let dir = tempdir().unwrap();
        let result = ClientConfig::load_from(&dir.path().join("nope.toml"));
        assert!(result.unwrap_err().contains("failed to read config"));
    }

    #[test]
    fn unknown_mode_is_a_parse_error() {
        let result: Result<ClientConfig, _> = toml::from_str("[client]\nmode = \"lazy\"\n");
        assert!(result.is_err());
    }

    #[test]
    fn named_sync_client() {
        let config: ClientConfig =
            toml::from_str("[client]\nid = 3\nname = \"wall-left\"\n").unwrap();
        let settings = config.client_settings();
        assert!(!settings.is_async());
        assert_eq!(settings.display_name(), "wall-left");
    }

    #[test]
    fn invalid_bind_address() {
        let config: ClientConfig = toml::from_str("[server]\nbind = \"nowhere\"\n").unwrap();
        assert!(config.server_config().unwrap_err().contains("server.bind"));
        assert!(config.validate().is_err());
    }

    #[test]
    fn wants_data_on_sync_client_is_rejected() {
        let config: ClientConfig = toml::from_str("[client]\nwants_data = true\n").unwrap();
        assert!(config.validate().unwrap_err().contains("async"));
    }

    #[test]
    fn dump_round_trips() {
        let mut config = ClientConfig::default();
        config.client.name = Some("projector".into());
        config.demo.message_every = 30;

        let text = toml::to_string_pretty(&config).unwrap();
        let back: ClientConfig = toml::from_str(&text).unwrap();
        assert_eq!(back.client.name.as_deref(), Some("projector"));
        assert_eq!(back.demo.message_every, 30);
    }
}
