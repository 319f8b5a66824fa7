//! Client identity as supplied by the configuration collaborator.
//!
//! A rendering process is identified on the wire by a numeric [`ClientId`],
//! a display name, and whether it takes part in the frame barrier
//! ([`SyncMode::Sync`]) or only observes it ([`SyncMode::Async`]).

use std::fmt;
use std::num::ParseIntError;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Numeric identifier of a client, unique within one coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(pub u32);

impl ClientId {
    /// Creates a new client id.
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Returns the raw numeric id.
    pub const fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ClientId {
    type Err = ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(Self)
    }
}

impl From<u32> for ClientId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

/// Whether a client is held in lock-step by the frame barrier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    /// Renders in lock-step with every other synchronous client.
    #[default]
    Sync,
    /// Advances independently; never blocks the barrier.
    Async,
}

impl SyncMode {
    /// Returns true for [`SyncMode::Sync`].
    pub fn is_sync(self) -> bool {
        matches!(self, Self::Sync)
    }
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sync => f.write_str("sync"),
            Self::Async => f.write_str("async"),
        }
    }
}

/// The values a client runtime consumes from its configuration source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientSettings {
    /// Numeric client id.
    pub client_id: ClientId,
    /// Display name; a default is derived from the id when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Sync or async participation.
    #[serde(default)]
    pub mode: SyncMode,
    /// Async clients only: whether to receive data broadcasts.
    #[serde(default)]
    pub wants_data: bool,
    /// Coordinator hostname or address.
    pub host: String,
    /// Coordinator TCP port.
    pub port: u16,
}

impl ClientSettings {
    /// Creates settings for a synchronous client.
    pub fn new(client_id: impl Into<ClientId>, host: impl Into<String>, port: u16) -> Self {
        Self {
            client_id: client_id.into(),
            name: None,
            mode: SyncMode::Sync,
            wants_data: false,
            host: host.into(),
            port,
        }
    }

    /// Builder: set the display name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Builder: make this an async client.
    #[must_use]
    pub fn asynchronous(mut self, wants_data: bool) -> Self {
        self.mode = SyncMode::Async;
        self.wants_data = wants_data;
        self
    }

    /// Returns true when the client does not take part in the barrier.
    pub fn is_async(&self) -> bool {
        self.mode == SyncMode::Async
    }

    /// Returns the configured name, or the conventional default for the mode.
    pub fn display_name(&self) -> String {
        match (&self.name, self.mode) {
            (Some(name), _) => name.clone(),
            (None, SyncMode::Sync) => format!("Rendering Client {}", self.client_id),
            (None, SyncMode::Async) => format!("Non-Rendering Client {}", self.client_id),
        }
    }

    /// Returns `host:port` for connecting.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_id_parse_and_display() {
        let id: ClientId = " 42 ".parse().unwrap();
        assert_eq!(id, ClientId(42));
        assert_eq!(id.to_string(), "42");
        assert!("x".parse::<ClientId>().is_err());
    }

    #[test]
    fn default_names_follow_mode() {
        let sync = ClientSettings::new(3, "localhost", 9002);
        assert_eq!(sync.display_name(), "Rendering Client 3");

        let async_client = ClientSettings::new(4, "localhost", 9002).asynchronous(true);
        assert_eq!(async_client.display_name(), "Non-Rendering Client 4");
        assert!(async_client.wants_data);

        let named = ClientSettings::new(5, "localhost", 9002).with_name("left wall");
        assert_eq!(named.display_name(), "left wall");
    }

    #[test]
    fn address_joins_host_and_port() {
        let settings = ClientSettings::new(1, "10.0.0.2", 9100);
        assert_eq!(settings.address(), "10.0.0.2:9100");
    }
}
