//! Server configuration.

use std::net::SocketAddr;
use std::time::Duration;

use crate::error::{ServerError, ServerResult};

/// Default listen port.
pub const DEFAULT_PORT: u16 = 9002;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address the listener binds to.
    pub bind_addr: SocketAddr,

    /// Maximum concurrent sessions; accepting pauses while all are in use.
    pub max_sessions: usize,

    /// How long a new connection may take to send its connect line.
    pub handshake_timeout: Duration,

    /// Period of the idle tick that re-evaluates the barrier.
    pub tick_interval: Duration,

    /// Minimum time between two frame advances, if capped.
    pub min_frame_interval: Option<Duration>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            max_sessions: 64,
            handshake_timeout: Duration::from_secs(10),
            tick_interval: Duration::from_millis(16),
            min_frame_interval: None,
        }
    }
}

impl ServerConfig {
    /// Creates a configuration listening on `bind_addr`.
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            ..Default::default()
        }
    }

    /// Builder: set max sessions.
    pub fn with_max_sessions(mut self, max: usize) -> Self {
        self.max_sessions = max;
        self
    }

    /// Builder: set handshake timeout.
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Builder: set idle tick interval.
    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    /// Builder: cap the advance rate to at most `fps` frames per second.
    pub fn with_frame_rate(mut self, fps: u32) -> Self {
        self.min_frame_interval = (fps > 0).then(|| Duration::from_secs(1) / fps);
        self
    }

    /// Checks the values that cannot be represented by the type alone.
    pub fn validate(&self) -> ServerResult<()> {
        if self.max_sessions == 0 {
            return Err(ServerError::config("max_sessions must be at least 1"));
        }
        if self.tick_interval.is_zero() {
            return Err(ServerError::config("tick_interval must be non-zero"));
        }
        Ok(())
    }
}
