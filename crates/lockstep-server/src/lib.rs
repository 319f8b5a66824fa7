//! Frame barrier coordinator.
//!
//! This crate provides the coordinator side of lockstep:
//! - A registry of connected client sessions
//! - The frame barrier that advances once every synchronous client is done
//! - Data message routing, riding along on next-frame broadcasts
//! - A TCP server that drives all of the above from a single task
//!
//! # Example
//!
//! ```rust,no_run
//! use lockstep_server::{ServerConfig, SignalHandler, SyncServer};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let signals = SignalHandler::new();
//!     signals.spawn_listener();
//!
//!     let server = SyncServer::bind(ServerConfig::default()).await?;
//!     server.run_until_shutdown(signals.shutdown().wait()).await?;
//!     Ok(())
//! }
//! ```

mod barrier;
mod config;
mod coordinator;
mod error;
mod handler;
mod registry;
mod signals;
mod socket;

pub use barrier::{Ack, Advance, FIRST_FRAME, FrameBarrier, PendingData};
pub use config::{DEFAULT_PORT, ServerConfig};
pub use coordinator::Coordinator;
pub use error::{ServerError, ServerResult};
pub use registry::{ClientSession, SessionHandle, SessionRegistry};
pub use signals::{ShutdownHandle, ShutdownSignal, SignalHandler};
pub use socket::{Connection, ErrorObserver, SyncServer};
