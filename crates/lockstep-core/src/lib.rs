//! Core types shared by the lockstep coordinator and clients:
//! client identity, the updates-per-second meter, and tracing setup.

pub mod identity;
pub mod rate;
pub mod tracing;

pub use identity::{ClientId, ClientSettings, SyncMode};
pub use rate::{SAMPLE_INTERVAL, UpdateRate};
pub use self::tracing::{TracingConfig, TracingError, TracingOutputFormat, init_tracing};
