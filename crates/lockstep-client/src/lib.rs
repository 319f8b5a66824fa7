//! Client session runtime and the `lockstep` command-line interface.
//!
//! [`ClientRuntime`] is the piece a rendering application embeds: it keeps
//! one connection to the coordinator, tells the application which frame to
//! render, and acknowledges frames once they are drawn. The rest of the
//! crate is the `lockstep` binary (coordinator, headless demo client and
//! configuration commands).

pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod io;
pub mod runtime;
mod socket;

pub use cli::Cli;
pub use error::{ClientError, ClientResult};
pub use io::IoThread;
pub use runtime::{ClientRuntime, Phase};
