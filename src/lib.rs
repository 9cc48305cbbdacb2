#![deny(missing_docs)]
//! Process supervisor and event-routing bus for a fleet of cooperating tool processes.
//!
//! A small set of child processes ("tools") are spawned and supervised over their standard
//! streams. Lines written to a tool's stdout are parsed into [`event::Event`]s and fanned out to
//! every subscribed tool's [`inbox::Inbox`]; stderr is forwarded as plain log lines. Operators
//! drive the fleet through a shared command dispatcher exposed over a loopback socket and/or an
//! interactive console.

use std::env;
use std::io::Write;

pub use log::LevelFilter;

/// Framework configuration loading (`[core]`/`[tool:<name>]` INI file).
pub mod config;
/// One canonical command dispatcher shared by the socket and console frontends.
pub mod control;
/// The mutable state threaded through the main loop and the dispatcher.
pub mod context;
/// The event wire format and the bounded fan-out queue.
pub mod event;
/// Per-tool stdout line framer.
pub mod framer;
/// Per-tool bounded inbox (the "tool queue").
pub mod inbox;
/// The single-threaded supervisor tick.
pub mod mainloop;
/// Process spawning and non-blocking I/O, abstracted over the host OS.
pub mod platform;
/// Named, ordered collection of tools with lifecycle operations.
pub mod registry;
/// The two control-surface frontends: loopback TCP and interactive console.
pub mod server;
/// SIGINT/SIGTERM/SIGHUP handling.
pub mod signals;
/// A tool's static configuration and live lifecycle state.
pub mod tool;

/// The crate result type.
pub type Result<T> = std::result::Result<T, Error>;

/// The crate error type, one variant per kind in the error taxonomy.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Null or out-of-range argument.
    #[error("invalid argument: {0}")]
    InvalidArg(String),
    /// Unknown tool name, missing config file, etc.
    #[error("not found: {0}")]
    NotFound(String),
    /// Duplicate tool registration.
    #[error("already exists: {0}")]
    AlreadyExists(String),
    /// Process spawn or kill failed.
    #[error("process failed: {0}")]
    ProcessFailed(String),
    /// Stream descriptor acquisition failed.
    #[error("pipe failed: {0}")]
    PipeFailed(String),
    /// Malformed event line or config line.
    #[error("parse failed: {0}")]
    ParseFailed(String),
    /// Event bus or inbox (under non-`DropOldest` policies) at capacity.
    #[error("queue full: {0}")]
    QueueFull(String),
    /// A wait operation expired.
    #[error("timed out")]
    Timeout,
    /// Allocation failure (surfaced only at explicit capacity checks; see DESIGN.md).
    #[error("out of memory")]
    Memory,
    /// Read/write/open failed.
    #[error("I/O error: {0}")]
    IO(#[from] std::io::Error),
    /// Subscription cap reached, tool not running, or otherwise unclassified.
    #[error("{0}")]
    Generic(String),
}

impl Error {
    /// Shorthand for [`Error::Generic`].
    pub fn generic<S: std::fmt::Display>(msg: S) -> Self {
        Error::Generic(msg.to_string())
    }
}

/// Returns true if started in production mode (as a systemd unit).
pub fn is_production() -> bool {
    env::var("INVOCATION_ID").map_or(false, |v| !v.is_empty())
}

/// Configures the stdout logger with the given filter. In production mode timestamps are
/// omitted, since the service manager already prefixes log lines with one.
pub fn configure_logger(filter: LevelFilter) {
    let mut builder = env_logger::Builder::new();
    builder.target(env_logger::Target::Stdout);
    builder.filter_level(filter);
    if is_production() {
        builder.format(|buf, record| writeln!(buf, "{} {}", record.level(), record.args()));
    }
    builder.init();
}

/// Re-exports of the types most callers need.
pub mod prelude {
    pub use crate::config::{Config, ToolConfig};
    pub use crate::context::FrameworkContext;
    pub use crate::event::{Event, EventBus};
    pub use crate::inbox::{Inbox, QueuePolicy};
    pub use crate::registry::ToolRegistry;
    pub use crate::tool::{RestartPolicy, Tool, ToolStatus};
    pub use crate::{Error, Result};
}
