//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Validated config → client + node table → authenticator → backup → server
//!
//! Shutdown (shutdown.rs):
//!     Trigger → listener drains, registry watch stops → Exit
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - Ordered startup: config first, then core, then listeners
//! - Ordered shutdown: stop accept, drain, close
//! - Connections still open 30s after shutdown starts are dropped

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::Shutdown;
pub use signals::{shutdown_signal, spawn_signal_handler};
pub use startup::{assemble, build, join_background, Application, BackgroundError, StartupError};
