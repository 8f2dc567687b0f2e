//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP/TLS connection
//!     → server.rs (Axum setup, request ID, tracing, CORS)
//!     → auth middleware (claims attached)
//!     → handlers.rs (proxy-owned routes, catch-all forward)
//!     → error.rs (subsystem errors → status + message)
//!     → Send to client
//! ```

pub mod error;
pub mod handlers;
pub mod server;

pub use error::ApiError;
pub use handlers::{AppState, BackupPolicy};
pub use server::{HttpServer, ServeError};
