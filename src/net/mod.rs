//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → tls.rs (optional TLS handshake, client certificate capture)
//!     → Hand off to HTTP layer
//! ```
//!
//! # Design Decisions
//! - Plain HTTP is served by `axum::serve`, TLS by `axum-server`
//! - The peer certificate travels as a request extension, not a header

pub mod tls;

pub use tls::{load_tls_config, ClientCertAcceptor, PeerCertificate, TlsError};
