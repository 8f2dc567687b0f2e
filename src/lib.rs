//! EventStoreDB cluster proxy library.

// Core subsystems
pub mod config;
pub mod forward;
pub mod http;
pub mod net;

// Credentials and remote execution
pub mod auth;
pub mod backup;
pub mod exec;

// Cross-cutting concerns
pub mod lifecycle;
pub mod observability;

pub use config::schema::ProxyConfig;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
