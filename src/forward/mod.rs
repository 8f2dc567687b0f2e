//! Forwarding subsystem.
//!
//! # Data Flow
//! ```text
//! request + ClaimSet
//!     → nodes.rs      (Host → internal node, static table)
//!     → transform.rs  (trust header, credential stripping, X-Forwarded-*)
//!     → forwarder.rs  (reqwest, body streamed both ways)
//!     → transform.rs  (Access-Control-* and hop-by-hop stripped)
//!     → client
//! ```
//!
//! # Design Decisions
//! - The node table is fixed at startup; no discovery
//! - Redirects from nodes are returned to the client, not followed

pub mod forwarder;
pub mod nodes;
pub mod transform;

use axum::http::{header, HeaderMap, Uri};

pub use forwarder::{ForwardError, Forwarder};
pub use nodes::{ClusterNode, NodeTable};
pub use transform::{ForwardedInfo, ForwardingTransform};

/// Host the client addressed, port included.
///
/// HTTP/2 requests carry it in the URI authority instead of `Host`.
pub fn request_host(headers: &HeaderMap, uri: &Uri) -> Option<String> {
    headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .or_else(|| uri.authority().map(|a| a.to_string()))
        .filter(|h| !h.is_empty())
}
