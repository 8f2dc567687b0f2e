//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check the node table (no duplicate public hosts, no empty addresses)
//! - Validate value ranges (ttl > 0, buffers large enough, paths rooted)
//! - Check mode combinations (certificate auth needs TLS, admin-only
//!   backups need an auth mode that yields groups)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProxyConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::net::SocketAddr;

use axum::http::HeaderName;
use thiserror::Error;

use crate::backup::job::to_unix_directory;
use crate::config::schema::{AuthMode, ProxyConfig};

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("invalid bind address '{0}'")]
    BindAddress(String),

    #[error("no cluster nodes configured")]
    NoNodes,

    #[error("cluster node {index} has an empty {field}")]
    EmptyNodeField { index: usize, field: &'static str },

    #[error("public host '{0}' is configured more than once")]
    DuplicatePublicHost(String),

    #[error("unsupported backend scheme '{0}'")]
    Scheme(String),

    #[error("invalid trust header name '{0}'")]
    TrustHeader(String),

    #[error("acme handler '{0}' is not an absolute URL")]
    AcmeHandler(String),

    #[error("certificate authentication requires listener TLS")]
    CertificateModeWithoutTls,

    #[error("certificate cache ttl must be greater than zero")]
    CacheTtl,

    #[error("{field} '{path}' is not a rooted path")]
    RelativePath { field: &'static str, path: String },

    #[error("{field} must be at least 2 bytes")]
    BufferTooSmall { field: &'static str },

    #[error("backup enabled but no pods configured")]
    NoBackupPods,

    #[error("backup.require_admin needs group claims, which auth mode '{0}' never provides")]
    AdminGroupUnavailable(AuthMode),
}

/// Validate a parsed configuration.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::BindAddress(
            config.listener.bind_address.clone(),
        ));
    }

    validate_cluster(config, &mut errors);

    if config.auth.mode == AuthMode::Certificate {
        if config.listener.tls.is_none() {
            errors.push(ValidationError::CertificateModeWithoutTls);
        }
        if config.auth.certificates.cache_ttl_secs == 0 {
            errors.push(ValidationError::CacheTtl);
        }
    }

    if config.backup.enabled {
        validate_backup(config, &mut errors);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_cluster(config: &ProxyConfig, errors: &mut Vec<ValidationError>) {
    let cluster = &config.cluster;

    if cluster.nodes.is_empty() {
        errors.push(ValidationError::NoNodes);
    }

    let mut seen = HashSet::new();
    for (index, node) in cluster.nodes.iter().enumerate() {
        let public = trim_slash(&node.public_host);
        if public.is_empty() {
            errors.push(ValidationError::EmptyNodeField {
                index,
                field: "public_host",
            });
        } else if !seen.insert(public.to_ascii_lowercase()) {
            errors.push(ValidationError::DuplicatePublicHost(public.to_string()));
        }
        if trim_slash(&node.internal_host).is_empty() {
            errors.push(ValidationError::EmptyNodeField {
                index,
                field: "internal_host",
            });
        }
    }

    if cluster.scheme != "http" && cluster.scheme != "https" {
        errors.push(ValidationError::Scheme(cluster.scheme.clone()));
    }

    if HeaderName::from_bytes(cluster.trust_header.as_bytes()).is_err() {
        errors.push(ValidationError::TrustHeader(cluster.trust_header.clone()));
    }

    if let Some(acme) = &cluster.acme_handler {
        if url::Url::parse(acme).is_err() {
            errors.push(ValidationError::AcmeHandler(acme.clone()));
        }
    }
}

fn trim_slash(host: &str) -> &str {
    host.strip_suffix('/').unwrap_or(host)
}

fn validate_backup(config: &ProxyConfig, errors: &mut Vec<ValidationError>) {
    let backup = &config.backup;

    if backup.pods.is_empty() {
        errors.push(ValidationError::NoBackupPods);
    }

    if backup.require_admin && matches!(config.auth.mode, AuthMode::None | AuthMode::Basic) {
        errors.push(ValidationError::AdminGroupUnavailable(config.auth.mode));
    }

    for (field, path) in [
        ("backup.data_directory", &backup.data_directory),
        ("backup.temp_directory", &backup.temp_directory),
    ] {
        if to_unix_directory(path).is_err() {
            errors.push(ValidationError::RelativePath {
                field,
                path: path.clone(),
            });
        }
    }

    for (field, size) in [
        ("backup.exec_buffer_bytes", backup.exec_buffer_bytes),
        ("backup.stream_buffer_bytes", backup.stream_buffer_bytes),
    ] {
        if size < 2 {
            errors.push(ValidationError::BufferTooSmall { field });
        }
    }
}
