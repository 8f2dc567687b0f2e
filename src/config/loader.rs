//! Configuration loading from disk and environment.

use std::fs;
use std::path::Path;

use crate::config::schema::{AuthMode, NodeConfig, ProxyConfig};
use crate::config::validation::{validate_config, ValidationError};

/// Prefix of environment variables that override file settings.
pub const ENV_PREFIX: &str = "PROXY_";

/// Error type for configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
    Env { key: String, reason: String },
    Validation(Vec<ValidationError>),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "IO error: {}", e),
            ConfigError::Parse(e) => write!(f, "Parse error: {}", e),
            ConfigError::Env { key, reason } => {
                write!(f, "Invalid environment override {}{}: {}", ENV_PREFIX, key, reason)
            }
            ConfigError::Validation(errors) => {
                write!(f, "Validation failed: ")?;
                for (i, err) in errors.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", err)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Load configuration from an optional TOML file, apply `PROXY_*`
/// environment overrides and validate the result.
pub fn load_config(path: Option<&Path>) -> Result<ProxyConfig, ConfigError> {
    let mut config = match path {
        Some(path) => parse_file(path)?,
        None => ProxyConfig::default(),
    };

    apply_overrides(&mut config, |key| std::env::var(format!("{ENV_PREFIX}{key}")).ok())?;

    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

fn parse_file(path: &Path) -> Result<ProxyConfig, ConfigError> {
    let content = fs::read_to_string(path).map_err(ConfigError::Io)?;
    toml::from_str(&content).map_err(ConfigError::Parse)
}

/// Apply overrides from `lookup`, keyed without the `PROXY_` prefix.
///
/// `NODES` takes a comma separated list of `public=internal` pairs and
/// replaces the whole node table.
pub fn apply_overrides<F>(config: &mut ProxyConfig, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(bind) = lookup("BIND_ADDRESS") {
        config.listener.bind_address = bind;
    }

    if let Some(nodes) = lookup("NODES") {
        config.cluster.nodes = parse_nodes(&nodes)?;
    }

    if let Some(mode) = lookup("AUTH_MODE") {
        config.auth.mode = match mode.to_ascii_lowercase().as_str() {
            "none" => AuthMode::None,
            "certificate" => AuthMode::Certificate,
            "basic" => AuthMode::Basic,
            "users" => AuthMode::Users,
            other => {
                return Err(ConfigError::Env {
                    key: "AUTH_MODE".into(),
                    reason: format!("unknown mode '{}'", other),
                })
            }
        };
    }

    if let Some(namespace) = lookup("CERTIFICATES_NAMESPACE") {
        config.auth.certificates.namespace = namespace;
    }
    if let Some(secret) = lookup("CERTIFICATES_SECRET") {
        config.auth.certificates.secret_name = secret;
    }
    if let Some(dir) = lookup("BACKUP_DATA_DIRECTORY") {
        config.backup.data_directory = dir;
    }
    if let Some(dir) = lookup("BACKUP_TEMP_DIRECTORY") {
        config.backup.temp_directory = dir;
    }
    if let Some(verify) = lookup("VERIFY_TLS") {
        config.cluster.verify_tls = verify.parse().map_err(|_| ConfigError::Env {
            key: "VERIFY_TLS".into(),
            reason: format!("expected true or false, got '{}'", verify),
        })?;
    }

    Ok(())
}

fn parse_nodes(value: &str) -> Result<Vec<NodeConfig>, ConfigError> {
    value
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let (public, internal) = entry.split_once('=').ok_or_else(|| ConfigError::Env {
                key: "NODES".into(),
                reason: format!("expected public=internal, got '{}'", entry),
            })?;
            Ok(NodeConfig {
                public_host: public.trim().to_string(),
                internal_host: internal.trim().to_string(),
            })
        })
        .collect()
}
