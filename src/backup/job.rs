//! Backup job description: paths, naming, headers.

use axum::http::header::{self, HeaderName, HeaderValue};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use thiserror::Error;
use uuid::Uuid;

/// Archive compression requested by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    #[default]
    None,
    Gzip,
    Bzip2,
}

impl Compression {
    /// `tar` flag selecting the compressor.
    pub fn tar_flag(self) -> &'static str {
        match self {
            Compression::None => "",
            Compression::Gzip => "z",
            Compression::Bzip2 => "j",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            Compression::None => "tar",
            Compression::Gzip => "tar.gz",
            Compression::Bzip2 => "tar.bz2",
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            Compression::None => "application/x-tar",
            Compression::Gzip => "application/x-tar+gzip",
            Compression::Bzip2 => "application/x-tar+bzip2",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Compression::None => "none",
            Compression::Gzip => "gzip",
            Compression::Bzip2 => "bzip2",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("path '{0}' is not rooted")]
pub struct PathNotRooted(pub String);

/// Normalize a container path: `\` becomes `/`, the path must be absolute,
/// and one trailing slash is dropped.
pub fn to_unix_directory(path: &str) -> Result<String, PathNotRooted> {
    let unix = path.replace('\\', "/");
    if !unix.starts_with('/') {
        return Err(PathNotRooted(unix));
    }
    Ok(match unix.strip_suffix('/') {
        Some(trimmed) => trimmed.to_string(),
        None => unix,
    })
}

/// Single-quote `value` for `/bin/sh`.
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// One backup run.
#[derive(Debug, Clone)]
pub struct BackupJob {
    pub id: Uuid,
    /// `{temp_root}/{id}`; removed when the run ends.
    pub remote_base_dir: String,
    pub data_directory: String,
    /// Host the request was addressed to.
    pub server_name: String,
    pub timestamp: DateTime<Utc>,
    pub compression: Compression,
}

impl BackupJob {
    pub fn new(
        temp_root: &str,
        data_directory: &str,
        server_name: &str,
        compression: Compression,
    ) -> Result<Self, PathNotRooted> {
        let id = Uuid::new_v4();
        Ok(Self {
            id,
            remote_base_dir: format!("{}/{}", to_unix_directory(temp_root)?, id),
            data_directory: to_unix_directory(data_directory)?,
            server_name: server_name.to_string(),
            timestamp: Utc::now(),
            compression,
        })
    }

    pub fn metadata_dir(&self) -> String {
        format!("{}/metadata", self.remote_base_dir)
    }

    pub fn backup_dir(&self) -> String {
        format!("{}/backup", self.remote_base_dir)
    }

    /// `yyyy-MM-dd_HH:mm:ss`, used for the marker file and the file name.
    pub fn stamp(&self) -> String {
        self.timestamp.format("%Y-%m-%d_%H:%M:%S").to_string()
    }

    pub fn file_name(&self) -> String {
        format!(
            "{}_{}.{}",
            self.server_name,
            self.stamp(),
            self.compression.extension()
        )
    }

    /// Response headers committed before the archive streams.
    pub fn headers(&self) -> Vec<(HeaderName, HeaderValue)> {
        let disposition = format!("attachment; filename=\"{}\"", self.file_name());
        let mut headers = vec![(
            header::CONTENT_TYPE,
            HeaderValue::from_static(self.compression.content_type()),
        )];
        match HeaderValue::from_str(&disposition) {
            Ok(value) => headers.push((header::CONTENT_DISPOSITION, value)),
            Err(_) => tracing::warn!(file = %self.file_name(), "File name is not a valid header value"),
        }
        headers
    }
}
