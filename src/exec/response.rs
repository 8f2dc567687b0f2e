//! Terminal status of a remote command.

use serde::{Deserialize, Serialize};

/// Outcome reported on the control channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ExecStatus {
    Success,
    Failure,
    /// No control message arrived, or the status was not recognised.
    #[default]
    #[serde(other)]
    Unknown,
}

impl std::fmt::Display for ExecStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ExecStatus::Success => "Success",
            ExecStatus::Failure => "Failure",
            ExecStatus::Unknown => "Unknown",
        };
        f.write_str(name)
    }
}

/// Parsed control message plus the captured output streams.
///
/// The control message is a Kubernetes `Status` object; fields other than
/// the ones below are ignored.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecResponse {
    #[serde(default)]
    pub status: ExecStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    #[serde(skip)]
    pub std_out: Option<String>,

    #[serde(skip)]
    pub std_err: Option<String>,
}

impl ExecResponse {
    /// Response for a stream that closed without a control message.
    pub fn unknown() -> Self {
        Self::default()
    }

    /// Parse accumulated control channel bytes.
    pub fn from_control(control: &[u8]) -> Result<Self, serde_json::Error> {
        if control.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::unknown());
        }
        serde_json::from_slice(control)
    }

    pub fn is_success(&self) -> bool {
        self.status == ExecStatus::Success
    }

    /// Non-empty stdout lines.
    pub fn stdout_lines(&self) -> impl Iterator<Item = &str> {
        non_empty_lines(self.std_out.as_deref())
    }

    /// Non-empty stderr lines.
    pub fn stderr_lines(&self) -> impl Iterator<Item = &str> {
        non_empty_lines(self.std_err.as_deref())
    }
}

fn non_empty_lines(text: Option<&str>) -> impl Iterator<Item = &str> {
    text.unwrap_or_default()
        .lines()
        .filter(|line| !line.trim().is_empty())
}
