//! Core types for output capture

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Stream type (stdout or stderr)
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StreamType {
    Stdout,
    Stderr,
    /// Messages the supervisor writes into the worker log itself.
    Supervisor,
}

impl std::fmt::Display for StreamType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamType::Stdout => write!(f, "stdout"),
            StreamType::Stderr => write!(f, "stderr"),
            StreamType::Supervisor => write!(f, "supervisor"),
        }
    }
}

/// One captured line of worker output.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OutputLine {
    pub timestamp: DateTime<Utc>,
    pub stream: StreamType,
    pub text: String,
}

impl OutputLine {
    pub fn new(stream: StreamType, text: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            stream,
            text: text.into(),
        }
    }

    /// Line for the supervisor's own diagnostics, tagged `[supervisor]`.
    pub fn supervisor(message: impl AsRef<str>) -> Self {
        Self::new(
            StreamType::Supervisor,
            format!("[supervisor] {}", message.as_ref()),
        )
    }
}

impl std::fmt::Display for OutputLine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.text)
    }
}
