//! Error types for worker supervision.
//!
//! Expected conditions (a dead health endpoint, an undeliverable interrupt)
//! are not errors here; they surface as state transitions or boolean
//! returns. `ProcessError` covers the cases a caller has to act on.

use thiserror::Error;

/// Process-specific error types.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProcessError {
    #[error("Worker already running: {id} (pid {pid:?})")]
    AlreadyRunning { id: String, pid: Option<u32> },

    #[error("Worker cannot be resolved: {id} - {reason}")]
    Unresolvable { id: String, reason: String },

    #[error("Process spawn failed: {id} - {reason}")]
    SpawnFailed { id: String, reason: String },

    #[error("Signal delivery failed: pid {pid} - {reason}")]
    SignalFailed { pid: u32, reason: String },

    #[error("Process kill failed: pid {pid} - {reason}")]
    KillFailed { pid: u32, reason: String },

    #[error("Invalid state transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Process timeout: {id} - {operation}")]
    Timeout { id: String, operation: String },

    #[error("Process configuration error: {id} - {reason}")]
    Configuration { id: String, reason: String },

    #[error("Process I/O error: {id} - {reason}")]
    Io { id: String, reason: String },

    #[error("External tool failed: {tool} - {reason}")]
    ToolFailed { tool: String, reason: String },
}

impl ProcessError {
    pub fn already_running(id: impl Into<String>, pid: Option<u32>) -> Self {
        Self::AlreadyRunning { id: id.into(), pid }
    }

    pub fn unresolvable(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Unresolvable {
            id: id.into(),
            reason: reason.into(),
        }
    }

    pub fn spawn_failed(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::SpawnFailed {
            id: id.into(),
            reason: reason.into(),
        }
    }

    pub fn signal_failed(pid: u32, reason: impl Into<String>) -> Self {
        Self::SignalFailed {
            pid,
            reason: reason.into(),
        }
    }

    pub fn kill_failed(pid: u32, reason: impl Into<String>) -> Self {
        Self::KillFailed {
            pid,
            reason: reason.into(),
        }
    }

    pub fn invalid_transition(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self::InvalidTransition {
            from: from.into(),
            to: to.into(),
        }
    }

    pub fn timeout(id: impl Into<String>, operation: impl Into<String>) -> Self {
        Self::Timeout {
            id: id.into(),
            operation: operation.into(),
        }
    }

    pub fn configuration(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Configuration {
            id: id.into(),
            reason: reason.into(),
        }
    }

    pub fn io(id: impl Into<String>, err: &std::io::Error) -> Self {
        Self::Io {
            id: id.into(),
            reason: err.to_string(),
        }
    }

    pub fn tool_failed(tool: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ToolFailed {
            tool: tool.into(),
            reason: reason.into(),
        }
    }

    /// True for the launch failures that leave the supervisor state untouched.
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::AlreadyRunning { .. } | Self::Unresolvable { .. })
    }
}

/// Result type for process operations.
pub type ProcessResult<T> = std::result::Result<T, ProcessError>;
