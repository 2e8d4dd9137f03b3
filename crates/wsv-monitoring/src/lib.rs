//! # WSV Monitoring
//!
//! Health checking for the supervised worker.
//!
//! This crate provides:
//! - The `HealthProbe` seam and its HTTP implementation
//! - `HeartbeatMonitor`, a periodic probe loop that reports only edges
//! - `HeartbeatTracker`, the edge/debounce bookkeeping behind it

pub mod health_monitor;
pub mod http;
pub mod probe;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Health check error types.
///
/// These never leave the probe: they are folded into a dead
/// [`HealthProbeResult`] with the error as its detail.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HealthCheckError {
    #[error("Health check timeout: {url} after {timeout:?}")]
    Timeout { url: String, timeout: Duration },

    #[error("Health check connection failed: {url} - {reason}")]
    ConnectionFailed { url: String, reason: String },

    #[error("Health check invalid response: {url} - {reason}")]
    InvalidResponse { url: String, reason: String },

    #[error("Health check unexpected status: {url} - {status}")]
    UnexpectedStatus { url: String, status: u16 },
}

/// Result type for health check operations.
pub type HealthCheckResult<T> = Result<T, HealthCheckError>;

/// Outcome of one probe. Produced per poll and consumed immediately.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthProbeResult {
    pub alive: bool,
    pub checked_at: DateTime<Utc>,
    pub latency: Option<Duration>,
    pub detail: Option<String>,
    /// Response body of a successful probe.
    pub body: Option<String>,
}

impl HealthProbeResult {
    pub fn alive(latency: Duration, body: Option<String>) -> Self {
        Self {
            alive: true,
            checked_at: Utc::now(),
            latency: Some(latency),
            detail: None,
            body,
        }
    }

    pub fn dead(detail: impl Into<String>, latency: Option<Duration>) -> Self {
        Self {
            alive: false,
            checked_at: Utc::now(),
            latency,
            detail: Some(detail.into()),
            body: None,
        }
    }
}

/// Edge detection over a stream of probe outcomes.
///
/// An edge is reported once `debounce` consecutive probes disagree with the
/// last reported state. With `debounce == 1` every flip is an edge.
#[derive(Debug, Clone)]
pub struct HeartbeatTracker {
    last_known: bool,
    pending: Option<bool>,
    pending_count: u32,
    debounce: u32,
    pub last_check: Option<DateTime<Utc>>,
    pub last_success: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
}

impl HeartbeatTracker {
    /// Starts out assuming the service is down, so the first success is an edge.
    pub fn new(debounce: u32) -> Self {
        Self {
            last_known: false,
            pending: None,
            pending_count: 0,
            debounce: debounce.max(1),
            last_check: None,
            last_success: None,
            consecutive_failures: 0,
            consecutive_successes: 0,
        }
    }

    pub fn last_known(&self) -> bool {
        self.last_known
    }

    /// Records one outcome; returns the new state if this completes an edge.
    pub fn observe(&mut self, alive: bool) -> Option<bool> {
        let now = Utc::now();
        self.last_check = Some(now);
        if alive {
            self.last_success = Some(now);
            self.consecutive_successes += 1;
            self.consecutive_failures = 0;
        } else {
            self.consecutive_failures += 1;
            self.consecutive_successes = 0;
        }

        if alive == self.last_known {
            self.pending = None;
            self.pending_count = 0;
            return None;
        }

        if self.pending == Some(alive) {
            self.pending_count += 1;
        } else {
            self.pending = Some(alive);
            self.pending_count = 1;
        }

        if self.pending_count >= self.debounce {
            self.last_known = alive;
            self.pending = None;
            self.pending_count = 0;
            Some(alive)
        } else {
            None
        }
    }

    /// Overrides the last reported state without reporting an edge.
    pub fn rearm(&mut self, alive: bool) {
        self.last_known = alive;
        self.pending = None;
        self.pending_count = 0;
    }
}

impl Default for HeartbeatTracker {
    fn default() -> Self {
        Self::new(1)
    }
}

pub use health_monitor::{EdgeCallback, HeartbeatConfig, HeartbeatMonitor, ProbeCallback};
pub use http::{HttpHealthProbe, HttpProbeConfig};
pub use probe::HealthProbe;
