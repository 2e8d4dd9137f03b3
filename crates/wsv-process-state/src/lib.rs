use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use wsv_common::errors::{ProcessError, ProcessResult};
use wsv_log_collection::OutputLog;

/// Lifecycle state of the supervised worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProcessState {
    /// Nothing has been started yet
    Idle,
    /// Launch requested, waiting for the OS to create the process
    Starting,
    /// Process created or the service is answering health checks
    Running,
    /// A graceful or forceful stop has been requested
    Stopping,
    /// Worker is gone
    Stopped,
    /// The last launch attempt failed
    Error,
}

impl ProcessState {
    pub const ALL: [ProcessState; 6] = [
        ProcessState::Idle,
        ProcessState::Starting,
        ProcessState::Running,
        ProcessState::Stopping,
        ProcessState::Stopped,
        ProcessState::Error,
    ];

    /// States in which the worker counts as running.
    pub fn is_running(&self) -> bool {
        matches!(
            self,
            ProcessState::Starting | ProcessState::Running | ProcessState::Stopping
        )
    }

    /// `Stopped` and `Error` are quiescent; a new start leaves them again.
    pub fn is_quiescent(&self) -> bool {
        matches!(self, ProcessState::Stopped | ProcessState::Error)
    }

    pub fn can_start(&self) -> bool {
        matches!(
            self,
            ProcessState::Idle | ProcessState::Stopped | ProcessState::Error
        )
    }

    /// Check if a transition from this state to `target` is valid
    pub fn is_valid_transition(&self, target: ProcessState) -> bool {
        match (*self, target) {
            (from, ProcessState::Starting) => from.can_start(),

            (ProcessState::Starting, ProcessState::Running) => true,
            (ProcessState::Starting, ProcessState::Error) => true,
            (ProcessState::Starting, ProcessState::Stopping) => true,

            (ProcessState::Running, ProcessState::Stopping) => true,

            // Reconciliation found the service still answering
            (ProcessState::Stopping, ProcessState::Running) => true,

            // Forceful stop and reconciliation may settle from anywhere
            (_, ProcessState::Stopped) => true,

            // Same state (no-op)
            (state, target) if state == target => true,

            _ => false,
        }
    }
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessState::Idle => write!(f, "idle"),
            ProcessState::Starting => write!(f, "starting"),
            ProcessState::Running => write!(f, "running"),
            ProcessState::Stopping => write!(f, "stopping"),
            ProcessState::Stopped => write!(f, "stopped"),
            ProcessState::Error => write!(f, "error"),
        }
    }
}

/// Represents a state transition with timestamp and optional reason
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateTransition {
    pub from_state: ProcessState,
    pub to_state: ProcessState,
    pub timestamp: DateTime<Utc>,
    pub reason: Option<String>,
}

/// Snapshot of everything known about the worker.
///
/// The supervisor owns the only mutable instance; everyone else gets a
/// clone. Every mutator goes through [`ProcessStatus::transition_to`], which
/// keeps `is_running` equal to `state.is_running()`.
#[derive(Debug, Clone)]
pub struct ProcessStatus {
    state: ProcessState,
    is_running: bool,
    process_id: Option<u32>,
    start_time: Option<DateTime<Utc>>,
    final_uptime: Duration,
    last_error: Option<String>,
    output_log: OutputLog,
    last_transition: Option<StateTransition>,
    transition_count: u64,
}

impl ProcessStatus {
    /// Creates an `Idle` record whose output log keeps `log_capacity` lines.
    pub fn new(log_capacity: usize) -> Self {
        Self {
            state: ProcessState::Idle,
            is_running: false,
            process_id: None,
            start_time: None,
            final_uptime: Duration::ZERO,
            last_error: None,
            output_log: OutputLog::with_capacity(log_capacity),
            last_transition: None,
            transition_count: 0,
        }
    }

    pub fn state(&self) -> ProcessState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.is_running
    }

    /// PID of the process the supervisor itself started, while its handle is live.
    pub fn process_id(&self) -> Option<u32> {
        self.process_id
    }

    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        self.start_time
    }

    /// Time since start while running, otherwise the uptime recorded at stop.
    pub fn uptime(&self) -> Duration {
        match (self.is_running, self.start_time) {
            (true, Some(started)) => (Utc::now() - started).to_std().unwrap_or_default(),
            _ => self.final_uptime,
        }
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn output_log(&self) -> &OutputLog {
        &self.output_log
    }

    pub fn last_transition(&self) -> Option<&StateTransition> {
        self.last_transition.as_ref()
    }

    pub fn transition_count(&self) -> u64 {
        self.transition_count
    }

    /// Move to `target`, rejecting edges the state machine does not allow.
    pub fn transition_to(
        &mut self,
        target: ProcessState,
        reason: Option<String>,
    ) -> ProcessResult<()> {
        if !self.state.is_valid_transition(target) {
            return Err(ProcessError::invalid_transition(
                self.state.to_string(),
                target.to_string(),
            ));
        }

        let from = self.state;
        self.state = target;
        self.is_running = target.is_running();
        self.transition_count += 1;
        self.last_transition = Some(StateTransition {
            from_state: from,
            to_state: target,
            timestamp: Utc::now(),
            reason,
        });

        tracing::debug!("Worker transitioned from {} to {}", from, target);
        Ok(())
    }

    /// Fresh record for a new launch attempt: clears the previous run's
    /// identity, error and output, then enters `Starting`.
    pub fn begin_start(&mut self) -> ProcessResult<()> {
        self.transition_to(ProcessState::Starting, Some("start requested".to_string()))?;
        self.process_id = None;
        self.start_time = None;
        self.final_uptime = Duration::ZERO;
        self.last_error = None;
        self.output_log.clear();
        Ok(())
    }

    /// The OS confirmed the process exists.
    pub fn mark_spawned(&mut self, pid: u32, started_at: DateTime<Utc>) -> ProcessResult<()> {
        self.transition_to(ProcessState::Running, Some(format!("spawned pid {}", pid)))?;
        self.process_id = Some(pid);
        self.start_time = Some(started_at);
        Ok(())
    }

    /// Health checks started answering while `Starting`.
    pub fn mark_ready(&mut self) -> ProcessResult<()> {
        self.transition_to(ProcessState::Running, Some("service ready".to_string()))?;
        if self.start_time.is_none() {
            self.start_time = Some(Utc::now());
        }
        Ok(())
    }

    /// The process we started exited but the service still answers.
    pub fn mark_restarted_externally(&mut self) -> ProcessResult<()> {
        self.transition_to(
            ProcessState::Running,
            Some("service outlived its process".to_string()),
        )?;
        self.process_id = None;
        if self.start_time.is_none() {
            self.start_time = Some(Utc::now());
        }
        Ok(())
    }

    pub fn mark_stopping(&mut self, reason: impl Into<String>) -> ProcessResult<()> {
        self.transition_to(ProcessState::Stopping, Some(reason.into()))
    }

    /// Settle in `Stopped`, freezing the uptime of the run that just ended.
    pub fn mark_stopped(&mut self, reason: impl Into<String>) -> ProcessResult<()> {
        let uptime = self.uptime();
        self.transition_to(ProcessState::Stopped, Some(reason.into()))?;
        self.final_uptime = uptime;
        self.process_id = None;
        Ok(())
    }

    pub fn mark_failed(&mut self, error: impl Into<String>) -> ProcessResult<()> {
        let error = error.into();
        self.transition_to(ProcessState::Error, Some(error.clone()))?;
        self.process_id = None;
        self.last_error = Some(error);
        Ok(())
    }

    pub fn record_error(&mut self, error: impl Into<String>) {
        self.last_error = Some(error.into());
    }

    pub fn append_output(&mut self, line: impl Into<String>) {
        self.output_log.push(line);
    }
}

impl Default for ProcessStatus {
    fn default() -> Self {
        Self::new(wsv_log_collection::DEFAULT_OUTPUT_LOG_CAPACITY)
    }
}
