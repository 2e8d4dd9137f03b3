//! Escalating shutdown
//!
//! Drives a running worker to exit through a fixed ladder:
//!
//! | Stage              | Action                      | Window |
//! |--------------------|-----------------------------|--------|
//! | Check              | read status                 | -      |
//! | Graceful           | interrupt                   | 20 s   |
//! | Forceful           | kill the process tree       | 10 s   |
//! | Manual intervention| open the system task manager| 30 s   |
//! | Stuck              | report and give up          | -      |
//!
//! Each window is polled once per tick and every tick is reported to a
//! progress sink. The ladder is not reentrant; callers serialise attempts
//! with a [`ShutdownGate`].

mod gate;

#[cfg(test)]
mod tests;

pub use gate::ShutdownGate;

use crate::config::duration_serde;
use crate::control::WorkerControl;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{error, info, warn};
use wsv_common::ProcessResult;

/// Timing of the shutdown ladder
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ShutdownConfig {
    #[serde(default = "default_graceful_window", with = "duration_serde")]
    pub graceful_window: Duration,
    #[serde(default = "default_forceful_window", with = "duration_serde")]
    pub forceful_window: Duration,
    #[serde(default = "default_manual_window", with = "duration_serde")]
    pub manual_window: Duration,
    #[serde(default = "default_tick", with = "duration_serde")]
    pub tick: Duration,
    /// Go straight to the forceful stage when the interrupt cannot be
    /// delivered, instead of waiting out the graceful window.
    #[serde(default)]
    pub fallback_on_signal_failure: bool,
}

fn default_graceful_window() -> Duration {
    Duration::from_secs(20)
}

fn default_forceful_window() -> Duration {
    Duration::from_secs(10)
}

fn default_manual_window() -> Duration {
    Duration::from_secs(30)
}

fn default_tick() -> Duration {
    Duration::from_secs(1)
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            graceful_window: default_graceful_window(),
            forceful_window: default_forceful_window(),
            manual_window: default_manual_window(),
            tick: default_tick(),
            fallback_on_signal_failure: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ShutdownStage {
    Check,
    Graceful,
    Forceful,
    ManualIntervention,
    Stuck,
}

impl fmt::Display for ShutdownStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ShutdownStage::Check => "check",
            ShutdownStage::Graceful => "graceful",
            ShutdownStage::Forceful => "forceful",
            ShutdownStage::ManualIntervention => "manual intervention",
            ShutdownStage::Stuck => "stuck",
        };
        write!(f, "{}", name)
    }
}

/// One tick of progress, as rendered by a UI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShutdownProgress {
    pub stage: ShutdownStage,
    pub status_text: String,
    pub hint_text: String,
    pub remaining_seconds: u32,
    pub process_id: Option<u32>,
}

impl ShutdownProgress {
    pub fn process_info_text(&self) -> String {
        match self.process_id {
            Some(pid) => format!("target PID: {}", pid),
            None => "target PID: unknown".to_string(),
        }
    }
}

/// Receives progress once per tick.
pub trait ShutdownProgressSink: Send + Sync {
    fn report(&self, progress: &ShutdownProgress);
}

impl<F> ShutdownProgressSink for F
where
    F: Fn(&ShutdownProgress) + Send + Sync,
{
    fn report(&self, progress: &ShutdownProgress) {
        self(progress)
    }
}

/// Something the operator can use to kill the worker by hand.
pub trait ManualInterventionTool: Send + Sync {
    fn open(&self) -> ProcessResult<()>;
}

/// Opens the platform's task manager.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemMonitorTool;

impl ManualInterventionTool for SystemMonitorTool {
    fn open(&self) -> ProcessResult<()> {
        wsv_process::open_system_monitor()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// The worker was gone by the end of `stage`
    ClosedCleanly { stage: ShutdownStage },
    /// The worker exited during the manual-intervention window
    ForcedWithManualHelp,
    /// Every window expired with the worker still running
    Stuck { last_process_id: Option<u32> },
    /// The ladder itself failed; the application should close anyway
    Faulted { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShutdownReport {
    pub outcome: ShutdownOutcome,
    pub elapsed: Duration,
    pub last_process_id: Option<u32>,
}

impl ShutdownReport {
    /// Whether the application may exit now. Only a stuck worker keeps it open.
    pub fn allows_exit(&self) -> bool {
        !matches!(self.outcome, ShutdownOutcome::Stuck { .. })
    }

    pub fn used_manual_help(&self) -> bool {
        self.outcome == ShutdownOutcome::ForcedWithManualHelp
    }
}

/// Runs the escalation ladder against a [`WorkerControl`].
pub struct ShutdownOrchestrator<C: WorkerControl + ?Sized> {
    control: Arc<C>,
    config: ShutdownConfig,
    manual_tool: Arc<dyn ManualInterventionTool>,
}

impl<C: WorkerControl + ?Sized> ShutdownOrchestrator<C> {
    pub fn new(control: Arc<C>, config: ShutdownConfig) -> Self {
        Self {
            control,
            config,
            manual_tool: Arc::new(SystemMonitorTool),
        }
    }

    pub fn with_manual_tool(mut self, tool: Arc<dyn ManualInterventionTool>) -> Self {
        self.manual_tool = tool;
        self
    }

    pub fn config(&self) -> &ShutdownConfig {
        &self.config
    }

    /// Run the ladder to completion.
    ///
    /// Never fails: a panic while driving the ladder is caught and reported
    /// as [`ShutdownOutcome::Faulted`].
    pub async fn run(&self, sink: &dyn ShutdownProgressSink) -> ShutdownReport {
        let started = Instant::now();
        let mut ladder = Ladder {
            control: self.control.as_ref(),
            config: &self.config,
            sink,
            last_pid: None,
        };

        let outcome = match AssertUnwindSafe(ladder.climb(self.manual_tool.as_ref()))
            .catch_unwind()
            .await
        {
            Ok(outcome) => outcome,
            Err(panic) => {
                let reason = panic_reason(panic.as_ref());
                error!(reason = %reason, "Shutdown sequence failed; closing anyway");
                ShutdownOutcome::Faulted { reason }
            }
        };

        let report = ShutdownReport {
            outcome,
            elapsed: started.elapsed(),
            last_process_id: ladder.last_pid,
        };
        info!(
            outcome = ?report.outcome,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "Shutdown sequence finished"
        );
        report
    }
}

struct Ladder<'a, C: WorkerControl + ?Sized> {
    control: &'a C,
    config: &'a ShutdownConfig,
    sink: &'a dyn ShutdownProgressSink,
    last_pid: Option<u32>,
}

impl<'a, C: WorkerControl + ?Sized> Ladder<'a, C> {
    async fn climb(&mut self, manual_tool: &dyn ManualInterventionTool) -> ShutdownOutcome {
        let status = self.control.status();
        self.last_pid = status.process_id();
        self.emit(ShutdownStage::Check, 0);

        if !status.is_running() {
            info!("Worker not running; nothing to stop");
            return ShutdownOutcome::ClosedCleanly {
                stage: ShutdownStage::Check,
            };
        }

        info!(pid = ?self.last_pid, "Requesting graceful worker shutdown");
        let delivered = self.control.request_graceful_stop().await;
        if delivered || !self.config.fallback_on_signal_failure {
            if self
                .count_down(ShutdownStage::Graceful, self.config.graceful_window)
                .await
            {
                return ShutdownOutcome::ClosedCleanly {
                    stage: ShutdownStage::Graceful,
                };
            }
        } else {
            warn!("Interrupt not delivered; escalating immediately");
        }

        warn!(pid = ?self.last_pid, "Worker still running; killing its process tree");
        if !self.control.stop().await {
            warn!("Forceful stop reported failure");
        }
        if self
            .count_down(ShutdownStage::Forceful, self.config.forceful_window)
            .await
        {
            return ShutdownOutcome::ClosedCleanly {
                stage: ShutdownStage::Forceful,
            };
        }

        warn!(pid = ?self.last_pid, "Worker survived a forceful stop; asking the operator for help");
        if let Err(e) = manual_tool.open() {
            warn!(error = %e, "Could not open the system process monitor");
        }
        if self
            .count_down(ShutdownStage::ManualIntervention, self.config.manual_window)
            .await
        {
            return ShutdownOutcome::ForcedWithManualHelp;
        }

        error!(pid = ?self.last_pid, "Worker could not be stopped");
        self.emit(ShutdownStage::Stuck, 0);
        ShutdownOutcome::Stuck {
            last_process_id: self.last_pid,
        }
    }

    /// Poll for exit once per tick until `window` runs out.
    async fn count_down(&mut self, stage: ShutdownStage, window: Duration) -> bool {
        let tick = self.config.tick;
        let mut remaining = window;

        while !remaining.is_zero() {
            self.refresh_pid();
            self.emit(stage, whole_seconds(remaining));

            let step = remaining.min(tick);
            if self.control.wait_for_exit(step).await {
                info!(stage = %stage, "Worker exited");
                return true;
            }
            remaining = remaining.saturating_sub(step);
        }
        false
    }

    fn refresh_pid(&mut self) {
        if let Some(pid) = self.control.status().process_id() {
            self.last_pid = Some(pid);
        }
    }

    fn emit(&self, stage: ShutdownStage, remaining_seconds: u32) {
        let (status_text, hint_text) = describe(stage, remaining_seconds, self.last_pid);
        self.sink.report(&ShutdownProgress {
            stage,
            status_text,
            hint_text,
            remaining_seconds,
            process_id: self.last_pid,
        });
    }
}

fn describe(stage: ShutdownStage, remaining: u32, pid: Option<u32>) -> (String, String) {
    let pid_text = pid.map_or_else(|| "unknown".to_string(), |pid| pid.to_string());
    match stage {
        ShutdownStage::Check => (
            "Checking worker status...".to_string(),
            String::new(),
        ),
        ShutdownStage::Graceful => (
            format!("Waiting for the worker to shut down ({}s)", remaining),
            "A stop request was sent; the worker is finishing its current work.".to_string(),
        ),
        ShutdownStage::Forceful => (
            format!("Force-stopping the worker ({}s)", remaining),
            "The worker ignored the stop request; its process tree is being killed.".to_string(),
        ),
        ShutdownStage::ManualIntervention => (
            format!("Worker is still running ({}s)", remaining),
            format!(
                "The system process monitor was opened; end process {} by hand.",
                pid_text
            ),
        ),
        ShutdownStage::Stuck => (
            "The worker could not be stopped".to_string(),
            format!(
                "End process {} manually, then close the application again.",
                pid_text
            ),
        ),
    }
}

fn whole_seconds(duration: Duration) -> u32 {
    duration.as_secs_f64().ceil() as u32
}

fn panic_reason(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
