use super::*;
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use wsv_common::ProcessError;
use wsv_process_state::ProcessStatus;

const PID: u32 = 4242;

/// Scripted worker living on the paused tokio clock.
struct MockControl {
    origin: Instant,
    running: bool,
    exit_at: Mutex<Option<Instant>>,
    exit_after_interrupt: Option<Duration>,
    exit_after_stop: Option<Duration>,
    deliver_interrupt: bool,
    panic_on_stop: bool,
    calls: Mutex<Vec<(&'static str, Duration)>>,
}

impl MockControl {
    fn running() -> Self {
        Self {
            origin: Instant::now(),
            running: true,
            exit_at: Mutex::new(None),
            exit_after_interrupt: None,
            exit_after_stop: None,
            deliver_interrupt: true,
            panic_on_stop: false,
            calls: Mutex::new(Vec::new()),
        }
    }

    fn idle() -> Self {
        Self {
            running: false,
            ..Self::running()
        }
    }

    fn exiting_at(self, at: Duration) -> Self {
        *self.exit_at.lock() = Some(self.origin + at);
        self
    }

    fn record(&self, call: &'static str) {
        self.calls.lock().push((call, self.origin.elapsed()));
    }

    fn call_time(&self, call: &str) -> Option<Duration> {
        self.calls
            .lock()
            .iter()
            .find(|(name, _)| *name == call)
            .map(|(_, at)| *at)
    }

    fn has_exited(&self) -> bool {
        !self.running
            || self
                .exit_at
                .lock()
                .map_or(false, |at| Instant::now() >= at)
    }

    fn schedule_exit(&self, after: Option<Duration>) {
        if let Some(after) = after {
            let mut exit_at = self.exit_at.lock();
            let candidate = Instant::now() + after;
            if exit_at.map_or(true, |at| candidate < at) {
                *exit_at = Some(candidate);
            }
        }
    }
}

#[async_trait]
impl WorkerControl for MockControl {
    fn status(&self) -> ProcessStatus {
        let mut status = ProcessStatus::default();
        if self.running {
            status.begin_start().unwrap();
            status.mark_spawned(PID, Utc::now()).unwrap();
            if self.has_exited() {
                status.mark_stopped("exited").unwrap();
            }
        }
        status
    }

    async fn request_graceful_stop(&self) -> bool {
        self.record("graceful");
        if self.deliver_interrupt {
            self.schedule_exit(self.exit_after_interrupt);
        }
        self.deliver_interrupt
    }

    async fn stop(&self) -> bool {
        self.record("stop");
        if self.panic_on_stop {
            panic!("kill exploded");
        }
        self.schedule_exit(self.exit_after_stop);
        true
    }

    async fn wait_for_exit(&self, timeout: Duration) -> bool {
        if self.has_exited() {
            return true;
        }
        let deadline = Instant::now() + timeout;
        let exit_at = *self.exit_at.lock();
        match exit_at {
            Some(at) if at <= deadline => {
                tokio::time::sleep_until(at).await;
                true
            }
            _ => {
                tokio::time::sleep_until(deadline).await;
                false
            }
        }
    }
}

struct MockTool {
    control: Arc<MockControl>,
    fail: bool,
}

impl ManualInterventionTool for MockTool {
    fn open(&self) -> ProcessResult<()> {
        self.control.record("tool");
        if self.fail {
            Err(ProcessError::tool_failed("task manager", "not installed"))
        } else {
            Ok(())
        }
    }
}

#[derive(Default)]
struct Recorder {
    progress: Mutex<Vec<ShutdownProgress>>,
}

impl ShutdownProgressSink for Recorder {
    fn report(&self, progress: &ShutdownProgress) {
        self.progress.lock().push(progress.clone());
    }
}

impl Recorder {
    fn countdown(&self, stage: ShutdownStage) -> Vec<u32> {
        self.progress
            .lock()
            .iter()
            .filter(|p| p.stage == stage)
            .map(|p| p.remaining_seconds)
            .collect()
    }
}

fn orchestrator(control: &Arc<MockControl>) -> ShutdownOrchestrator<MockControl> {
    orchestrator_with(control, ShutdownConfig::default(), false)
}

fn orchestrator_with(
    control: &Arc<MockControl>,
    config: ShutdownConfig,
    tool_fails: bool,
) -> ShutdownOrchestrator<MockControl> {
    ShutdownOrchestrator::new(Arc::clone(control), config).with_manual_tool(Arc::new(MockTool {
        control: Arc::clone(control),
        fail: tool_fails,
    }))
}

fn secs(s: u64) -> Duration {
    Duration::from_secs(s)
}

/// Paused-clock timings land on the tick, give or take timer rounding.
fn assert_near(actual: Option<Duration>, expected: Duration) {
    let actual = actual.expect("event did not happen");
    assert!(
        actual >= expected && actual <= expected + Duration::from_millis(10),
        "expected ~{:?}, got {:?}",
        expected,
        actual
    );
}

#[tokio::test(start_paused = true)]
async fn test_not_running_closes_at_check() {
    let control = Arc::new(MockControl::idle());
    let recorder = Recorder::default();

    let report = orchestrator(&control).run(&recorder).await;

    assert_eq!(
        report.outcome,
        ShutdownOutcome::ClosedCleanly {
            stage: ShutdownStage::Check
        }
    );
    assert_eq!(report.elapsed, Duration::ZERO);
    assert!(control.calls.lock().is_empty());
    assert!(report.allows_exit());
}

#[tokio::test(start_paused = true)]
async fn test_graceful_exit_reports_countdown() {
    let control = Arc::new(MockControl {
        exit_after_interrupt: Some(secs(3)),
        ..MockControl::running()
    });
    let recorder = Recorder::default();

    let report = orchestrator(&control).run(&recorder).await;

    assert_eq!(
        report.outcome,
        ShutdownOutcome::ClosedCleanly {
            stage: ShutdownStage::Graceful
        }
    );
    assert_near(Some(report.elapsed), secs(3));
    assert_eq!(report.last_process_id, Some(PID));
    assert_eq!(recorder.countdown(ShutdownStage::Graceful), vec![20, 19, 18]);
    assert!(control.call_time("stop").is_none());

    let progress = recorder.progress.lock();
    assert_eq!(progress[0].stage, ShutdownStage::Check);
    assert!(progress[1].status_text.contains("20s"));
    assert_eq!(progress[1].process_info_text(), format!("target PID: {}", PID));
}

#[tokio::test(start_paused = true)]
async fn test_ignored_interrupt_closes_during_forceful_stage() {
    let control = Arc::new(MockControl {
        exit_after_stop: Some(secs(5)),
        ..MockControl::running()
    });
    let recorder = Recorder::default();

    let report = orchestrator(&control).run(&recorder).await;

    assert_eq!(
        report.outcome,
        ShutdownOutcome::ClosedCleanly {
            stage: ShutdownStage::Forceful
        }
    );
    assert!(!report.used_manual_help());
    assert_near(Some(report.elapsed), secs(25));
    assert_near(control.call_time("graceful"), Duration::ZERO);
    assert_near(control.call_time("stop"), secs(20));
    assert!(control.call_time("tool").is_none());
    assert_eq!(
        recorder.countdown(ShutdownStage::Graceful),
        (1..=20).rev().collect::<Vec<_>>()
    );
    assert_eq!(recorder.countdown(ShutdownStage::Forceful), vec![10, 9, 8, 7, 6]);
}

#[tokio::test(start_paused = true)]
async fn test_exit_during_manual_window() {
    let control = Arc::new(MockControl::running().exiting_at(secs(33)));
    let recorder = Recorder::default();

    let report = orchestrator(&control).run(&recorder).await;

    assert_eq!(report.outcome, ShutdownOutcome::ForcedWithManualHelp);
    assert!(report.allows_exit());
    assert_near(Some(report.elapsed), secs(33));
    assert_near(control.call_time("tool"), secs(30));
}

#[tokio::test(start_paused = true)]
async fn test_wedged_worker_ends_stuck_with_pid() {
    let control = Arc::new(MockControl::running());
    let recorder = Recorder::default();

    let report = orchestrator(&control).run(&recorder).await;

    assert_eq!(
        report.outcome,
        ShutdownOutcome::Stuck {
            last_process_id: Some(PID)
        }
    );
    assert!(!report.allows_exit());
    assert_near(Some(report.elapsed), secs(60));

    // Each escalation waits out the previous window
    assert_near(control.call_time("graceful"), Duration::ZERO);
    assert_near(control.call_time("stop"), secs(20));
    assert_near(control.call_time("tool"), secs(30));

    let progress = recorder.progress.lock();
    let last = progress.last().unwrap();
    assert_eq!(last.stage, ShutdownStage::Stuck);
    assert_eq!(last.remaining_seconds, 0);
    assert!(last.hint_text.contains(&PID.to_string()));
    assert_eq!(progress.len(), 1 + 20 + 10 + 30 + 1);
}

#[tokio::test(start_paused = true)]
async fn test_undeliverable_interrupt_still_waits_by_default() {
    let control = Arc::new(MockControl {
        deliver_interrupt: false,
        exit_after_stop: Some(secs(1)),
        ..MockControl::running()
    });

    let report = orchestrator(&control).run(&Recorder::default()).await;

    assert_near(control.call_time("stop"), secs(20));
    assert_eq!(
        report.outcome,
        ShutdownOutcome::ClosedCleanly {
            stage: ShutdownStage::Forceful
        }
    );
}

#[tokio::test(start_paused = true)]
async fn test_undeliverable_interrupt_with_fallback_escalates_immediately() {
    let control = Arc::new(MockControl {
        deliver_interrupt: false,
        exit_after_stop: Some(secs(1)),
        ..MockControl::running()
    });
    let config = ShutdownConfig {
        fallback_on_signal_failure: true,
        ..ShutdownConfig::default()
    };
    let recorder = Recorder::default();

    let report = orchestrator_with(&control, config, false)
        .run(&recorder)
        .await;

    assert_near(control.call_time("stop"), Duration::ZERO);
    assert!(recorder.countdown(ShutdownStage::Graceful).is_empty());
    assert_near(Some(report.elapsed), secs(1));
}

#[tokio::test(start_paused = true)]
async fn test_tool_failure_is_not_fatal() {
    let control = Arc::new(MockControl::running().exiting_at(secs(40)));

    let report = orchestrator_with(&control, ShutdownConfig::default(), true)
        .run(&Recorder::default())
        .await;

    assert_near(control.call_time("tool"), secs(30));
    assert_eq!(report.outcome, ShutdownOutcome::ForcedWithManualHelp);
}

#[tokio::test(start_paused = true)]
async fn test_panic_while_stopping_is_faulted() {
    let control = Arc::new(MockControl {
        panic_on_stop: true,
        ..MockControl::running()
    });

    let report = orchestrator(&control).run(&Recorder::default()).await;

    match &report.outcome {
        ShutdownOutcome::Faulted { reason } => assert!(reason.contains("kill exploded")),
        other => panic!("expected fault, got {:?}", other),
    }
    assert!(report.allows_exit());
    assert_eq!(report.last_process_id, Some(PID));
}

#[tokio::test(start_paused = true)]
async fn test_short_windows_round_up_remaining_seconds() {
    let control = Arc::new(MockControl::running());
    let config = ShutdownConfig {
        graceful_window: Duration::from_millis(2500),
        forceful_window: Duration::from_millis(1000),
        manual_window: Duration::from_millis(1000),
        tick: Duration::from_secs(1),
        fallback_on_signal_failure: false,
    };
    let recorder = Recorder::default();

    let report = orchestrator_with(&control, config, false)
        .run(&recorder)
        .await;

    assert_eq!(recorder.countdown(ShutdownStage::Graceful), vec![3, 2, 1]);
    assert_near(Some(report.elapsed), Duration::from_millis(4500));
}

#[test]
fn test_closure_sink() {
    let seen = Mutex::new(Vec::new());
    let sink = |p: &ShutdownProgress| seen.lock().push(p.remaining_seconds);
    let progress = ShutdownProgress {
        stage: ShutdownStage::Graceful,
        status_text: String::new(),
        hint_text: String::new(),
        remaining_seconds: 7,
        process_id: None,
    };
    sink.report(&progress);
    assert_eq!(*seen.lock(), vec![7]);
    assert_eq!(progress.process_info_text(), "target PID: unknown");
}

#[test]
fn test_gate_rejects_reentry() {
    let gate = ShutdownGate::new();
    assert!(gate.try_begin());
    assert!(!gate.try_begin());
    assert!(gate.is_in_progress());

    let stuck = ShutdownReport {
        outcome: ShutdownOutcome::Stuck {
            last_process_id: Some(PID),
        },
        elapsed: secs(60),
        last_process_id: Some(PID),
    };
    assert!(!gate.finish(&stuck));
    assert!(!gate.can_close());
    assert!(!gate.is_in_progress());

    // Retry after being stuck
    assert!(gate.try_begin());
    let clean = ShutdownReport {
        outcome: ShutdownOutcome::ClosedCleanly {
            stage: ShutdownStage::Forceful,
        },
        elapsed: secs(25),
        last_process_id: Some(PID),
    };
    assert!(gate.finish(&clean));
    assert!(gate.can_close());
}

#[test]
fn test_gate_force_allow() {
    let gate = ShutdownGate::new();
    assert!(!gate.can_close());
    gate.force_allow();
    assert!(gate.can_close());
}

#[test]
fn test_config_from_yaml() {
    let config: ShutdownConfig =
        serde_yaml::from_str("graceful_window: 5s\ntick: 500ms\nfallback_on_signal_failure: true\n")
            .unwrap();
    assert_eq!(config.graceful_window, secs(5));
    assert_eq!(config.forceful_window, secs(10));
    assert_eq!(config.manual_window, secs(30));
    assert_eq!(config.tick, Duration::from_millis(500));
    assert!(config.fallback_on_signal_failure);
}
