//! Supervisor against a real worker process: health, reconciliation and
//! the shutdown ladder.

#![cfg(unix)]

use e2e_tests::{fast_settings, wait_until, Harness};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use wsv_supervisor::{
    ProcessState, ShutdownConfig, ShutdownOrchestrator, ShutdownOutcome, ShutdownProgress,
    ShutdownStage, SupervisorEvent,
};

const FAKEWORKER: &str = env!("CARGO_BIN_EXE_fakeworker");

fn quick_ladder() -> ShutdownConfig {
    ShutdownConfig {
        graceful_window: Duration::from_secs(2),
        forceful_window: Duration::from_secs(5),
        manual_window: Duration::from_secs(1),
        tick: Duration::from_millis(250),
        fallback_on_signal_failure: false,
    }
}

async fn wait_for_event<F>(
    rx: &mut broadcast::Receiver<SupervisorEvent>,
    timeout: Duration,
    mut wanted: F,
) -> Option<SupervisorEvent>
where
    F: FnMut(&SupervisorEvent) -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        match tokio::time::timeout_at(deadline, rx.recv()).await {
            Ok(Ok(event)) if wanted(&event) => return Some(event),
            Ok(Ok(_)) | Ok(Err(broadcast::error::RecvError::Lagged(_))) => continue,
            _ => return None,
        }
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_worker_comes_up_and_stops_gracefully() {
    let harness = Harness::new(FAKEWORKER, &[]);
    let mut rx = harness.supervisor.subscribe();
    let mut stats_rx = harness.supervisor.subscribe();
    harness.start().await;

    let up = wait_for_event(&mut rx, Duration::from_secs(10), |e| {
        matches!(e, SupervisorEvent::HeartbeatStatusChanged(true))
    })
    .await;
    assert!(up.is_some(), "worker never answered health checks");

    let stats = wait_for_event(&mut stats_rx, Duration::from_secs(5), |e| {
        matches!(e, SupervisorEvent::SystemStatsUpdated(_))
    })
    .await;
    match stats {
        Some(SupervisorEvent::SystemStatsUpdated(text)) => assert!(text.contains("fakeworker")),
        other => panic!("expected system stats, got {:?}", other),
    }

    // Port override reached the worker's command line
    let status = harness.supervisor.status();
    let port = harness.config.network.port.to_string();
    assert!(status
        .output_log()
        .iter()
        .any(|line| line.contains("launch command:") && line.contains(&port)));

    let orchestrator = ShutdownOrchestrator::new(Arc::new(harness.supervisor.clone()), quick_ladder());
    let report = orchestrator.run(&|_: &ShutdownProgress| {}).await;

    assert_eq!(
        report.outcome,
        ShutdownOutcome::ClosedCleanly {
            stage: ShutdownStage::Graceful
        }
    );
    assert!(
        harness
            .wait_for_status(Duration::from_secs(5), |s| s.state() == ProcessState::Stopped)
            .await
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn test_worker_ignoring_interrupt_is_killed() {
    let harness = Harness::new(FAKEWORKER, &["--ignore-interrupt"]);
    let mut rx = harness.supervisor.subscribe();
    harness.start().await;
    assert!(wait_for_event(&mut rx, Duration::from_secs(10), |e| {
        matches!(e, SupervisorEvent::HeartbeatStatusChanged(true))
    })
    .await
    .is_some());

    let orchestrator = ShutdownOrchestrator::new(Arc::new(harness.supervisor.clone()), quick_ladder());
    let report = orchestrator.run(&|_: &ShutdownProgress| {}).await;

    assert_eq!(
        report.outcome,
        ShutdownOutcome::ClosedCleanly {
            stage: ShutdownStage::Forceful
        }
    );
    assert!(report.elapsed >= Duration::from_secs(2));
    assert!(report.last_process_id.is_some());
    assert!(
        wait_until(Duration::from_secs(5), || {
            harness
                .supervisor
                .status()
                .output_log()
                .iter()
                .any(|line| line.contains("Ignoring SIGINT"))
        })
        .await
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn test_internal_restart_keeps_service_running() {
    let harness = Harness::new(FAKEWORKER, &["--restart-after-ms", "800"]);
    let mut rx = harness.supervisor.subscribe();
    harness.start().await;
    let spawned_pid = harness.supervisor.status().process_id();
    assert!(spawned_pid.is_some());

    assert!(wait_for_event(&mut rx, Duration::from_secs(10), |e| {
        matches!(e, SupervisorEvent::HeartbeatStatusChanged(true))
    })
    .await
    .is_some());

    assert!(
        harness
            .wait_for_status(Duration::from_secs(10), |s| {
                s.state() == ProcessState::Running && s.process_id().is_none()
            })
            .await,
        "exit of the original process was not reconciled as a restart"
    );

    // Only the unowned copy is left; stopping sweeps it
    assert!(harness.supervisor.stop().await);
    assert_eq!(harness.supervisor.status().state(), ProcessState::Stopped);
    assert_eq!(
        harness
            .supervisor
            .cleanup_lingering_processes(Some(harness.root()))
            .await,
        0
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn test_worker_exit_reconciles_to_stopped() {
    let harness = Harness::with_settings(
        FAKEWORKER,
        &["--exit-after-ms", "500"],
        wsv_supervisor::SupervisorSettings {
            reconcile_grace: Duration::from_millis(500),
            ..fast_settings()
        },
    );
    harness.start().await;

    assert!(harness.supervisor.wait_for_exit(Duration::from_secs(10)).await);
    assert!(
        harness
            .wait_for_status(Duration::from_secs(10), |s| s.state() == ProcessState::Stopped)
            .await
    );

    let status = harness.supervisor.status();
    assert!(!status.is_running());
    assert!(status.process_id().is_none());
    assert!(status.uptime() >= Duration::from_millis(400));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_shutdown_of_stopped_worker_is_immediate() {
    let harness = Harness::new(FAKEWORKER, &["--exit-after-ms", "100"]);
    harness.start().await;
    assert!(
        harness
            .wait_for_status(Duration::from_secs(10), |s| s.state() == ProcessState::Stopped)
            .await
    );

    let orchestrator = ShutdownOrchestrator::new(Arc::new(harness.supervisor.clone()), quick_ladder());
    let report = orchestrator.run(&|_: &ShutdownProgress| {}).await;
    assert_eq!(
        report.outcome,
        ShutdownOutcome::ClosedCleanly {
            stage: ShutdownStage::Check
        }
    );
}
