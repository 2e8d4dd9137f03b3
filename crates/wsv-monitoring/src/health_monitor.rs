//! Heartbeat monitor: periodic health probing that reports edges.
//!
//! The loop probes the shared endpoint on a fixed interval, hands every
//! result to an optional probe callback, and calls the edge callback only
//! when the alive/dead verdict flips. It is stopped explicitly, on drop, or
//! when its parent cancellation token fires.

use crate::probe::HealthProbe;
use crate::{HealthProbeResult, HeartbeatTracker};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Duration, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use wsv_common::HealthEndpoint;

/// Called with the new verdict whenever it flips.
pub type EdgeCallback = Arc<dyn Fn(bool, &HealthProbeResult) + Send + Sync>;

/// Called with every probe result.
pub type ProbeCallback = Arc<dyn Fn(&HealthProbeResult) + Send + Sync>;

/// Heartbeat configuration
#[derive(Debug, Clone)]
pub struct HeartbeatConfig {
    /// Time between probes; the first probe runs one interval after start
    pub interval: Duration,
    /// Consecutive agreeing probes needed before an edge is reported
    pub debounce: u32,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(3),
            debounce: 1,
        }
    }
}

/// Heartbeat monitor - runs the probe loop in a background task
pub struct HeartbeatMonitor {
    probe: Arc<dyn HealthProbe>,
    endpoint: Arc<RwLock<HealthEndpoint>>,
    config: HeartbeatConfig,
    tracker: Arc<Mutex<HeartbeatTracker>>,
    edge_callback: Option<EdgeCallback>,
    probe_callback: Option<ProbeCallback>,
    cancel_token: Option<CancellationToken>,
    task_handle: Option<JoinHandle<()>>,
}

impl HeartbeatMonitor {
    /// The endpoint is shared so reconfiguration applies to the next probe.
    pub fn new(
        probe: Arc<dyn HealthProbe>,
        endpoint: Arc<RwLock<HealthEndpoint>>,
        config: HeartbeatConfig,
    ) -> Self {
        let tracker = Arc::new(Mutex::new(HeartbeatTracker::new(config.debounce)));
        Self {
            probe,
            endpoint,
            config,
            tracker,
            edge_callback: None,
            probe_callback: None,
            cancel_token: None,
            task_handle: None,
        }
    }

    pub fn set_edge_callback<F>(&mut self, callback: F)
    where
        F: Fn(bool, &HealthProbeResult) + Send + Sync + 'static,
    {
        self.edge_callback = Some(Arc::new(callback));
    }

    pub fn set_probe_callback<F>(&mut self, callback: F)
    where
        F: Fn(&HealthProbeResult) + Send + Sync + 'static,
    {
        self.probe_callback = Some(Arc::new(callback));
    }

    /// Start the background loop as a child of `parent`.
    ///
    /// The verdict starts out "dead", so the first successful probe is
    /// reported as an edge.
    pub fn start(&mut self, parent: &CancellationToken) {
        if self.is_running() {
            warn!("Heartbeat monitor already started");
            return;
        }

        self.tracker.lock().rearm(false);

        let cancel_token = parent.child_token();
        let task = tokio::spawn(Self::run_loop(
            Arc::clone(&self.probe),
            Arc::clone(&self.endpoint),
            self.config.clone(),
            Arc::clone(&self.tracker),
            self.edge_callback.clone(),
            self.probe_callback.clone(),
            cancel_token.clone(),
        ));

        self.cancel_token = Some(cancel_token);
        self.task_handle = Some(task);
        info!(
            interval_ms = self.config.interval.as_millis() as u64,
            endpoint = %self.endpoint.read(),
            "Heartbeat monitor started"
        );
    }

    pub fn stop(&mut self) {
        if let Some(token) = self.cancel_token.take() {
            token.cancel();
        }
        if let Some(task) = self.task_handle.take() {
            task.abort();
            debug!("Heartbeat monitor stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.task_handle
            .as_ref()
            .map_or(false, |task| !task.is_finished())
    }

    /// Last reported verdict.
    pub fn last_known(&self) -> bool {
        self.tracker.lock().last_known()
    }

    /// Overrides the last reported verdict without firing an edge.
    pub fn rearm(&self, alive: bool) {
        self.tracker.lock().rearm(alive);
    }

    async fn run_loop(
        probe: Arc<dyn HealthProbe>,
        endpoint: Arc<RwLock<HealthEndpoint>>,
        config: HeartbeatConfig,
        tracker: Arc<Mutex<HeartbeatTracker>>,
        edge_callback: Option<EdgeCallback>,
        probe_callback: Option<ProbeCallback>,
        cancel_token: CancellationToken,
    ) {
        let mut ticker = interval_at(Instant::now() + config.interval, config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel_token.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let target = endpoint.read().clone();
            let result = tokio::select! {
                _ = cancel_token.cancelled() => break,
                result = probe.probe(&target) => result,
            };

            if let Some(callback) = &probe_callback {
                callback(&result);
            }

            let edge = tracker.lock().observe(result.alive);
            if let Some(alive) = edge {
                if alive {
                    info!(endpoint = %target, "Heartbeat: service is responding");
                } else {
                    warn!(
                        endpoint = %target,
                        reason = result.detail.as_deref().unwrap_or("unknown"),
                        "Heartbeat: service stopped responding"
                    );
                }
                if let Some(callback) = &edge_callback {
                    callback(alive, &result);
                }
            }
        }

        debug!("Heartbeat loop finished");
    }
}

impl Drop for HeartbeatMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}
