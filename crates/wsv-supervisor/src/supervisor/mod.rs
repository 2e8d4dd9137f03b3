//! Process supervisor - owns the worker process and its status record
//!
//! The supervisor is the single writer of [`ProcessStatus`]. Every
//! transition is committed and published under the status write lock, so
//! observers see transitions in the order they happened.
//!
//! Two independent signals feed the state:
//! - the OS exit of the process the supervisor spawned
//! - the periodic health probe against the worker's HTTP endpoint
//!
//! An OS exit alone never means "stopped": the worker may have restarted
//! itself under a new process. See [`reconcile`] for how the two are merged.

mod reconcile;


use crate::collaborators::{ArgumentBuilder, DefaultArgumentBuilder, PathResolver, ResolvedWorker};
use crate::config::{SupervisorSettings, WorkerConfig};
use crate::control::WorkerControl;
use crate::events::{EventHub, SupervisorEvent, SupervisorObserver};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use wsv_common::{HealthEndpoint, ProcessError, ProcessResult};
use wsv_log_collection::{
    spawn_line_reader, FileOutputWriter, LineHandler, OutputLine, OutputWriter, StreamType,
};
use wsv_monitoring::{
    HealthProbe, HealthProbeResult, HeartbeatConfig, HeartbeatMonitor, HttpHealthProbe,
    HttpProbeConfig,
};
use wsv_process::{kill_process_tree, InterruptSender, LaunchCommand, PlatformInterrupt};
use wsv_process_state::{ProcessState, ProcessStatus};

const WORKER_ID: &str = "worker";

/// Handle on the process this supervisor spawned.
struct WorkerHandle {
    pid: u32,
    exited: watch::Receiver<bool>,
    exit_task: JoinHandle<()>,
    readers: CancellationToken,
}

impl WorkerHandle {
    fn has_exited(&self) -> bool {
        *self.exited.borrow()
    }
}

pub(crate) struct Inner {
    settings: SupervisorSettings,
    resolver: Arc<dyn PathResolver>,
    arguments: Arc<dyn ArgumentBuilder>,
    probe: Arc<dyn HealthProbe>,
    interrupter: Arc<dyn InterruptSender>,
    output_writer: Option<Arc<dyn OutputWriter>>,
    endpoint: Arc<RwLock<HealthEndpoint>>,
    status: RwLock<ProcessStatus>,
    events: EventHub,
    worker: Mutex<Option<WorkerHandle>>,
    heartbeat: Mutex<Option<HeartbeatMonitor>>,
    last_launch: Mutex<Option<ResolvedWorker>>,
    last_stats: Mutex<Option<String>>,
    generation: AtomicU64,
    start_lock: tokio::sync::Mutex<()>,
    shutdown: CancellationToken,
}

/// Supervises one worker process.
///
/// Cheap to clone; clones share the same worker. The worker handle, the
/// health probe client and the status record are owned here and nowhere
/// else.
#[derive(Clone)]
pub struct ProcessSupervisor {
    inner: Arc<Inner>,
}

/// Builder for [`ProcessSupervisor`]
pub struct SupervisorBuilder {
    resolver: Arc<dyn PathResolver>,
    settings: SupervisorSettings,
    arguments: Option<Arc<dyn ArgumentBuilder>>,
    probe: Option<Arc<dyn HealthProbe>>,
    interrupter: Option<Arc<dyn InterruptSender>>,
    output_writer: Option<Arc<dyn OutputWriter>>,
}

impl SupervisorBuilder {
    pub fn settings(mut self, settings: SupervisorSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn argument_builder(mut self, arguments: Arc<dyn ArgumentBuilder>) -> Self {
        self.arguments = Some(arguments);
        self
    }

    pub fn probe(mut self, probe: Arc<dyn HealthProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    pub fn interrupter(mut self, interrupter: Arc<dyn InterruptSender>) -> Self {
        self.interrupter = Some(interrupter);
        self
    }

    pub fn output_writer(mut self, writer: Arc<dyn OutputWriter>) -> Self {
        self.output_writer = Some(writer);
        self
    }

    /// Fails only if the configured output file cannot be opened.
    pub fn build(self) -> ProcessResult<ProcessSupervisor> {
        let settings = self.settings;

        let output_writer = match (self.output_writer, &settings.output_file) {
            (Some(writer), _) => Some(writer),
            (None, Some(path)) => {
                Some(Arc::new(FileOutputWriter::new(path)?) as Arc<dyn OutputWriter>)
            }
            (None, None) => None,
        };

        let probe = self.probe.unwrap_or_else(|| {
            Arc::new(HttpHealthProbe::new(
                HttpProbeConfig::default().with_timeout(settings.health_timeout),
            )) as Arc<dyn HealthProbe>
        });
        let arguments = self
            .arguments
            .unwrap_or_else(|| Arc::new(DefaultArgumentBuilder) as Arc<dyn ArgumentBuilder>);
        let interrupter = self
            .interrupter
            .unwrap_or_else(|| Arc::new(PlatformInterrupt) as Arc<dyn InterruptSender>);

        let endpoint = HealthEndpoint::default().with_path(&settings.health_path);

        Ok(ProcessSupervisor {
            inner: Arc::new(Inner {
                status: RwLock::new(ProcessStatus::new(settings.output_log_capacity)),
                resolver: self.resolver,
                arguments,
                probe,
                interrupter,
                output_writer,
                endpoint: Arc::new(RwLock::new(endpoint)),
                events: EventHub::new(),
                worker: Mutex::new(None),
                heartbeat: Mutex::new(None),
                last_launch: Mutex::new(None),
                last_stats: Mutex::new(None),
                generation: AtomicU64::new(0),
                start_lock: tokio::sync::Mutex::new(()),
                shutdown: CancellationToken::new(),
                settings,
            }),
        })
    }
}

impl ProcessSupervisor {
    pub fn builder(resolver: Arc<dyn PathResolver>) -> SupervisorBuilder {
        SupervisorBuilder {
            resolver,
            settings: SupervisorSettings::default(),
            arguments: None,
            probe: None,
            interrupter: None,
            output_writer: None,
        }
    }

    /// Points future health checks at `host:port`. Wildcard hosts are
    /// probed on loopback.
    pub fn configure_endpoint(&self, host: &str, port: u16) {
        let endpoint = HealthEndpoint::new(host, port).with_path(&self.inner.settings.health_path);
        debug!(endpoint = %endpoint, "Health endpoint configured");
        *self.inner.endpoint.write() = endpoint;
    }

    pub fn endpoint(&self) -> HealthEndpoint {
        self.inner.endpoint.read().clone()
    }

    /// Launch the worker from `working_dir`.
    ///
    /// Rejected without any state change if a worker is already running or
    /// the executable cannot be resolved. Returns once the OS has created
    /// the process; a spawn failure leaves the status in `Error`.
    pub async fn start(&self, working_dir: &Path, configuration: &WorkerConfig) -> ProcessResult<()> {
        let inner = &self.inner;
        let _guard = inner.start_lock.lock().await;

        if inner.shutdown.is_cancelled() {
            return Err(ProcessError::configuration(WORKER_ID, "supervisor has been disposed"));
        }

        if let Some(pid) = inner.live_pid() {
            warn!(pid, "Start rejected: worker already running");
            return Err(ProcessError::already_running(WORKER_ID, Some(pid)));
        }

        let current = inner.status.read().state();
        if !current.can_start() {
            // Running under a process we did not spawn
            warn!(state = %current, "Start rejected: worker still active");
            return Err(ProcessError::already_running(WORKER_ID, None));
        }

        if working_dir.as_os_str().is_empty() {
            return Err(ProcessError::unresolvable(WORKER_ID, "no working directory given"));
        }

        let Some(resolved) = inner.resolver.resolve(working_dir) else {
            let reason = format!(
                "cannot locate the worker executable or entry point under {}",
                working_dir.display()
            );
            error!("{}", reason);
            inner.push_output(OutputLine::supervisor(format!("cannot start: {}", reason)));
            return Err(ProcessError::unresolvable(WORKER_ID, reason));
        };

        let command = LaunchCommand::new(&resolved.executable)
            .args(resolved.fixed_args())
            .args(inner.arguments.build_arguments(configuration))
            .current_dir(working_dir);
        let command = resolved
            .environment
            .iter()
            .chain(configuration.environment.iter())
            .fold(command, |cmd, (key, value)| cmd.env(key, value));

        self.configure_endpoint(&configuration.network.listen, configuration.network.port);

        inner.transition(|s| s.begin_start())?;
        inner.push_output(OutputLine::supervisor(format!("launch command: {}", command.display())));
        let generation = inner.generation.fetch_add(1, Ordering::SeqCst) + 1;

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                error!(error = %e, "Failed to spawn worker");
                inner.fail_start(&e);
                return Err(e);
            }
        };

        let Some(pid) = child.id() else {
            let e = ProcessError::spawn_failed(WORKER_ID, "process exited before its id was read");
            inner.fail_start(&e);
            return Err(e);
        };

        *inner.last_launch.lock() = Some(resolved);

        let readers = inner.shutdown.child_token();
        let handler = Inner::line_handler(Arc::downgrade(inner));
        if let Some(stdout) = child.stdout.take() {
            spawn_line_reader(stdout, StreamType::Stdout, Arc::clone(&handler), readers.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            spawn_line_reader(stderr, StreamType::Stderr, handler, readers.clone());
        }

        inner.transition(|s| s.mark_spawned(pid, Utc::now()))?;

        let (exit_tx, exit_rx) = watch::channel(false);
        let exit_task = tokio::spawn(reconcile::watch_exit(
            Arc::downgrade(inner),
            child,
            exit_tx,
            generation,
            inner.shutdown.child_token(),
        ));

        let previous = inner.worker.lock().replace(WorkerHandle {
            pid,
            exited: exit_rx,
            exit_task,
            readers,
        });
        if let Some(previous) = previous {
            previous.readers.cancel();
        }

        inner.start_heartbeat();
        info!(pid, "Worker started");
        Ok(())
    }

    /// Ask the worker to shut down by itself. Does not wait.
    ///
    /// Returns `false` if there is no live worker or the interrupt could
    /// not be delivered, in which case the caller should stop forcefully.
    pub async fn request_graceful_stop(&self) -> bool {
        let inner = &self.inner;
        let Some(pid) = inner.live_pid() else {
            debug!("Graceful stop requested with no live worker");
            return false;
        };

        if let Err(e) = inner.transition(|s| s.mark_stopping("graceful stop requested")) {
            warn!(error = %e, "Unexpected state for graceful stop");
        }
        inner.push_output(OutputLine::supervisor(format!(
            "requesting graceful stop of pid {}",
            pid
        )));

        let interrupter = Arc::clone(&inner.interrupter);
        let delivered = tokio::task::spawn_blocking(move || interrupter.try_send_interrupt(pid))
            .await
            .unwrap_or(false);

        if delivered {
            info!(pid, "Interrupt delivered");
        } else {
            warn!(pid, "Interrupt could not be delivered");
            inner.push_output(OutputLine::supervisor(
                "graceful stop signal could not be delivered",
            ));
        }
        delivered
    }

    /// Forcefully terminate the worker's process tree.
    ///
    /// With no live worker this sweeps lingering worker processes from the
    /// last launch, settles in `Stopped`, and returns whether anything was
    /// killed.
    pub async fn stop(&self) -> bool {
        let inner = &self.inner;
        inner.stop_heartbeat();

        let Some(pid) = inner.live_pid() else {
            let killed = self.cleanup_lingering_processes(None).await;
            if let Err(e) = inner.transition(|s| s.mark_stopped("stop requested with no live worker")) {
                warn!(error = %e, "Failed to settle in stopped state");
            }
            return killed > 0;
        };

        if let Err(e) = inner.transition(|s| s.mark_stopping("forceful stop requested")) {
            warn!(error = %e, "Unexpected state for forceful stop");
        }
        inner.push_output(OutputLine::supervisor(format!(
            "killing worker process tree (pid {})",
            pid
        )));

        let result = tokio::task::spawn_blocking(move || kill_process_tree(pid))
            .await
            .unwrap_or_else(|e| Err(ProcessError::kill_failed(pid, e.to_string())));

        match result {
            Ok(()) => {
                info!(pid, "Worker process tree killed");
                true
            }
            Err(e) => {
                error!(pid, error = %e, "Failed to kill worker");
                inner.status.write().record_error(e.to_string());
                false
            }
        }
    }

    /// Wait up to `timeout` for the spawned process to exit.
    pub async fn wait_for_exit(&self, timeout: Duration) -> bool {
        self.wait_for_exit_cancellable(timeout, &CancellationToken::new())
            .await
    }

    /// Like [`wait_for_exit`](Self::wait_for_exit), but also returns when
    /// `cancel` fires. Cancelling only ends the wait.
    pub async fn wait_for_exit_cancellable(&self, timeout: Duration, cancel: &CancellationToken) -> bool {
        let receiver = self
            .inner
            .worker
            .lock()
            .as_ref()
            .map(|handle| handle.exited.clone());

        let Some(mut exited) = receiver else {
            return true;
        };
        if *exited.borrow() || timeout.is_zero() {
            return *exited.borrow();
        }

        tokio::select! {
            _ = cancel.cancelled() => {}
            _ = tokio::time::timeout(timeout, exited.wait_for(|done| *done)) => {}
        }

        let done = *exited.borrow();
        done
    }

    /// Status snapshot; uptime is computed at read time.
    pub fn status(&self) -> ProcessStatus {
        self.inner.status.read().clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SupervisorEvent> {
        self.inner.events.subscribe()
    }

    /// Drive `observer` from its own task until the supervisor is disposed.
    pub fn attach_observer(&self, observer: Arc<dyn SupervisorObserver>) -> JoinHandle<()> {
        self.inner
            .events
            .attach(observer, self.inner.shutdown.clone())
    }

    /// Kill worker processes the supervisor has no handle to.
    ///
    /// With a `root`, the worker is resolved there; otherwise the last
    /// launched worker is used. Returns how many processes were killed.
    pub async fn cleanup_lingering_processes(&self, root: Option<&Path>) -> usize {
        let target = match root {
            Some(root) => self.inner.resolver.resolve(root),
            None => self.inner.last_launch.lock().clone(),
        };
        let Some(target) = target else {
            return 0;
        };

        let matcher = target.matcher();
        let killed = tokio::task::spawn_blocking(move || wsv_process::kill_processes(&matcher))
            .await
            .unwrap_or(0);

        if killed > 0 {
            self.inner.push_output(OutputLine::supervisor(format!(
                "killed {} lingering worker process(es)",
                killed
            )));
        }
        killed
    }

    /// Release timers, readers and the process handle. The worker itself
    /// is left running.
    pub fn dispose(&self) {
        let inner = &self.inner;
        inner.shutdown.cancel();
        inner.stop_heartbeat();
        if let Some(handle) = inner.worker.lock().take() {
            handle.readers.cancel();
            handle.exit_task.abort();
        }
        if let Some(writer) = &inner.output_writer {
            if let Err(e) = writer.flush() {
                warn!(error = %e, "Failed to flush output mirror");
            }
        }
        debug!("Supervisor disposed");
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }
}

#[async_trait]
impl WorkerControl for ProcessSupervisor {
    fn status(&self) -> ProcessStatus {
        ProcessSupervisor::status(self)
    }

    async fn request_graceful_stop(&self) -> bool {
        ProcessSupervisor::request_graceful_stop(self).await
    }

    async fn stop(&self) -> bool {
        ProcessSupervisor::stop(self).await
    }

    async fn wait_for_exit(&self, timeout: Duration) -> bool {
        ProcessSupervisor::wait_for_exit(self, timeout).await
    }
}

impl Inner {
    /// Commit a status change and publish it while still holding the lock.
    fn transition<F>(&self, change: F) -> ProcessResult<ProcessState>
    where
        F: FnOnce(&mut ProcessStatus) -> ProcessResult<()>,
    {
        let mut status = self.status.write();
        change(&mut status)?;
        let state = status.state();
        self.events
            .publish(SupervisorEvent::StatusChanged(status.clone()));
        Ok(state)
    }

    fn push_output(&self, line: OutputLine) {
        if let Some(writer) = &self.output_writer {
            if let Err(e) = writer.write(&line) {
                debug!(error = %e, "Failed to mirror output line");
            }
        }

        let mut status = self.status.write();
        status.append_output(line.text.clone());
        self.events.publish(SupervisorEvent::OutputReceived(line));
    }

    fn line_handler(inner: Weak<Inner>) -> LineHandler {
        Arc::new(move |line| {
            if let Some(inner) = inner.upgrade() {
                inner.push_output(line);
            }
        })
    }

    fn fail_start(&self, error: &ProcessError) {
        if let Err(e) = self.transition(|s| s.mark_failed(error.to_string())) {
            warn!(error = %e, "Failed to record launch failure");
        }
        self.push_output(OutputLine::supervisor(format!("failed to start: {}", error)));
    }

    /// PID of the spawned process while its handle has not reported exit.
    fn live_pid(&self) -> Option<u32> {
        self.worker
            .lock()
            .as_ref()
            .filter(|handle| !handle.has_exited())
            .map(|handle| handle.pid)
    }

    fn start_heartbeat(self: &Arc<Self>) {
        let mut monitor = HeartbeatMonitor::new(
            Arc::clone(&self.probe),
            Arc::clone(&self.endpoint),
            HeartbeatConfig {
                interval: self.settings.health_interval,
                debounce: self.settings.heartbeat_debounce,
            },
        );

        let weak = Arc::downgrade(self);
        monitor.set_edge_callback(move |alive, _result| {
            if let Some(inner) = weak.upgrade() {
                inner.on_heartbeat_edge(alive);
            }
        });

        let weak = Arc::downgrade(self);
        monitor.set_probe_callback(move |result| {
            if let Some(inner) = weak.upgrade() {
                inner.publish_system_stats(result);
            }
        });

        monitor.start(&self.shutdown);
        let previous = self.heartbeat.lock().replace(monitor);
        drop(previous);
    }

    fn stop_heartbeat(&self) {
        let monitor = self.heartbeat.lock().take();
        if let Some(mut monitor) = monitor {
            monitor.stop();
        }
    }

    fn rearm_heartbeat(&self, alive: bool) {
        if let Some(monitor) = self.heartbeat.lock().as_ref() {
            monitor.rearm(alive);
        }
    }

    fn on_heartbeat_edge(&self, alive: bool) {
        self.events
            .publish(SupervisorEvent::HeartbeatStatusChanged(alive));

        let state = self.status.read().state();
        if alive {
            if state == ProcessState::Starting {
                if let Err(e) = self.transition(|s| s.mark_ready()) {
                    warn!(error = %e, "Failed to mark worker ready");
                }
            }
            let endpoint = self.endpoint.read().clone();
            self.push_output(OutputLine::supervisor(format!(
                "service ready at {}",
                endpoint
            )));
        } else if state == ProcessState::Running {
            let adopted = self.status.read().process_id().is_none();
            if adopted && self.live_pid().is_none() {
                // No process of ours is left to report an exit
                info!("Restarted service stopped responding; worker stopped");
                if let Err(e) = self.transition(|s| s.mark_stopped("service stopped responding")) {
                    warn!(error = %e, "Failed to record worker stop");
                }
                self.stop_heartbeat();
                self.push_output(OutputLine::supervisor("service stopped responding; worker stopped"));
            } else {
                self.push_output(OutputLine::supervisor(
                    "service unavailable, it may be restarting",
                ));
            }
        }
    }

    /// Publish the probe body when it differs from the last one seen.
    fn publish_system_stats(&self, result: &HealthProbeResult) {
        let Some(body) = result.body.as_deref().filter(|_| result.alive) else {
            return;
        };

        let rendered = match serde_json::from_str::<serde_json::Value>(body) {
            Ok(value) => serde_json::to_string_pretty(&value).unwrap_or_else(|_| body.to_string()),
            Err(_) => body.to_string(),
        };

        {
            let mut last = self.last_stats.lock();
            if last.as_deref() == Some(rendered.as_str()) {
                return;
            }
            *last = Some(rendered.clone());
        }
        self.events
            .publish(SupervisorEvent::SystemStatsUpdated(rendered));
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
