//! Harness for end-to-end supervision tests.
//!
//! Tests launch the `fakeworker` binary through a real [`ProcessSupervisor`]
//! and talk to it over HTTP, exactly as the launcher would.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use wsv_supervisor::{
    PathResolver, ProcessStatus, ProcessSupervisor, ResolvedWorker, SupervisorSettings,
    WorkerConfig,
};

/// Launches `fakeworker <instance> <args...>`.
///
/// The instance directory is unique per test, so lingering-process sweeps
/// only ever match this test's workers.
pub struct FakeWorkerResolver {
    binary: PathBuf,
    instance: PathBuf,
    args: Vec<String>,
}

impl PathResolver for FakeWorkerResolver {
    fn resolve(&self, _root: &Path) -> Option<ResolvedWorker> {
        Some(ResolvedWorker {
            entry_point: Some(self.instance.clone()),
            entry_point_args: self.args.clone(),
            ..ResolvedWorker::executable(&self.binary)
        })
    }
}

pub struct Harness {
    pub supervisor: ProcessSupervisor,
    pub config: WorkerConfig,
    dir: TempDir,
}

impl Harness {
    pub fn new(binary: &str, args: &[&str]) -> Self {
        Self::with_settings(binary, args, fast_settings())
    }

    pub fn with_settings(binary: &str, args: &[&str], settings: SupervisorSettings) -> Self {
        let dir = TempDir::new().expect("temp dir");
        let resolver = FakeWorkerResolver {
            binary: PathBuf::from(binary),
            instance: dir.path().to_path_buf(),
            args: args.iter().map(|a| a.to_string()).collect(),
        };

        let mut config = WorkerConfig::new(dir.path());
        config.network.port = free_port();

        let supervisor = ProcessSupervisor::builder(Arc::new(resolver))
            .settings(settings)
            .build()
            .expect("supervisor");

        Self {
            supervisor,
            config,
            dir,
        }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub async fn start(&self) {
        self.supervisor
            .start(self.root(), &self.config)
            .await
            .expect("worker should start");
    }

    pub async fn wait_for_status<F>(&self, timeout: Duration, condition: F) -> bool
    where
        F: Fn(&ProcessStatus) -> bool,
    {
        wait_until(timeout, || condition(&self.supervisor.status())).await
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.supervisor.dispose();
    }
}

/// Probe quickly so tests finish in seconds.
pub fn fast_settings() -> SupervisorSettings {
    SupervisorSettings {
        health_interval: Duration::from_millis(200),
        health_timeout: Duration::from_millis(200),
        reconcile_grace: Duration::from_secs(1),
        ..SupervisorSettings::default()
    }
}

/// A port nothing is listening on right now.
pub fn free_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .and_then(|listener| listener.local_addr())
        .map(|addr| addr.port())
        .expect("free port")
}

pub async fn wait_until<F: Fn() -> bool>(timeout: Duration, condition: F) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    condition()
}
