use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use wsv_supervisor::{
    LauncherConfig, OutputLine, ProcessState, ProcessStatus, ProcessSupervisor,
    ScriptPathResolver, ShutdownConfig, ShutdownGate, ShutdownOrchestrator, ShutdownOutcome,
    ShutdownProgress, ShutdownProgressSink, ShutdownReport, StreamType, SupervisorEvent,
    SupervisorObserver, SupervisorSettings, WorkerConfig,
};

/// WSV Launcher - starts a worker service and keeps an eye on it
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path (YAML)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Worker root directory (overrides config)
    #[arg(short, long, value_name = "DIR")]
    root: Option<PathBuf>,

    /// Port the worker listens on (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();
    let config = load_config(&args)?;

    initialize_logging(if args.debug { "debug" } else { config.log_level.as_str() });

    info!("Starting WSV launcher");
    info!(root = %config.worker.root_directory.display(), "Worker root");

    let resolver = Arc::new(ScriptPathResolver::new(config.worker.launch.clone()));
    let supervisor = ProcessSupervisor::builder(resolver)
        .settings(config.supervisor.clone())
        .build()
        .context("Failed to create supervisor")?;
    supervisor.attach_observer(Arc::new(ConsoleObserver));

    if let Err(e) = supervisor
        .start(&config.worker.root_directory, &config.worker)
        .await
    {
        error!("Failed to start worker: {}", e);
        supervisor.dispose();
        return Ok(ExitCode::FAILURE);
    }

    tokio::select! {
        signal = wait_for_signal() => info!("Received {}", signal?),
        _ = worker_settled(&supervisor) => info!("Worker is no longer running"),
    }

    let gate = ShutdownGate::new();
    let report = run_shutdown(&supervisor, config.shutdown.clone(), &gate).await?;

    let code = if gate.finish(&report) {
        finish_clean(&supervisor, &report).await
    } else {
        wait_for_operator(&supervisor, &gate, &report).await?
    };

    supervisor.dispose();
    info!("Launcher exiting");
    Ok(code)
}

fn load_config(args: &Args) -> Result<LauncherConfig> {
    let mut config = match (&args.config, &args.root) {
        (Some(path), _) => LauncherConfig::load_from_file(path)?,
        (None, Some(root)) => LauncherConfig {
            log_level: "info".to_string(),
            worker: WorkerConfig::new(root),
            supervisor: SupervisorSettings::default(),
            shutdown: ShutdownConfig::default(),
        },
        (None, None) => anyhow::bail!("Either --config or --root is required"),
    };

    if let Some(root) = &args.root {
        config.worker.root_directory = root.clone();
    }
    if let Some(port) = args.port {
        config.worker.network.port = port;
    }

    config.validate()?;
    Ok(config)
}

fn initialize_logging(level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level)),
        )
        .with_target(false)
        .init();
}

/// Runs the ladder while absorbing repeated close requests.
async fn run_shutdown(
    supervisor: &ProcessSupervisor,
    config: ShutdownConfig,
    gate: &ShutdownGate,
) -> Result<ShutdownReport> {
    if !gate.try_begin() {
        anyhow::bail!("Shutdown already in progress");
    }

    let orchestrator = ShutdownOrchestrator::new(Arc::new(supervisor.clone()), config);
    let sink = ConsoleProgress;
    let ladder = orchestrator.run(&sink);
    tokio::pin!(ladder);

    loop {
        tokio::select! {
            report = &mut ladder => return Ok(report),
            signal = wait_for_signal() => {
                if !gate.try_begin() {
                    warn!("Received {} while shutting down; still waiting for the worker", signal?);
                }
            }
        }
    }
}

async fn finish_clean(supervisor: &ProcessSupervisor, report: &ShutdownReport) -> ExitCode {
    let killed = supervisor.cleanup_lingering_processes(None).await;
    if killed > 0 {
        info!(killed, "Removed lingering worker processes");
    }

    match &report.outcome {
        ShutdownOutcome::Faulted { reason } => {
            error!("Shutdown did not complete cleanly: {}", reason);
            ExitCode::FAILURE
        }
        outcome => {
            info!(?outcome, elapsed = ?report.elapsed, "Worker shut down");
            ExitCode::SUCCESS
        }
    }
}

/// The worker is stuck: stay open until it goes away or the operator
/// insists on leaving.
async fn wait_for_operator(
    supervisor: &ProcessSupervisor,
    gate: &ShutdownGate,
    report: &ShutdownReport,
) -> Result<ExitCode> {
    let pid = report
        .last_process_id
        .map_or_else(|| "unknown".to_string(), |pid| pid.to_string());
    error!(
        "Worker (PID {}) is still running. End it manually, or press Ctrl+C again to exit anyway.",
        pid
    );

    tokio::select! {
        signal = wait_for_signal() => {
            warn!("Received {}; exiting with the worker still running", signal?);
            gate.force_allow();
            Ok(ExitCode::from(2))
        }
        _ = async {
            while !supervisor.wait_for_exit(Duration::from_secs(1)).await {}
        } => {
            info!("Worker exited");
            Ok(finish_clean(supervisor, report).await)
        }
    }
}

/// Resolves once the worker settles in a quiescent state on its own.
async fn worker_settled(supervisor: &ProcessSupervisor) {
    let mut events = supervisor.subscribe();
    if supervisor.status().state().is_quiescent() {
        return;
    }
    loop {
        match events.recv().await {
            Ok(SupervisorEvent::StatusChanged(status)) if status.state().is_quiescent() => return,
            Ok(_) => {}
            Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {
                if supervisor.status().state().is_quiescent() {
                    return;
                }
            }
            Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
        }
    }
}

async fn wait_for_signal() -> Result<&'static str> {
    use tokio::signal;

    #[cfg(unix)]
    {
        let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())
            .context("Failed to create SIGTERM handler")?;
        let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())
            .context("Failed to create SIGINT handler")?;

        tokio::select! {
            _ = sigterm.recv() => Ok("SIGTERM"),
            _ = sigint.recv() => Ok("SIGINT"),
        }
    }

    #[cfg(windows)]
    {
        signal::ctrl_c()
            .await
            .context("Failed to listen for Ctrl+C")?;
        Ok("Ctrl+C")
    }
}

/// Mirrors worker activity into the launcher's log.
struct ConsoleObserver;

impl SupervisorObserver for ConsoleObserver {
    fn on_status_changed(&self, status: &ProcessStatus) {
        match status.state() {
            ProcessState::Error => error!(
                error = status.last_error().unwrap_or("unknown"),
                "Worker failed"
            ),
            state => info!(%state, pid = ?status.process_id(), "Worker status changed"),
        }
    }

    fn on_output(&self, line: &OutputLine) {
        match line.stream {
            StreamType::Stderr => info!("[worker:err] {}", line.text),
            StreamType::Stdout => info!("[worker] {}", line.text),
            StreamType::Supervisor => info!("{}", line.text),
        }
    }

    fn on_heartbeat_changed(&self, alive: bool) {
        if alive {
            info!("Worker service is up");
        } else {
            warn!("Worker service is not responding");
        }
    }

    fn on_system_stats(&self, stats: &str) {
        debug!("Worker system stats:\n{}", stats);
    }
}

struct ConsoleProgress;

impl ShutdownProgressSink for ConsoleProgress {
    fn report(&self, progress: &ShutdownProgress) {
        if progress.hint_text.is_empty() {
            info!("{} [{}]", progress.status_text, progress.process_info_text());
        } else {
            info!(
                "{} - {} [{}]",
                progress.status_text,
                progress.hint_text,
                progress.process_info_text()
            );
        }
    }
}
