//! # WSV Supervisor
//!
//! Supervises a single long-running worker process:
//! - launches it through pluggable path resolution and argument building
//! - merges OS exit notifications with HTTP health checks into one status
//! - captures its output into a bounded log and notifies observers
//! - shuts it down through an escalating, time-boxed ladder
//!
//! ```no_run
//! use std::sync::Arc;
//! use wsv_supervisor::{
//!     LaunchConfig, ProcessSupervisor, ScriptPathResolver, ShutdownConfig,
//!     ShutdownOrchestrator, ShutdownProgress, WorkerConfig,
//! };
//!
//! # async fn run() -> anyhow::Result<()> {
//! let worker = WorkerConfig::new("/opt/worker");
//! let resolver = Arc::new(ScriptPathResolver::new(LaunchConfig::default()));
//! let supervisor = ProcessSupervisor::builder(resolver).build()?;
//!
//! supervisor.start(&worker.root_directory, &worker).await?;
//!
//! let orchestrator = ShutdownOrchestrator::new(Arc::new(supervisor), ShutdownConfig::default());
//! let report = orchestrator
//!     .run(&|p: &ShutdownProgress| println!("{} ({})", p.status_text, p.remaining_seconds))
//!     .await;
//! assert!(report.allows_exit());
//! # Ok(())
//! # }
//! ```

pub mod collaborators;
pub mod config;
pub mod control;
pub mod events;
pub mod shutdown;
pub mod supervisor;

pub use collaborators::{
    ArgumentBuilder, DefaultArgumentBuilder, PathResolver, ResolvedWorker, ScriptPathResolver,
};
pub use config::{
    LaunchConfig, LauncherConfig, NetworkConfig, SupervisorSettings, WorkerConfig,
};
pub use control::WorkerControl;
pub use events::{SupervisorEvent, SupervisorObserver};
pub use shutdown::{
    ManualInterventionTool, ShutdownConfig, ShutdownGate, ShutdownOrchestrator, ShutdownOutcome,
    ShutdownProgress, ShutdownProgressSink, ShutdownReport, ShutdownStage, SystemMonitorTool,
};
pub use supervisor::{ProcessSupervisor, SupervisorBuilder};

pub use wsv_common::{HealthEndpoint, ProcessError, ProcessResult};
pub use wsv_log_collection::{OutputLine, StreamType};
pub use wsv_process_state::{ProcessState, ProcessStatus};
