//! The stop primitives the shutdown ladder drives.

use async_trait::async_trait;
use std::time::Duration;
use wsv_process_state::ProcessStatus;

/// What the shutdown orchestrator needs from a supervisor.
#[async_trait]
pub trait WorkerControl: Send + Sync {
    /// Current status snapshot.
    fn status(&self) -> ProcessStatus;

    /// Best-effort interrupt; `false` if it could not be delivered.
    async fn request_graceful_stop(&self) -> bool;

    /// Unconditional kill of the worker's process tree.
    async fn stop(&self) -> bool;

    /// Waits up to `timeout` for the worker to exit; never kills.
    async fn wait_for_exit(&self, timeout: Duration) -> bool;
}
