//! Exit reconciliation
//!
//! The worker may replace itself with a new process while the one we
//! spawned exits. An OS exit is therefore only a hint: after a short grace
//! period a single health probe decides between "restarted internally" and
//! "stopped".

use super::Inner;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Weak};
use tokio::process::Child;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use wsv_log_collection::OutputLine;

/// Owns the child until it exits, then reconciles the status.
pub(super) async fn watch_exit(
    inner: Weak<Inner>,
    mut child: Child,
    exited: watch::Sender<bool>,
    generation: u64,
    cancel: CancellationToken,
) {
    let exit = tokio::select! {
        _ = cancel.cancelled() => {
            debug!("Exit watcher cancelled before the worker exited");
            return;
        }
        exit = child.wait() => exit,
    };

    let description = match &exit {
        Ok(status) => match status.code() {
            Some(code) => format!("exit code {}", code),
            None => status.to_string(),
        },
        Err(e) => format!("unknown exit ({})", e),
    };
    info!(generation, exit = %description, "Worker process exited");
    exited.send_replace(true);

    let Some(strong) = inner.upgrade() else {
        return;
    };
    strong.push_output(OutputLine::supervisor(format!(
        "worker process exited with {}",
        description
    )));
    let grace = strong.settings.reconcile_grace;
    drop(strong);

    tokio::select! {
        _ = cancel.cancelled() => return,
        _ = tokio::time::sleep(grace) => {}
    }

    if let Some(inner) = inner.upgrade() {
        inner.reconcile_exit(generation).await;
    }
}

impl Inner {
    /// Decide what an OS exit meant for the generation that produced it.
    async fn reconcile_exit(self: &Arc<Self>, generation: u64) {
        if self.generation.load(Ordering::SeqCst) != generation {
            debug!(generation, "Ignoring exit of a superseded worker");
            return;
        }

        let endpoint = self.endpoint.read().clone();
        let result = self.probe.probe(&endpoint).await;

        // A newer start may have raced the probe
        if self.generation.load(Ordering::SeqCst) != generation {
            return;
        }

        if result.alive {
            info!(endpoint = %endpoint, "Service still responding after exit; assuming internal restart");
            let state = self.status.read().state();
            if state.is_running() {
                if let Err(e) = self.transition(|s| s.mark_restarted_externally()) {
                    warn!(error = %e, "Failed to record internal restart");
                }
            }
            if self.heartbeat.lock().is_none() {
                // A forceful stop tore the loop down before the kill
                self.start_heartbeat();
            }
            self.rearm_heartbeat(true);
            self.push_output(OutputLine::supervisor(
                "service is still responding; the worker restarted itself",
            ));
        } else {
            info!(
                reason = result.detail.as_deref().unwrap_or("unknown"),
                "Service not responding after exit; worker stopped"
            );
            if let Err(e) = self.transition(|s| s.mark_stopped("worker process exited")) {
                warn!(error = %e, "Failed to record worker stop");
            }
            self.stop_heartbeat();
            self.push_output(OutputLine::supervisor("worker stopped"));
        }
    }
}
