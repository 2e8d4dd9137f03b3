//! Notifications pushed to observers.
//!
//! Events go out on a broadcast channel in the order the supervisor
//! produced them. Status events are published while the status record is
//! still locked, so every subscriber sees transitions in commit order.

use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use wsv_log_collection::OutputLine;
use wsv_process_state::ProcessStatus;

const EVENT_CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
pub enum SupervisorEvent {
    /// Fired on every state transition with the committed snapshot
    StatusChanged(ProcessStatus),
    /// One captured or supervisor-generated output line
    OutputReceived(OutputLine),
    /// Health verdict flipped
    HeartbeatStatusChanged(bool),
    /// Pretty-printed health response body, when it changed
    SystemStatsUpdated(String),
}

/// Observer interface for status and output sinks.
///
/// Called from a dedicated task, never while supervisor locks are held, so
/// implementations may call back into the supervisor.
pub trait SupervisorObserver: Send + Sync {
    fn on_status_changed(&self, _status: &ProcessStatus) {}

    fn on_output(&self, _line: &OutputLine) {}

    fn on_heartbeat_changed(&self, _alive: bool) {}

    fn on_system_stats(&self, _stats: &str) {}
}

pub(crate) struct EventHub {
    sender: broadcast::Sender<SupervisorEvent>,
}

impl EventHub {
    pub(crate) fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { sender }
    }

    pub(crate) fn publish(&self, event: SupervisorEvent) {
        // No subscribers is fine
        let _ = self.sender.send(event);
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<SupervisorEvent> {
        self.sender.subscribe()
    }

    pub(crate) fn attach(
        &self,
        observer: Arc<dyn SupervisorObserver>,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        let mut receiver = self.subscribe();
        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    _ = shutdown.cancelled() => break,
                    event = receiver.recv() => event,
                };
                match event {
                    Ok(event) => dispatch(observer.as_ref(), &event),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Observer fell behind, events dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}

fn dispatch(observer: &dyn SupervisorObserver, event: &SupervisorEvent) {
    match event {
        SupervisorEvent::StatusChanged(status) => observer.on_status_changed(status),
        SupervisorEvent::OutputReceived(line) => observer.on_output(line),
        SupervisorEvent::HeartbeatStatusChanged(alive) => observer.on_heartbeat_changed(*alive),
        SupervisorEvent::SystemStatsUpdated(stats) => observer.on_system_stats(stats),
    }
}
