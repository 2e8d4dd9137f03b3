//! Caller-side guard for the shutdown ladder.

use super::ShutdownReport;
use std::sync::atomic::{AtomicBool, Ordering};

/// Admits one shutdown attempt at a time and decides when the
/// application may close.
#[derive(Debug, Default)]
pub struct ShutdownGate {
    in_progress: AtomicBool,
    close_allowed: AtomicBool,
}

impl ShutdownGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// `false` while another attempt is running.
    pub fn try_begin(&self) -> bool {
        self.in_progress
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// End the current attempt. Returns whether the application may close.
    pub fn finish(&self, report: &ShutdownReport) -> bool {
        let allowed = report.allows_exit();
        if allowed {
            self.close_allowed.store(true, Ordering::Release);
        }
        self.in_progress.store(false, Ordering::Release);
        allowed
    }

    /// Operator override: close even though the worker may still run.
    pub fn force_allow(&self) {
        self.close_allowed.store(true, Ordering::Release);
    }

    pub fn is_in_progress(&self) -> bool {
        self.in_progress.load(Ordering::Acquire)
    }

    pub fn can_close(&self) -> bool {
        self.close_allowed.load(Ordering::Acquire)
    }
}
