//! Interrupt delivery as a capability.
//!
//! Asking a worker to shut down cleanly means sending it the equivalent of
//! Ctrl+C. On Unix that is a signal to its process group; on Windows it
//! requires attaching to the worker's console. Callers only see whether
//! delivery succeeded, and treat `false` as "fall back to a forceful stop".

use tracing::{debug, warn};

/// Delivers an interrupt to a process and everything in its group.
pub trait InterruptSender: Send + Sync {
    /// Returns `true` if the interrupt was delivered. Never waits for exit.
    fn try_send_interrupt(&self, pid: u32) -> bool;
}

/// The native mechanism for the current platform.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlatformInterrupt;

impl InterruptSender for PlatformInterrupt {
    fn try_send_interrupt(&self, pid: u32) -> bool {
        if pid == 0 {
            warn!("Refusing to interrupt pid 0");
            return false;
        }

        #[cfg(unix)]
        {
            send_sigint_unix(pid)
        }

        #[cfg(windows)]
        {
            match crate::terminate_windows::send_console_interrupt(pid) {
                Ok(()) => true,
                Err(e) => {
                    warn!(pid, error = %e, "Console interrupt failed");
                    false
                }
            }
        }
    }
}

/// For platforms or hosts with no interrupt mechanism.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoInterrupt;

impl InterruptSender for NoInterrupt {
    fn try_send_interrupt(&self, pid: u32) -> bool {
        debug!(pid, "Interrupt capability unavailable");
        false
    }
}

#[cfg(unix)]
fn send_sigint_unix(pid: u32) -> bool {
    use nix::sys::signal::{kill, killpg, Signal};
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    let nix_pid = Pid::from_raw(raw);

    // The worker leads its own group; fall back to the single process if it does not.
    match killpg(nix_pid, Signal::SIGINT) {
        Ok(()) => {
            debug!(pid, "Sent SIGINT to process group");
            true
        }
        Err(group_err) => match kill(nix_pid, Signal::SIGINT) {
            Ok(()) => {
                debug!(pid, error = %group_err, "Sent SIGINT to process only");
                true
            }
            Err(e) => {
                warn!(pid, error = %e, "Failed to send SIGINT");
                false
            }
        },
    }
}
