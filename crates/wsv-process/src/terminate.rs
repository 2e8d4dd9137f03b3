//! Forceful process-tree termination.

use tracing::{debug, warn};
use wsv_common::{ProcessError, ProcessResult};

/// Kill `pid` and every process in its tree.
///
/// A process that is already gone is not an error.
pub fn kill_process_tree(pid: u32) -> ProcessResult<()> {
    if pid == 0 {
        return Err(ProcessError::kill_failed(pid, "invalid pid"));
    }

    #[cfg(unix)]
    {
        kill_tree_unix(pid)
    }

    #[cfg(windows)]
    {
        kill_tree_windows(pid)
    }
}

#[cfg(unix)]
fn kill_tree_unix(pid: u32) -> ProcessResult<()> {
    use nix::errno::Errno;
    use nix::sys::signal::{kill, killpg, Signal};
    use nix::unistd::Pid;

    let raw = i32::try_from(pid).map_err(|_| ProcessError::kill_failed(pid, "pid out of range"))?;
    let nix_pid = Pid::from_raw(raw);

    match killpg(nix_pid, Signal::SIGKILL) {
        Ok(()) => {
            debug!(pid, "Sent SIGKILL to process group");
            Ok(())
        }
        Err(group_err) => match kill(nix_pid, Signal::SIGKILL) {
            Ok(()) => {
                debug!(pid, error = %group_err, "Sent SIGKILL to process only");
                Ok(())
            }
            Err(Errno::ESRCH) => {
                debug!(pid, "Process already gone");
                Ok(())
            }
            Err(e) => Err(ProcessError::kill_failed(pid, e.to_string())),
        },
    }
}

#[cfg(windows)]
fn kill_tree_windows(pid: u32) -> ProcessResult<()> {
    use std::os::windows::process::CommandExt;

    const CREATE_NO_WINDOW: u32 = 0x0800_0000;

    let output = std::process::Command::new("taskkill")
        .args(["/PID", &pid.to_string(), "/T", "/F"])
        .creation_flags(CREATE_NO_WINDOW)
        .output();

    match output {
        Ok(out) if out.status.success() => {
            debug!(pid, "taskkill terminated process tree");
            Ok(())
        }
        Ok(out) => {
            warn!(
                pid,
                stderr = %String::from_utf8_lossy(&out.stderr).trim(),
                "taskkill failed, terminating process only"
            );
            terminate_process_windows(pid)
        }
        Err(e) => {
            warn!(pid, error = %e, "taskkill unavailable, terminating process only");
            terminate_process_windows(pid)
        }
    }
}

#[cfg(windows)]
fn terminate_process_windows(pid: u32) -> ProcessResult<()> {
    use windows::Win32::Foundation::CloseHandle;
    use windows::Win32::System::Threading::{OpenProcess, TerminateProcess, PROCESS_TERMINATE};

    if !crate::process_exists(pid).unwrap_or(true) {
        return Ok(());
    }

    unsafe {
        let handle = match OpenProcess(PROCESS_TERMINATE, false, pid) {
            Ok(h) if !h.is_invalid() => h,
            _ => {
                return Err(ProcessError::kill_failed(
                    pid,
                    "failed to open process for termination",
                ));
            }
        };

        let result = TerminateProcess(handle, 1);
        let _ = CloseHandle(handle);

        result.map_err(|e| ProcessError::kill_failed(pid, format!("TerminateProcess failed: {}", e)))
    }
}
