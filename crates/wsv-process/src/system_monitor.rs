//! Opening the platform's process manager for an operator.

use std::process::{Command, Stdio};
use tracing::{debug, info, warn};
use wsv_common::{ProcessError, ProcessResult};

/// Best-effort launch of the native task manager.
///
/// Returns once the tool has been started; the caller never waits on it.
pub fn open_system_monitor() -> ProcessResult<()> {
    let candidates = candidates();
    let mut last_error = String::from("no system monitor known for this platform");

    for (program, args) in candidates {
        match launch_detached(program, args) {
            Ok(pid) => {
                info!(program, pid, "Opened system monitor");
                return Ok(());
            }
            Err(e) => last_error = format!("{}: {}", program, e),
        }
    }

    Err(ProcessError::tool_failed("system-monitor", last_error))
}

/// Start `program` and reap it from a background thread once it exits.
fn launch_detached(program: &str, args: &[&str]) -> std::io::Result<u32> {
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .spawn()?;
    let pid = child.id();

    let reaper = std::thread::Builder::new()
        .name("system-monitor-reaper".to_string())
        .spawn(move || match child.wait() {
            Ok(status) => debug!(pid, %status, "System monitor exited"),
            Err(e) => debug!(pid, error = %e, "Failed to reap system monitor"),
        });
    if let Err(e) = reaper {
        warn!(pid, error = %e, "System monitor will not be reaped");
    }

    Ok(pid)
}

#[cfg(windows)]
fn candidates() -> &'static [(&'static str, &'static [&'static str])] {
    &[("taskmgr.exe", &[])]
}

#[cfg(target_os = "macos")]
fn candidates() -> &'static [(&'static str, &'static [&'static str])] {
    &[("open", &["-a", "Activity Monitor"])]
}

#[cfg(all(unix, not(target_os = "macos")))]
fn candidates() -> &'static [(&'static str, &'static [&'static str])] {
    &[
        ("gnome-system-monitor", &[]),
        ("plasma-systemmonitor", &[]),
        ("ksysguard", &[]),
        ("xfce4-taskmanager", &[]),
    ]
}
