//! Process existence checking.

use wsv_common::{ProcessError, ProcessResult};

/// Check if a process with the given PID exists.
///
/// On Unix this is `kill(pid, 0)`, which sends nothing but reports whether
/// the PID is live. On Windows it tries to open a query handle.
pub fn process_exists(pid: u32) -> ProcessResult<bool> {
    #[cfg(unix)]
    {
        process_exists_unix(pid)
    }

    #[cfg(windows)]
    {
        process_exists_windows(pid)
    }
}

#[cfg(unix)]
fn process_exists_unix(pid: u32) -> ProcessResult<bool> {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return Ok(false);
    };

    match kill(Pid::from_raw(raw), None) {
        Ok(_) => Ok(true),
        Err(nix::errno::Errno::ESRCH) => Ok(false),
        // Exists, owned by someone else
        Err(nix::errno::Errno::EPERM) => Ok(true),
        Err(e) => Err(ProcessError::signal_failed(pid, format!("existence check: {}", e))),
    }
}

#[cfg(windows)]
fn process_exists_windows(pid: u32) -> ProcessResult<bool> {
    use windows::Win32::Foundation::CloseHandle;
    use windows::Win32::System::Threading::{OpenProcess, PROCESS_QUERY_LIMITED_INFORMATION};

    const ERROR_INVALID_PARAMETER: u32 = 0x80070057;
    const ERROR_ACCESS_DENIED: u32 = 0x80070005;

    unsafe {
        match OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION, false, pid) {
            Ok(handle) => {
                let _ = CloseHandle(handle);
                Ok(true)
            }
            Err(e) => {
                let code = e.code().0 as u32;
                if code == ERROR_INVALID_PARAMETER || code == ERROR_ACCESS_DENIED {
                    Ok(false)
                } else {
                    Err(ProcessError::signal_failed(pid, format!("existence check: {}", e)))
                }
            }
        }
    }
}
