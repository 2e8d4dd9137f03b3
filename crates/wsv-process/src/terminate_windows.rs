//! Windows console interrupt delivery.
//!
//! Windows has no signals. A console process is interrupted by generating a
//! console control event on a console it is attached to. The worker is
//! spawned as the leader of a new process group, which has Ctrl+C disabled,
//! so the event raised is Ctrl+Break addressed to that group:
//! - Hosts without a console attach to the worker's console, disable their
//!   own handler, raise the event, and detach again.
//! - Hosts that already own a console (and so share it with the worker)
//!   raise the event directly.
//!
//! Console attach/detach is process-global state, so every operation runs
//! under one lock.

use std::sync::Mutex;
use std::time::Duration;
use windows::Win32::System::Console::{
    AttachConsole, FreeConsole, GenerateConsoleCtrlEvent, SetConsoleCtrlHandler,
    CTRL_BREAK_EVENT, CTRL_C_EVENT,
};

/// Global lock for console operations to prevent race conditions
static CONSOLE_OPERATION_LOCK: Mutex<()> = Mutex::new(());

/// Upper bound on a single console operation.
const CONSOLE_OPERATION_TIMEOUT: Duration = Duration::from_secs(5);

/// Interrupt `pid` through its console.
pub fn send_console_interrupt(pid: u32) -> Result<(), String> {
    if pid == 0 {
        return Err(format!("Invalid PID: {}", pid));
    }

    if !crate::process_exists(pid).unwrap_or(false) {
        return Err(format!("Process {} is not running", pid));
    }

    let (tx, rx) = std::sync::mpsc::channel();

    // Console calls can hang on a wedged console host
    std::thread::spawn(move || {
        let _ = tx.send(interrupt_locked(pid));
    });

    match rx.recv_timeout(CONSOLE_OPERATION_TIMEOUT) {
        Ok(result) => result,
        Err(_) => Err(format!(
            "Timeout interrupting PID {} after {:?}",
            pid, CONSOLE_OPERATION_TIMEOUT
        )),
    }
}

fn interrupt_locked(pid: u32) -> Result<(), String> {
    let _lock = CONSOLE_OPERATION_LOCK
        .lock()
        .map_err(|e| format!("Failed to acquire console lock: {}", e))?;

    let (event, group) = interrupt_target(crate::execute::WORKER_CREATION_FLAGS, pid);
    match attach_console(pid) {
        Ok(()) => {
            let result = raise_on_attached_console(event, group);
            detach_console();
            result
        }
        Err(attach_err) => generate_console_ctrl_event(event, group)
            .map_err(|e| format!("{}; {}", attach_err, e)),
    }
}

/// Event and process group that reach a worker spawned with `creation_flags`.
///
/// Ctrl+C is ignored by a new process group and can only be raised for the
/// whole console (group 0).
fn interrupt_target(creation_flags: u32, pid: u32) -> (u32, u32) {
    if creation_flags & crate::execute::CREATE_NEW_PROCESS_GROUP != 0 {
        (CTRL_BREAK_EVENT, pid)
    } else {
        (CTRL_C_EVENT, 0)
    }
}

fn raise_on_attached_console(event: u32, group: u32) -> Result<(), String> {
    unsafe {
        SetConsoleCtrlHandler(None, true).map_err(|_| "SetConsoleCtrlHandler failed".to_string())?;
    }

    generate_console_ctrl_event(event, group)
}

fn detach_console() {
    unsafe {
        let _ = FreeConsole();
        let _ = SetConsoleCtrlHandler(None, false);
    }
}

fn attach_console(pid: u32) -> Result<(), String> {
    unsafe { AttachConsole(pid).map_err(|_| "AttachConsole failed".to_string()) }
}

fn generate_console_ctrl_event(event: u32, process_group: u32) -> Result<(), String> {
    unsafe {
        GenerateConsoleCtrlEvent(event, process_group)
            .map_err(|_| "GenerateConsoleCtrlEvent failed".to_string())
    }
}
