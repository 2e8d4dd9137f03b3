//! Discovery of worker processes the supervisor no longer holds a handle to.
//!
//! A worker that restarted itself, or one left behind by a previous run of
//! the launcher, is found by its executable and the entry point on its
//! command line.

use std::path::{Path, PathBuf};
use sysinfo::System;
use tracing::{debug, info, warn};

/// Identifies worker processes by executable and command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessMatcher {
    executable: PathBuf,
    command_contains: Vec<String>,
}

impl ProcessMatcher {
    /// Matches processes running `executable`. A bare name (no directory)
    /// matches by file name only.
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        let executable = executable.into();
        let executable = std::fs::canonicalize(&executable).unwrap_or(executable);
        Self {
            executable,
            command_contains: Vec::new(),
        }
    }

    /// Additionally require `needle` somewhere on the command line.
    pub fn with_argument(mut self, needle: impl Into<String>) -> Self {
        self.command_contains.push(needle.into());
        self
    }

    pub fn matches(&self, exe: Option<&Path>, cmd: &[String]) -> bool {
        let Some(exe) = exe else {
            return false;
        };
        if !self.matches_executable(exe) {
            return false;
        }

        let command_line = cmd.join(" ");
        self.command_contains
            .iter()
            .all(|needle| command_line.contains(needle.as_str()))
    }

    fn matches_executable(&self, exe: &Path) -> bool {
        let bare = self
            .executable
            .parent()
            .map_or(true, |p| p.as_os_str().is_empty());
        if bare {
            return same_file_name(exe, &self.executable);
        }

        if paths_equal(exe, &self.executable) {
            return true;
        }
        std::fs::canonicalize(exe)
            .map(|resolved| paths_equal(&resolved, &self.executable))
            .unwrap_or(false)
    }
}

fn same_file_name(a: &Path, b: &Path) -> bool {
    match (a.file_stem(), b.file_stem()) {
        (Some(a), Some(b)) => a.eq_ignore_ascii_case(b),
        _ => false,
    }
}

#[cfg(windows)]
fn paths_equal(a: &Path, b: &Path) -> bool {
    a.to_string_lossy()
        .eq_ignore_ascii_case(&b.to_string_lossy())
}

#[cfg(not(windows))]
fn paths_equal(a: &Path, b: &Path) -> bool {
    a == b
}

/// PIDs of every process matching `matcher`, excluding this process.
pub fn find_processes(matcher: &ProcessMatcher) -> Vec<u32> {
    let own_pid = std::process::id();
    let system = System::new_all();

    let mut pids: Vec<u32> = system
        .processes()
        .values()
        .filter(|process| process.pid().as_u32() != own_pid)
        .filter(|process| matcher.matches(process.exe(), process.cmd()))
        .map(|process| process.pid().as_u32())
        .collect();
    pids.sort_unstable();

    debug!(count = pids.len(), executable = %matcher.executable.display(), "Process scan complete");
    pids
}

/// Kills every matching process tree; returns how many were killed.
pub fn kill_processes(matcher: &ProcessMatcher) -> usize {
    let mut killed = 0;
    for pid in find_processes(matcher) {
        match crate::terminate::kill_process_tree(pid) {
            Ok(()) => {
                info!(pid, "Killed lingering worker process");
                killed += 1;
            }
            Err(e) => warn!(pid, error = %e, "Failed to kill lingering worker process"),
        }
    }
    killed
}
