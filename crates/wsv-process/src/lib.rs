//! # WSV Process
//!
//! Low-level process operations used by the worker supervisor:
//! - Launch command construction (own process group, piped output)
//! - Interrupt delivery as a capability (`InterruptSender`)
//! - Process-tree termination
//! - Process existence checks and lingering-process discovery
//! - Opening the platform's task manager

pub mod check;
pub mod discovery;
pub mod execute;
pub mod interrupt;
pub mod system_monitor;
pub mod terminate;

#[cfg(windows)]
pub mod terminate_windows;

pub use check::process_exists;
pub use discovery::{find_processes, kill_processes, ProcessMatcher};
pub use execute::LaunchCommand;
pub use interrupt::{InterruptSender, NoInterrupt, PlatformInterrupt};
pub use system_monitor::open_system_monitor;
pub use terminate::kill_process_tree;
