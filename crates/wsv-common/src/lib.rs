//! # WSV Common
//!
//! Types shared by every worker-supervisor crate: the process error taxonomy
//! and the health endpoint the supervisor probes.

pub mod errors;
pub mod types;

pub use errors::{ProcessError, ProcessResult};
pub use types::{HealthEndpoint, DEFAULT_HEALTH_PATH, DEFAULT_HOST, DEFAULT_PORT};
