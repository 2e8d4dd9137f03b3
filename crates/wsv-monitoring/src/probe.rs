//! The health probe seam.

use crate::HealthProbeResult;
use async_trait::async_trait;
use wsv_common::HealthEndpoint;

/// Issues one bounded health request.
///
/// Implementations never fail: timeouts, refused connections and bad
/// statuses all come back as a dead result.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn probe(&self, endpoint: &HealthEndpoint) -> HealthProbeResult;
}
