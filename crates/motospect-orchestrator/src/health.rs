//! HTTP health probing

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

/// Readiness probe used by the service manager
///
/// Implementations never fail: every problem is reported as unhealthy.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn check(&self, url: &str, timeout: Duration) -> bool;
}

/// Probe that performs a single bounded HTTP GET
#[derive(Clone, Default)]
pub struct HealthChecker {
    client: reqwest::Client,
}

impl HealthChecker {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl HealthProbe for HealthChecker {
    async fn check(&self, url: &str, timeout: Duration) -> bool {
        match self.client.get(url).timeout(timeout).send().await {
            Ok(response) => {
                let healthy = response.status().is_success();
                if !healthy {
                    debug!(url = %url, status = %response.status(), "Health check failed");
                }
                healthy
            }
            Err(e) => {
                debug!(url = %url, error = %e, "Health check request failed");
                false
            }
        }
    }
}
