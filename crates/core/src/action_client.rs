//! Device-control client.
//!
//! Actuator actions are plain `GET {base}/{action}` calls against the robot's
//! control endpoint. Calls are bounded in time and never retried: a stale arm
//! movement is worse than a dropped one.

use async_trait::async_trait;
use std::time::Duration;
use tracing::{info, warn};

/// Default bound on a single device-control call.
pub const DEFAULT_ACTION_TIMEOUT: Duration = Duration::from_secs(5);

/// Outcome of a device-control call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActionResult {
    pub success: bool,
    /// HTTP status when the endpoint answered at all.
    pub status: Option<u16>,
}

impl ActionResult {
    fn failed() -> Self {
        Self {
            success: false,
            status: None,
        }
    }
}

/// Triggers named actions on an external device.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ActionClient: Send + Sync {
    /// Fires `action` once and reports whether the device accepted it.
    async fn invoke(&self, action: &str) -> bool;
}

/// `ActionClient` over HTTP using `reqwest`.
#[derive(Clone)]
pub struct HttpActionClient {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl HttpActionClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_timeout(base_url, DEFAULT_ACTION_TIMEOUT)
    }

    pub fn with_timeout(base_url: impl Into<String>, timeout: Duration) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            client: reqwest::Client::new(),
            base_url,
            timeout,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url_for(&self, action: &str) -> String {
        format!("{}/{}", self.base_url, action.trim_start_matches('/'))
    }

    /// Performs the call and keeps the status code for diagnostics.
    pub async fn invoke_detailed(&self, action: &str) -> ActionResult {
        let url = self.url_for(action);
        match self.client.get(&url).timeout(self.timeout).send().await {
            Ok(response) => {
                let status = response.status().as_u16();
                info!(action, status, "Device action called");
                ActionResult {
                    success: status == 200,
                    status: Some(status),
                }
            }
            Err(e) if e.is_timeout() => {
                warn!(action, timeout_ms = self.timeout.as_millis() as u64, "Device action timed out");
                ActionResult::failed()
            }
            Err(e) => {
                warn!(action, error = %e, "Device action failed");
                ActionResult::failed()
            }
        }
    }
}

#[async_trait]
impl ActionClient for HttpActionClient {
    async fn invoke(&self, action: &str) -> bool {
        self.invoke_detailed(action).await.success
    }
}
