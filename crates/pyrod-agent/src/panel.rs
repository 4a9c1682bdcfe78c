//! Control-plane status notifications
//!
//! Best-effort, never load-bearing: a failed notification is logged and the
//! local state machine proceeds regardless. Retries up to three times with
//! backoff on 5xx and transport errors; 4xx responses are final.

use crate::status::ServerState;
use pyrod_core::{DaemonError, Result};
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_ATTEMPTS: u32 = 3;
const BACKOFF_BASE: Duration = Duration::from_millis(500);

pub struct PanelClient {
    base_url: Option<String>,
    client: reqwest::Client,
}

impl PanelClient {
    /// Client for the configured panel URL; `None` disables notifications
    pub fn new(base_url: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self { base_url, client }
    }

    /// A client that never sends anything (tests, panel-less deployments)
    pub fn disabled() -> Self {
        Self::new(None)
    }

    /// `PUT {base}/api/servers/{id}/status` with the transition. Logs and
    /// swallows the final error; lifecycle code never blocks on this.
    pub async fn notify_status(&self, id: &str, state: ServerState) {
        if let Err(e) = self.try_notify(id, state).await {
            tracing::warn!(server = %id, state = %state, error = %e, "panel notification failed");
        }
    }

    async fn try_notify(&self, id: &str, state: ServerState) -> Result<()> {
        let base = match &self.base_url {
            Some(b) => b,
            None => return Ok(()),
        };
        let url = format!("{base}/api/servers/{id}/status");
        let body = serde_json::json!({ "status": state.to_string() });

        let mut last_err = String::new();
        for attempt in 1..=MAX_ATTEMPTS {
            match self.client.put(&url).json(&body).send().await {
                Ok(resp) if resp.status().is_success() => {
                    tracing::debug!(server = %id, state = %state, "panel notified");
                    return Ok(());
                }
                Ok(resp) if resp.status().is_client_error() => {
                    // The panel rejected the payload; retrying cannot help
                    return Err(DaemonError::Transient(format!(
                        "panel returned {}",
                        resp.status()
                    )));
                }
                Ok(resp) => {
                    last_err = format!("panel returned {}", resp.status());
                }
                Err(e) => {
                    last_err = e.to_string();
                }
            }

            if attempt < MAX_ATTEMPTS {
                tokio::time::sleep(BACKOFF_BASE * attempt).await;
            }
        }

        Err(DaemonError::Transient(format!(
            "giving up after {MAX_ATTEMPTS} attempts: {last_err}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn disabled_client_is_silent() {
        let client = PanelClient::disabled();
        // Must complete immediately without error
        client.notify_status("s1", ServerState::Online).await;
    }

    #[tokio::test]
    async fn unreachable_panel_does_not_propagate() {
        // Nothing listens here; all attempts fail fast with refused connections
        let client = PanelClient::new(Some("http://127.0.0.1:9".to_string()));
        client.notify_status("s1", ServerState::Offline).await;
    }
}
