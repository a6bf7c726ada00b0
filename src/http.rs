//! Shared HTTP plumbing for the upstream services.
//!
//! All JSON calls to LLM and embedding providers go through
//! [`send_json_with_retry`]:
//!
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use serde_json::Value;
use std::time::Duration;
use tracing::warn;

use crate::{Error, Result};

const USER_AGENT: &str = concat!("stac-search/", env!("CARGO_PKG_VERSION"));

/// Retries for catalog and geocoding requests.
pub const UPSTREAM_RETRIES: u32 = 2;

/// Builds a client with the crate's user agent and a whole-request timeout.
pub fn build_client(timeout: Duration) -> anyhow::Result<reqwest::Client> {
    let client = reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .connect_timeout(Duration::from_secs(10).min(timeout))
        .timeout(timeout)
        .build()?;
    Ok(client)
}

/// Delay before retry number `attempt` (1-based).
pub fn backoff_delay(attempt: u32) -> Duration {
    Duration::from_secs(1 << attempt.saturating_sub(1).min(5))
}

/// Sends the request produced by `build`, retrying transient failures, and
/// returns the decoded JSON body.
pub async fn send_json_with_retry<F>(service: &str, max_retries: u32, build: F) -> Result<Value>
where
    F: Fn() -> reqwest::RequestBuilder,
{
    let mut last_err = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            tokio::time::sleep(backoff_delay(attempt)).await;
        }

        match build().send().await {
            Ok(response) => {
                let status = response.status();

                if status.is_success() {
                    return response
                        .json::<Value>()
                        .await
                        .map_err(|e| Error::external(service, format!("invalid JSON body: {}", e)));
                }

                let body_text = response.text().await.unwrap_or_default();
                let err = Error::external(service, format!("HTTP {}: {}", status, body_text));

                if status.as_u16() == 429 || status.is_server_error() {
                    warn!(service, attempt, %status, "transient upstream error, retrying");
                    last_err = Some(err);
                    continue;
                }
                return Err(err);
            }
            Err(e) if e.is_timeout() => {
                warn!(service, attempt, "upstream request timed out");
                last_err = Some(Error::external(service, format!("request timed out: {}", e)));
            }
            Err(e) => {
                warn!(service, attempt, error = %e, "upstream connection error");
                last_err = Some(Error::external(service, e));
            }
        }
    }

    Err(last_err.unwrap_or_else(|| Error::external(service, "failed after retries")))
}
