//! JSON-over-HTTP helper shared by the provider clients.
//!
//! Retry strategy:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors (including timeouts) → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)
//!
//! Retries are bounded by the caller's `max_retries`; the last error is
//! returned as a plain message for the caller to wrap in its own error kind.

use std::time::Duration;

use tracing::debug;

/// Build a client with a per-request timeout.
pub(crate) fn client(timeout_secs: u64) -> Result<reqwest::Client, String> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| format!("failed to build HTTP client: {}", e))
}

/// POST `body` to `url` and parse the JSON response, retrying transient failures.
pub(crate) async fn post_json(
    client: &reqwest::Client,
    url: &str,
    bearer: Option<&str>,
    body: &serde_json::Value,
    max_retries: u32,
    label: &str,
) -> Result<serde_json::Value, String> {
    let mut last_err = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            debug!(%label, attempt, ?delay, "retrying request");
            tokio::time::sleep(delay).await;
        }

        let mut request = client.post(url).json(body);
        if let Some(key) = bearer {
            request = request.bearer_auth(key);
        }

        match request.send().await {
            Ok(response) => {
                let status = response.status();

                if status.is_success() {
                    return response
                        .json::<serde_json::Value>()
                        .await
                        .map_err(|e| format!("{} returned invalid JSON: {}", label, e));
                }

                let body_text = response.text().await.unwrap_or_default();
                let msg = format!("{} API error {}: {}", label, status, body_text);

                // Rate limited or server error: retry
                if status.as_u16() == 429 || status.is_server_error() {
                    last_err = Some(msg);
                    continue;
                }
                return Err(msg);
            }
            Err(e) => {
                last_err = Some(format!("{} request to {} failed: {}", label, url, e));
            }
        }
    }

    Err(last_err.unwrap_or_else(|| format!("{} request failed after retries", label)))
}
