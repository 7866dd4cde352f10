//! HTTP retry helpers for the hosted store.
//!
//! Every request to the hosted backend goes through [`send_json`] so that
//! transient failures are retried with exponential backoff. Reads retry
//! timeouts, connection resets, HTTP 429, and HTTP 5xx. Inserts are not
//! idempotent, so they retry only failures where the row cannot have been
//! written: a refused connection or HTTP 429. Client errors other than 429
//! are permanent and returned immediately.
//!
//! ```ignore
//! let rows = retry::send_json(Retry::Idempotent, || client.get(&url).query(&params)).await?;
//! ```

use std::time::Duration;

use crate::StoreError;

/// Maximum number of retry attempts for transient HTTP errors.
///
/// With exponential backoff (1s, 2s, 4s) the total wait before giving up
/// is 7 seconds. Store calls sit behind user actions, so this stays short.
const MAX_RETRIES: u32 = 3;

/// Maximum length of the response body included in errors.
const BODY_PREVIEW_LEN: usize = 300;

/// Which failures a request may be retried on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retry {
    /// Reads: any transient failure.
    Idempotent,
    /// Writes: only failures where the request never reached the store.
    Unsent,
}

impl Retry {
    fn error(self, e: &reqwest::Error) -> bool {
        match self {
            Self::Idempotent => is_transient(e),
            Self::Unsent => e.is_connect(),
        }
    }

    fn status(self, status: reqwest::StatusCode) -> bool {
        status == reqwest::StatusCode::TOO_MANY_REQUESTS
            || (self == Self::Idempotent && status.is_server_error())
    }
}

/// Sends an HTTP request and parses the response body as JSON.
///
/// The `build_request` closure is called on each attempt since
/// [`reqwest::RequestBuilder`] is consumed by `.send()`.
///
/// # Errors
///
/// Returns [`StoreError`] if the request fails after all retries, the
/// server returns a non-retryable status, or the body is not JSON.
#[allow(clippy::future_not_send)]
pub async fn send_json<F>(retry: Retry, build_request: F) -> Result<serde_json::Value, StoreError>
where
    F: Fn() -> reqwest::RequestBuilder,
{
    let response = send_with_retry(retry, &build_request, MAX_RETRIES).await?;
    let text = response.text().await?;
    if text.trim().is_empty() {
        return Ok(serde_json::Value::Null);
    }
    Ok(serde_json::from_str(&text)?)
}

/// Sends the request built by `build_request`, retrying transient errors
/// up to `max_retries` times. Returns the first 2xx/3xx response.
#[allow(clippy::future_not_send)]
async fn send_with_retry<F>(
    retry: Retry,
    build_request: &F,
    max_retries: u32,
) -> Result<reqwest::Response, StoreError>
where
    F: Fn() -> reqwest::RequestBuilder,
{
    for attempt in 0..=max_retries {
        if attempt > 0 {
            let delay = backoff(attempt);
            log::warn!("  store retry {attempt}/{max_retries} in {delay:?}...");
            tokio::time::sleep(delay).await;
        }

        let response = match build_request().send().await {
            Ok(response) => response,
            Err(e) if retry.error(&e) && attempt < max_retries => {
                log::warn!("  transient store error: {e}");
                continue;
            }
            Err(e) => return Err(StoreError::Http(e)),
        };

        let status = response.status();

        if retry.status(status) && attempt < max_retries {
            log::warn!("  store answered HTTP {status}");
            continue;
        }

        if status.is_client_error() || status.is_server_error() {
            let body = response.text().await.unwrap_or_default();
            return Err(StoreError::Status {
                status: status.as_u16(),
                message: preview(&body),
            });
        }

        return Ok(response);
    }

    Err(StoreError::Unavailable {
        message: format!("request failed after {max_retries} retries"),
    })
}

/// Delay before retry number `attempt` (1-based): 1s, 2s, 4s, ...
#[must_use]
pub(crate) fn backoff(attempt: u32) -> Duration {
    Duration::from_secs(1u64 << attempt.saturating_sub(1).min(5))
}

fn preview(body: &str) -> String {
    if body.len() > BODY_PREVIEW_LEN {
        let mut end = BODY_PREVIEW_LEN;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &body[..end])
    } else {
        body.to_string()
    }
}

/// Returns `true` if the error is likely transient and worth retrying.
fn is_transient(e: &reqwest::Error) -> bool {
    e.is_timeout() || e.is_connect() || e.is_body() || e.is_request()
}
