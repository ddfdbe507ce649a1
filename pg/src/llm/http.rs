//! HTTP status handling shared by the provider clients

use std::time::Duration;

use reqwest::Response;
use reqwest::header::HeaderMap;
use serde::de::DeserializeOwned;
use tracing::debug;

use super::LlmError;

/// Fallback when a 429 carries no usable retry-after header
const DEFAULT_RETRY_AFTER_SECS: u64 = 60;

/// Read the retry-after header as whole seconds
pub(crate) fn parse_retry_after(headers: &HeaderMap) -> Duration {
    let secs = headers
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
        .unwrap_or(DEFAULT_RETRY_AFTER_SECS);
    Duration::from_secs(secs)
}

/// Map a provider response to the error taxonomy the scheduler understands
///
/// 429 becomes `RateLimited`; every other non-success status is returned as
/// `ApiError` with the body as message. Nothing is retried here.
pub(crate) async fn check_status(response: Response) -> Result<Response, LlmError> {
    let status = response.status().as_u16();

    if status == 429 {
        let retry_after = parse_retry_after(response.headers());
        debug!(?retry_after, "check_status: rate limited (429)");
        return Err(LlmError::RateLimited { retry_after });
    }

    if !response.status().is_success() {
        debug!(status, "check_status: API error");
        let message = response.text().await.unwrap_or_default();
        return Err(LlmError::ApiError { status, message });
    }

    Ok(response)
}

/// Decode a successful response body
pub(crate) async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T, LlmError> {
    let text = response.text().await?;
    Ok(serde_json::from_str(&text)?)
}
