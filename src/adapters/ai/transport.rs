//! HTTP plumbing shared by the provider adapters.

use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::Response;
use std::time::Duration;

use crate::ports::ProviderError;

/// Maps a transport failure. Anything that never produced a status is
/// either a timeout or the provider being unreachable.
pub(crate) fn transport_error(err: reqwest::Error, timeout: Duration) -> ProviderError {
    if err.is_timeout() {
        ProviderError::Timeout(timeout)
    } else if err.is_connect() || err.is_request() {
        ProviderError::unavailable(format!("connection failed: {err}"))
    } else if err.is_decode() || err.is_body() {
        ProviderError::invalid_response(err.to_string())
    } else {
        ProviderError::unavailable(err.to_string())
    }
}

/// `Retry-After` in whole seconds. HTTP-date values are ignored.
pub(crate) fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

/// Passes 2xx responses through and maps everything else.
pub(crate) async fn check_status(
    response: Response,
    timeout: Duration,
) -> Result<Response, ProviderError> {
    let status = response.status().as_u16();
    if response.status().is_success() {
        return Ok(response);
    }
    let retry = retry_after(response.headers());
    let body = response.text().await.unwrap_or_default();
    match ProviderError::from_status(status, &body, retry) {
        Some(ProviderError::Timeout(_)) => Err(ProviderError::Timeout(timeout)),
        Some(err) => Err(err),
        None => Err(ProviderError::invalid_response(format!("unexpected status {status}"))),
    }
}

/// Integer cents for a per-million-token price pair.
pub(crate) fn cost_cents(prompt_tokens: u32, completion_tokens: u32, prices: (u64, u64)) -> u32 {
    let prompt = u64::from(prompt_tokens).saturating_mul(prices.0) / 1_000_000;
    let completion = u64::from(completion_tokens).saturating_mul(prices.1) / 1_000_000;
    u32::try_from(prompt.saturating_add(completion)).unwrap_or(u32::MAX)
}
