use reqwest::StatusCode;
use reqwest::header::HeaderMap;
use std::time::Duration;

use crate::retry::AttemptError;

pub(crate) fn is_rate_limited(status: StatusCode, body: &str) -> bool {
    if status == StatusCode::TOO_MANY_REQUESTS {
        return true;
    }
    let code = status.as_u16();
    if code == 529 || code == 503 {
        return true;
    }
    let lower = body.to_lowercase();
    lower.contains("rate limit")
        || lower.contains("rate_limit")
        || lower.contains("too many requests")
        || lower.contains("quota")
        || lower.contains("overloaded")
}

pub(crate) fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    let value = headers.get("retry-after")?.to_str().ok()?.trim();
    value.parse::<u64>().ok().map(Duration::from_secs)
}

/// Error the retry loop recognizes; it waits at least `retry_after` before
/// the next attempt.
pub(crate) fn rate_limit_error(
    provider: &str,
    status: StatusCode,
    retry_after: Option<Duration>,
) -> AttemptError {
    let message = match retry_after {
        Some(wait) => format!(
            "{} rate limited ({}); server asked to wait {}s",
            provider,
            status,
            wait.as_secs()
        ),
        None => format!("{} rate limited ({})", provider, status),
    };
    AttemptError::RateLimited {
        message,
        retry_after,
    }
}
