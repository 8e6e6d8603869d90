//! Failure classification for HTTP-backed remote implementations
//!
//! The workspace API reports per-user and per-project rate limiting both as
//! 429 and as 403 with a rate-limit reason in the body. Only the latter needs
//! body inspection; every other status maps to a fixed `RemoteError` variant.

use crate::RemoteError;

/// Reason phrases that turn a 403 into a quota rejection rather than a
/// permission failure.
const QUOTA_PATTERNS: &[&str] = &[
    "ratelimitexceeded",
    "userratelimitexceeded",
    "quotaexceeded",
    "rate limit exceeded",
    "quota exceeded",
];

fn mentions_quota(body: &str) -> bool {
    let lower = body.to_lowercase();
    QUOTA_PATTERNS.iter().any(|p| lower.contains(p))
}

/// Classify a failed remote response by HTTP status and response body.
///
/// - 401 → `Auth` (credential identity rejected)
/// - 403 → `QuotaExceeded` if the body names a rate-limit reason, otherwise `PermissionDenied`
/// - 404 → `NotFound`
/// - 429 → `QuotaExceeded`
/// - 408/500/502/503/504 → `Network` (retryable)
/// - anything else → `Rejected`
pub fn classify_status(status: u16, body: &str) -> RemoteError {
    let detail = body.chars().take(200).collect::<String>();
    match status {
        401 => RemoteError::Auth(detail),
        403 if mentions_quota(body) => RemoteError::QuotaExceeded(detail),
        403 => RemoteError::PermissionDenied(detail),
        404 => RemoteError::NotFound(detail),
        429 => RemoteError::QuotaExceeded(detail),
        408 | 500 | 502 | 503 | 504 => RemoteError::Network(format!("status {status}: {detail}")),
        _ => RemoteError::Rejected(format!("status {status}: {detail}")),
    }
}
