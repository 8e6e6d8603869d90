//! Error types for pool operations

use std::time::Duration;

use credentials::TrafficClass;

/// Operation-level failures surfaced to pool callers.
///
/// Rate-limit waits and retries are never visible here, only their final
/// outcome. `NotFound` on a read is not an error at all: reads return an empty
/// result instead.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Zero usable credentials, or an invalid pool setting. Fatal at startup.
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("credential {credential} rejected by remote: {message}")]
    Auth { credential: usize, message: String },

    #[error("pool exhausted: all {total} {partition} credentials are unhealthy")]
    PoolExhausted { partition: TrafficClass, total: usize },

    #[error("remote quota exceeded on credential {credential}: {message}")]
    QuotaExceeded { credential: usize, message: String },

    #[error("transient network error: {0}")]
    Transient(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("request rejected: {0}")]
    Rejected(String),

    #[error("deadline of {0:?} elapsed before the call could run")]
    DeadlineElapsed(Duration),

    #[error("{operation} returned an unexpected {got} outcome")]
    UnexpectedOutcome {
        operation: &'static str,
        got: &'static str,
    },
}

impl Error {
    /// Whether the retry policy may try the operation again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::QuotaExceeded { .. } | Error::Transient(_))
    }

    /// "Service temporarily unavailable" at the system boundary, as opposed to
    /// a caller mistake or a missing configuration.
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            Error::PoolExhausted { .. } | Error::QuotaExceeded { .. } | Error::Transient(_)
        )
    }

    /// Short label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Configuration(_) => "configuration",
            Error::Auth { .. } => "auth",
            Error::PoolExhausted { .. } => "pool_exhausted",
            Error::QuotaExceeded { .. } => "quota_exceeded",
            Error::Transient(_) => "transient",
            Error::PermissionDenied(_) => "permission_denied",
            Error::NotFound(_) => "not_found",
            Error::Rejected(_) => "rejected",
            Error::DeadlineElapsed(_) => "deadline_elapsed",
            Error::UnexpectedOutcome { .. } => "unexpected_outcome",
        }
    }
}

impl From<credentials::Error> for Error {
    fn from(err: credentials::Error) -> Self {
        Error::Configuration(err.to_string())
    }
}

/// Result alias for pool operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_quota_and_transient_are_retryable() {
        assert!(Error::Transient("reset".into()).is_retryable());
        assert!(
            Error::QuotaExceeded {
                credential: 0,
                message: "429".into()
            }
            .is_retryable()
        );
        assert!(
            !Error::Auth {
                credential: 0,
                message: "revoked".into()
            }
            .is_retryable()
        );
        assert!(
            !Error::PoolExhausted {
                partition: TrafficClass::Interactive,
                total: 2
            }
            .is_retryable()
        );
        assert!(!Error::Configuration("none".into()).is_retryable());
    }

    #[test]
    fn exhaustion_is_unavailable_but_configuration_is_not() {
        let exhausted = Error::PoolExhausted {
            partition: TrafficClass::Background,
            total: 3,
        };
        assert!(exhausted.is_unavailable());
        assert_eq!(
            exhausted.to_string(),
            "pool exhausted: all 3 background credentials are unhealthy"
        );
        assert!(!Error::Configuration("x".into()).is_unavailable());
    }

    #[test]
    fn missing_credentials_become_configuration_errors() {
        let err: Error = credentials::Error::NoCredentials.into();
        assert!(matches!(err, Error::Configuration(_)));
        assert_eq!(err.kind(), "configuration");
    }
}
