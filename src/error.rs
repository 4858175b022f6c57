//! Error types for registry and sync operations
//!
//! Every failure in the mirroring pipeline is classified into one of a small
//! set of kinds so the orchestrator can decide whether to retry, skip, or
//! abort, and so each recorded result carries an attributable cause.

use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, MirrorError>;

#[derive(Debug, Error)]
pub enum MirrorError {
    /// Repository or tag absent upstream. Never retried.
    #[error("not found: {0}")]
    NotFound(String),

    /// Registry quota exhausted. Retried with backoff; the server-provided
    /// Retry-After hint is honored when larger than the configured delay.
    #[error("rate limited: {message}")]
    RateLimited {
        message: String,
        retry_after: Option<Duration>,
    },

    /// Network failure or 5xx response. Retried like RateLimited.
    #[error("transient failure: {0}")]
    Transient(String),

    /// Malformed pattern or conflicting options in an image spec. Fails that
    /// image only, never the whole manifest.
    #[error("invalid image spec: {0}")]
    InvalidSpec(String),

    /// Cannot read or write the manifest or snapshot. Fatal for the run.
    #[error("persistence failure: {0}")]
    Persistence(String),
}

/// Flat classification of a [`MirrorError`], recorded in sync results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    RateLimited,
    Transient,
    InvalidSpec,
    Persistence,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::Transient => "transient",
            ErrorKind::InvalidSpec => "invalid_spec",
            ErrorKind::Persistence => "persistence",
        };
        write!(f, "{}", name)
    }
}

impl MirrorError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            MirrorError::NotFound(_) => ErrorKind::NotFound,
            MirrorError::RateLimited { .. } => ErrorKind::RateLimited,
            MirrorError::Transient(_) => ErrorKind::Transient,
            MirrorError::InvalidSpec(_) => ErrorKind::InvalidSpec,
            MirrorError::Persistence(_) => ErrorKind::Persistence,
        }
    }

    /// Whether the orchestrator should attempt this operation again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            MirrorError::RateLimited { .. } | MirrorError::Transient(_)
        )
    }

    /// Server-provided backoff hint, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            MirrorError::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

impl From<std::io::Error> for MirrorError {
    fn from(err: std::io::Error) -> Self {
        MirrorError::Persistence(err.to_string())
    }
}

impl From<reqwest::Error> for MirrorError {
    fn from(err: reqwest::Error) -> Self {
        MirrorError::Transient(err.to_string())
    }
}

impl From<serde_json::Error> for MirrorError {
    fn from(err: serde_json::Error) -> Self {
        MirrorError::Persistence(format!("JSON serialization: {}", err))
    }
}

impl From<serde_yaml::Error> for MirrorError {
    fn from(err: serde_yaml::Error) -> Self {
        MirrorError::Persistence(format!("YAML serialization: {}", err))
    }
}

impl From<regex::Error> for MirrorError {
    fn from(err: regex::Error) -> Self {
        MirrorError::InvalidSpec(format!("bad pattern: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_kinds() {
        assert!(MirrorError::Transient("timeout".into()).is_retryable());
        assert!(MirrorError::RateLimited {
            message: "429".into(),
            retry_after: None
        }
        .is_retryable());
        assert!(!MirrorError::NotFound("library/nope".into()).is_retryable());
        assert!(!MirrorError::InvalidSpec("(".into()).is_retryable());
    }

    #[test]
    fn test_retry_after_hint() {
        let err = MirrorError::RateLimited {
            message: "quota".into(),
            retry_after: Some(Duration::from_secs(30)),
        };
        assert_eq!(err.retry_after(), Some(Duration::from_secs(30)));
        assert_eq!(MirrorError::Transient("x".into()).retry_after(), None);
    }
}
