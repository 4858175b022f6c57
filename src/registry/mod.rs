//! Registry adapters for tag listings and existence checks
//!
//! One capability trait with two implementations: the Docker Hub source
//! adapter and the destination adapter. Both are read-only from the core's
//! perspective; all registry mutation is delegated to the copy executor.

pub mod destination;
pub mod hub;

pub use destination::DestinationAdapter;
pub use hub::HubAdapter;

use crate::error::{MirrorError, Result};
use async_trait::async_trait;
use std::time::Duration;

/// Read-only registry capability.
///
/// Implementations classify their failures into the shared error kinds:
/// missing repositories are `NotFound`, exhausted quotas are `RateLimited`
/// (with the server's Retry-After hint when provided), and network or 5xx
/// failures are `Transient`.
#[async_trait]
pub trait RegistryAdapter: Send + Sync {
    /// List the tags of a repository, in the registry's own order.
    async fn list_tags(&self, repository: &str) -> Result<Vec<String>>;

    /// Whether `repository:tag` exists.
    async fn exists(&self, repository: &str, tag: &str) -> Result<bool>;
}

/// Map an HTTP error response to a mirror error kind.
pub(crate) fn classify_response(
    status: reqwest::StatusCode,
    retry_after: Option<Duration>,
    context: &str,
) -> MirrorError {
    if status == reqwest::StatusCode::NOT_FOUND {
        MirrorError::NotFound(context.to_string())
    } else if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        MirrorError::RateLimited {
            message: format!("{}: HTTP 429", context),
            retry_after,
        }
    } else {
        MirrorError::Transient(format!("{}: HTTP {}", context, status.as_u16()))
    }
}

/// Parse a Retry-After header value. Only the delta-seconds form is honored;
/// the HTTP-date form is rare on registries and not worth a date parser here.
pub(crate) fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    headers
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}
