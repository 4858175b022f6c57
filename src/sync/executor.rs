//! Copy execution against the destination registry
//!
//! The actual byte-level transfer is delegated to `regctl`, which speaks the
//! registry wire protocol and copies content-addressed, so repeating a copy
//! with identical arguments is always safe. This module only runs the tool
//! and classifies its outcome.

use crate::output::OutputManager;
use async_trait::async_trait;
use std::time::Duration;

/// Classified result of one copy invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum CopyOutcome {
    /// The image now exists at the destination.
    Copied,
    /// A registry quota refused the transfer; retry after backing off.
    RateLimited(Option<Duration>),
    /// The source reference does not exist; retrying cannot help.
    NotFound,
    /// Network trouble, timeout, or an unclassified failure; retryable.
    Transient(String),
}

/// The only component allowed to invoke the external copy capability.
#[async_trait]
pub trait CopyExecutor: Send + Sync {
    async fn copy(&self, source: &str, target: &str) -> CopyOutcome;
}

/// Executor backed by the `regctl image copy` CLI.
pub struct RegctlExecutor {
    output: OutputManager,
    timeout: Duration,
}

impl RegctlExecutor {
    pub fn new(output: OutputManager) -> Self {
        Self {
            output,
            timeout: Duration::from_secs(300),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl CopyExecutor for RegctlExecutor {
    async fn copy(&self, source: &str, target: &str) -> CopyOutcome {
        let mut command = tokio::process::Command::new("regctl");
        command
            .arg("image")
            .arg("copy")
            .arg("--digest-tags")
            .arg("--include-external")
            .arg("--referrers")
            .arg(source)
            .arg(target)
            .kill_on_drop(true);

        self.output
            .debug(&format!("regctl image copy {} {}", source, target));

        let result = tokio::time::timeout(self.timeout, command.output()).await;
        match result {
            Ok(Ok(output)) if output.status.success() => CopyOutcome::Copied,
            Ok(Ok(output)) => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                classify_copy_failure(&stderr)
            }
            Ok(Err(e)) => CopyOutcome::Transient(format!("failed to run regctl: {}", e)),
            Err(_) => CopyOutcome::Transient(format!(
                "copy of {} timed out after {}s",
                source,
                self.timeout.as_secs()
            )),
        }
    }
}

/// Map regctl's stderr to an outcome. The tool reports registry errors as
/// free text, so this matches the distribution-spec error codes and the
/// phrasing Docker Hub and GHCR actually emit.
pub fn classify_copy_failure(stderr: &str) -> CopyOutcome {
    let lowered = stderr.to_lowercase();
    if lowered.contains("toomanyrequests")
        || lowered.contains("too many requests")
        || lowered.contains("rate limit")
        || lowered.contains("429")
    {
        CopyOutcome::RateLimited(None)
    } else if lowered.contains("manifest unknown")
        || lowered.contains("name unknown")
        || lowered.contains("not found")
        || lowered.contains("repository does not exist")
    {
        CopyOutcome::NotFound
    } else {
        let tail: String = stderr.lines().last().unwrap_or("unknown failure").into();
        CopyOutcome::Transient(tail)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_rate_limit_phrasings() {
        let hub = "Error: toomanyrequests: You have reached your pull rate limit.";
        assert_eq!(classify_copy_failure(hub), CopyOutcome::RateLimited(None));
        assert_eq!(
            classify_copy_failure("HTTP 429 Too Many Requests"),
            CopyOutcome::RateLimited(None)
        );
    }

    #[test]
    fn test_classify_missing_source() {
        assert_eq!(
            classify_copy_failure("failed to get manifest: manifest unknown"),
            CopyOutcome::NotFound
        );
        assert_eq!(
            classify_copy_failure("requested image not found in the registry"),
            CopyOutcome::NotFound
        );
    }

    #[test]
    fn test_classify_unknown_failure_is_transient() {
        match classify_copy_failure("connection reset by peer") {
            CopyOutcome::Transient(msg) => assert!(msg.contains("connection reset")),
            other => panic!("expected transient, got {:?}", other),
        }
    }
}
