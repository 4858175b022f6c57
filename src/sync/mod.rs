//! Sync orchestration: bounded-concurrency copy execution with retries
//!
//! The orchestrator drives one copy task per (image, resolved tag) pair
//! through a fixed-size worker pool. Each task runs a small retry state
//! machine (pending → in-flight → success | retryable-failure → pending |
//! terminal-failure); backoff sleeps hold no shared state, so cancelling the
//! run simply drops queued-but-unstarted tasks.

pub mod executor;

pub use executor::{classify_copy_failure, CopyExecutor, CopyOutcome, RegctlExecutor};

use crate::error::ErrorKind;
use crate::manifest::ImageSpec;
use crate::output::OutputManager;
use crate::registry::RegistryAdapter;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// One unit of copy work. Immutable once dispatched.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SyncTask {
    /// Source repository, e.g. `library/nginx`.
    pub name: String,
    /// Full source reference, e.g. `library/nginx:1.29.5-alpine`.
    pub source_ref: String,
    /// Destination repository path, e.g. `someone/library__nginx`.
    pub target_repository: String,
    /// Full destination reference.
    pub target_ref: String,
    pub version: String,
    pub description: String,
}

impl SyncTask {
    pub fn new(spec: &ImageSpec, version: &str, registry: &str, owner: &str) -> Self {
        let repository = spec.repository();
        let target_repository = format!("{}/{}", owner, spec.destination_repository());
        Self {
            name: repository.to_string(),
            source_ref: format!("{}:{}", repository, version),
            target_ref: format!("{}/{}:{}", registry, target_repository, version),
            target_repository,
            version: version.to_string(),
            description: spec.description.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Success,
    Skipped,
    Failed,
}

/// Outcome of one task, including how many attempts it took.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncResult {
    pub task: SyncTask,
    pub status: SyncStatus,
    pub error_kind: Option<ErrorKind>,
    pub attempts: u32,
    pub synced_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Worker pool size; 1 forces strictly sequential execution, which
    /// matters because the source registry's rate limit is shared across all
    /// in-flight requests.
    pub max_workers: usize,
    /// Total attempts per task, including the first.
    pub max_retries: u32,
    /// Delay between attempts. A server Retry-After hint overrides this when
    /// larger.
    pub retry_delay: Duration,
    /// Probe the destination before copying and record already-present tags
    /// as skipped.
    pub check_exist: bool,
    /// Resolve and report, but issue no destination-mutating calls.
    pub dry_run: bool,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            max_workers: 3,
            max_retries: 3,
            retry_delay: Duration::from_secs(2),
            check_exist: true,
            dry_run: false,
        }
    }
}

/// Aggregated per-run counts.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SyncTotals {
    pub success: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl SyncTotals {
    pub fn from_results(results: &[SyncResult]) -> Self {
        let mut totals = Self::default();
        for result in results {
            match result.status {
                SyncStatus::Success => totals.success += 1,
                SyncStatus::Skipped => totals.skipped += 1,
                SyncStatus::Failed => totals.failed += 1,
            }
        }
        totals
    }
}

pub struct SyncOrchestrator {
    executor: Arc<dyn CopyExecutor>,
    destination: Arc<dyn RegistryAdapter>,
    options: SyncOptions,
    output: OutputManager,
}

impl SyncOrchestrator {
    pub fn new(
        executor: Arc<dyn CopyExecutor>,
        destination: Arc<dyn RegistryAdapter>,
        options: SyncOptions,
        output: OutputManager,
    ) -> Self {
        Self {
            executor,
            destination,
            options,
            output,
        }
    }

    /// Run every task through the worker pool and collect one result per
    /// task. Results are ordered by (name, version), not by completion time,
    /// so the final report is independent of scheduling.
    pub async fn execute(&self, tasks: Vec<SyncTask>) -> Vec<SyncResult> {
        let workers = self.options.max_workers.max(1);
        let mut results: Vec<SyncResult> = stream::iter(tasks)
            .map(|task| self.run_task(task))
            .buffer_unordered(workers)
            .collect()
            .await;

        results.sort_by(|a, b| {
            (a.task.name.as_str(), a.task.version.as_str())
                .cmp(&(b.task.name.as_str(), b.task.version.as_str()))
        });
        results
    }

    async fn run_task(&self, task: SyncTask) -> SyncResult {
        if self.options.dry_run {
            self.output.info(&format!(
                "[dry-run] would copy {} -> {}",
                task.source_ref, task.target_ref
            ));
            return SyncResult {
                task,
                status: SyncStatus::Skipped,
                error_kind: None,
                attempts: 0,
                synced_at: None,
            };
        }

        if self.options.check_exist {
            match self
                .destination
                .exists(&task.target_repository, &task.version)
                .await
            {
                Ok(true) => {
                    self.output.verbose(&format!(
                        "{} already present at destination, skipping",
                        task.target_ref
                    ));
                    return SyncResult {
                        task,
                        status: SyncStatus::Skipped,
                        error_kind: None,
                        attempts: 0,
                        synced_at: None,
                    };
                }
                Ok(false) => {}
                Err(e) => {
                    // The probe is an optimization; the copy itself decides.
                    self.output.warning(&format!(
                        "existence check failed for {}: {}",
                        task.target_ref, e
                    ));
                }
            }
        }

        self.output
            .info(&format!("🔄 {} -> {}", task.source_ref, task.target_ref));

        let mut attempts = 0u32;
        loop {
            attempts += 1;
            let outcome = self
                .executor
                .copy(&task.source_ref, &task.target_ref)
                .await;

            let (kind, hint) = match outcome {
                CopyOutcome::Copied => {
                    self.output
                        .success(&format!("mirrored {}", task.source_ref));
                    return SyncResult {
                        task,
                        status: SyncStatus::Success,
                        error_kind: None,
                        attempts,
                        synced_at: Some(Utc::now()),
                    };
                }
                CopyOutcome::NotFound => {
                    self.output
                        .error(&format!("{} not found upstream", task.source_ref));
                    return SyncResult {
                        task,
                        status: SyncStatus::Failed,
                        error_kind: Some(ErrorKind::NotFound),
                        attempts,
                        synced_at: None,
                    };
                }
                CopyOutcome::RateLimited(hint) => (ErrorKind::RateLimited, hint),
                CopyOutcome::Transient(message) => {
                    self.output.debug(&format!(
                        "copy of {} failed: {}",
                        task.source_ref, message
                    ));
                    (ErrorKind::Transient, None)
                }
            };

            if attempts >= self.options.max_retries {
                self.output.error(&format!(
                    "giving up on {} after {} attempts ({})",
                    task.source_ref, attempts, kind
                ));
                return SyncResult {
                    task,
                    status: SyncStatus::Failed,
                    error_kind: Some(kind),
                    attempts,
                    synced_at: None,
                };
            }

            let delay = match hint {
                Some(hint) if hint > self.options.retry_delay => hint,
                _ => self.options.retry_delay,
            };
            self.output.warning(&format!(
                "attempt {}/{} for {} failed ({}), retrying in {:.1}s",
                attempts,
                self.options.max_retries,
                task.source_ref,
                kind,
                delay.as_secs_f64()
            ));
            tokio::time::sleep(delay).await;
        }
    }
}
