//! Command runners for the update, sync, and combined flows

use crate::cli::args::{Args, Command};
use crate::error::Result;
use crate::manifest::{Manifest, ManifestStore, VersionRecord};
use crate::output::OutputManager;
use crate::registry::{DestinationAdapter, HubAdapter, RegistryAdapter};
use crate::resolver::{self, version_key, Resolution};
use crate::status::StatusReportBuilder;
use crate::sync::{RegctlExecutor, SyncOptions, SyncOrchestrator, SyncTask, SyncTotals};
use chrono::Utc;
use futures::stream::{self, StreamExt};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Environment variable holding a caller-supplied destination token. Passed
/// through to the destination adapter as-is.
const TOKEN_ENV: &str = "REGISTRY_MIRROR_TOKEN";

#[derive(Debug, Default, Clone, Copy)]
struct UpdateTotals {
    updated: usize,
    unchanged: usize,
    failed: usize,
}

struct SyncPhase {
    owner: String,
    registry: String,
    output_path: PathBuf,
    options: SyncOptions,
    continue_on_error: bool,
}

pub struct Runner {
    args: Args,
    output: OutputManager,
}

impl Runner {
    pub fn new(args: Args) -> Self {
        let output = OutputManager::new(args.debug);
        Self { args, output }
    }

    /// Execute the selected subcommand. `Ok(true)` means a clean run for
    /// exit-status purposes; failures of individual images only produce
    /// `Ok(false)` (governed by continue-on-error), while persistence
    /// problems surface as `Err` and are always fatal.
    pub async fn run(&self) -> Result<bool> {
        match &self.args.command {
            Command::Update {
                dry_run,
                max_workers,
                no_concurrency,
            } => {
                self.output.section("Updating image manifest");
                let hub: Arc<dyn RegistryAdapter> = Arc::new(HubAdapter::new()?);
                let totals = self
                    .update_phase(hub, *dry_run, effective_workers(*max_workers, *no_concurrency))
                    .await?;
                Ok(totals.failed == 0)
            }
            Command::Sync {
                owner,
                registry,
                output,
                max_workers,
                max_retries,
                retry_delay,
                continue_on_error,
                no_concurrency,
            } => {
                self.output.section("Syncing images to destination registry");
                self.output
                    .info(&format!("Target: {}/{}", registry, owner));
                let phase = SyncPhase {
                    owner: owner.clone(),
                    registry: registry.clone(),
                    output_path: output.clone(),
                    options: SyncOptions {
                        max_workers: effective_workers(*max_workers, *no_concurrency),
                        max_retries: *max_retries,
                        retry_delay: retry_delay_duration(*retry_delay),
                        check_exist: true,
                        dry_run: false,
                    },
                    continue_on_error: *continue_on_error,
                };
                self.sync_phase(phase).await
            }
            Command::Run {
                owner,
                registry,
                output,
                dry_run,
                continue_on_error,
                max_workers,
                max_workers_sync,
                max_retries,
                retry_delay,
                no_concurrency,
            } => {
                self.output.section("Step 1/2: updating image manifest");
                let hub: Arc<dyn RegistryAdapter> = Arc::new(HubAdapter::new()?);
                let totals = self
                    .update_phase(hub, *dry_run, effective_workers(*max_workers, *no_concurrency))
                    .await?;
                if totals.failed > 0 && !continue_on_error {
                    self.output
                        .error("update step failed; skipping sync (use --continue-on-error to override)");
                    return Ok(false);
                }

                self.output.section("Step 2/2: syncing images");
                let phase = SyncPhase {
                    owner: owner.clone(),
                    registry: registry.clone(),
                    output_path: output.clone(),
                    options: SyncOptions {
                        max_workers: effective_workers(*max_workers_sync, *no_concurrency),
                        max_retries: *max_retries,
                        retry_delay: retry_delay_duration(*retry_delay),
                        check_exist: true,
                        dry_run: *dry_run,
                    },
                    continue_on_error: *continue_on_error,
                };
                let clean = self.sync_phase(phase).await?;
                self.output.success(&format!(
                    "Full flow finished in {}",
                    self.output.elapsed_time()
                ));
                Ok(clean && (totals.failed == 0 || *continue_on_error))
            }
        }
    }

    /// Update phase: resolve the latest matching versions for every enabled
    /// image, then merge the findings into the manifest in a single-threaded
    /// step and save it. Resolution failures are recorded per image and
    /// never abort the phase.
    async fn update_phase(
        &self,
        hub: Arc<dyn RegistryAdapter>,
        dry_run: bool,
        workers: usize,
    ) -> Result<UpdateTotals> {
        let store = ManifestStore::new(&self.args.manifest);
        let mut manifest = store.load()?;
        for repo in manifest.dedupe_images() {
            self.output
                .warning(&format!("duplicate manifest entry for {} ignored", repo));
        }

        let default_retention = manifest.config.retention.clone();

        // Concurrent, read-only resolution; the manifest itself is only
        // touched after all workers have joined.
        let mut outcomes: Vec<(usize, Result<Resolution>)> =
            stream::iter(manifest.images.iter().enumerate().filter(|(_, img)| img.enabled))
                .map(|(idx, img)| {
                    let hub = hub.clone();
                    let retention = default_retention.clone();
                    async move {
                        let outcome = match hub.list_tags(img.repository()).await {
                            Ok(tags) => resolver::resolve(img, &retention, &tags),
                            Err(e) => Err(e),
                        };
                        (idx, outcome)
                    }
                })
                .buffer_unordered(workers)
                .collect()
                .await;
        outcomes.sort_by_key(|(idx, _)| *idx);

        let now = Utc::now();
        let mut totals = UpdateTotals::default();
        let mut pin_advances: Vec<(usize, String)> = Vec::new();
        let mut version_merges: Vec<(String, Vec<String>)> = Vec::new();

        for (idx, outcome) in outcomes {
            let img = &manifest.images[idx];
            let repository = img.repository().to_string();

            let resolution = match outcome {
                Ok(resolution) => resolution,
                Err(e) => {
                    totals.failed += 1;
                    self.output
                        .error(&format!("{}: update failed: {} ({})", repository, e, e.kind()));
                    continue;
                }
            };

            if img.sync_all_matching {
                let discovered: Vec<VersionRecord> = resolution
                    .tags
                    .iter()
                    .map(|tag| VersionRecord {
                        tag: tag.clone(),
                        discovered_at: now,
                    })
                    .collect();
                for record in &discovered {
                    self.output.info(&format!(
                        "{}: 🆕 discovered version {}",
                        repository, record.tag
                    ));
                }
                self.report_stale(&repository, &resolution, img.retention(&default_retention).cleanup_old_versions);

                if img.versions != resolution.retained {
                    version_merges.push((repository.clone(), resolution.retained.clone()));
                    totals.updated += 1;
                } else {
                    self.output
                        .verbose(&format!("{}: no new versions", repository));
                    totals.unchanged += 1;
                }
            } else {
                let advance = match (img.pinned_tag(), resolution.latest.as_deref()) {
                    (_, None) => None,
                    (None, Some(latest)) => Some(latest.to_string()),
                    (Some(pin), Some(latest))
                        if latest != pin && version_key(latest) > version_key(pin) =>
                    {
                        Some(latest.to_string())
                    }
                    _ => None,
                };

                match advance {
                    Some(latest) => {
                        self.output.info(&format!(
                            "{}: 🔄 {} -> {}",
                            repository,
                            img.pinned_tag().unwrap_or("(none)"),
                            latest
                        ));
                        pin_advances.push((idx, latest));
                        totals.updated += 1;
                    }
                    None => {
                        if resolution.latest.is_none() {
                            self.output
                                .warning(&format!("{}: no tags match the configured patterns", repository));
                        } else {
                            self.output
                                .verbose(&format!("{}: already at the latest version", repository));
                        }
                        totals.unchanged += 1;
                    }
                }
            }
        }

        // Single-threaded merge step; workers never write the manifest.
        if !dry_run {
            for (idx, latest) in pin_advances {
                manifest.images[idx].set_pinned_tag(&latest);
            }
            for (repository, retained) in version_merges {
                manifest.merge_versions(&repository, &retained);
            }
            manifest.config.last_checked = Some(now);
            store.save(&manifest)?;
            self.output
                .verbose(&format!("manifest saved: {}", store.path().display()));
        } else if totals.updated > 0 {
            self.output
                .info("dry-run: manifest left unmodified");
        }

        self.output.summary(
            "Update results",
            &[
                ("Updated", totals.updated.to_string()),
                ("Unchanged", totals.unchanged.to_string()),
                ("Failed", totals.failed.to_string()),
            ],
        );

        Ok(totals)
    }

    /// Sync phase: resolve the full target set per image, drive the copy
    /// worker pool, and rebuild the status snapshot. The snapshot is written
    /// even when some tasks failed, so everything that did succeed is
    /// recorded; continue-on-error only governs the exit status.
    async fn sync_phase(&self, phase: SyncPhase) -> Result<bool> {
        let store = ManifestStore::new(&self.args.manifest);
        let mut manifest = store.load()?;
        for repo in manifest.dedupe_images() {
            self.output
                .warning(&format!("duplicate manifest entry for {} ignored", repo));
        }

        let hub = HubAdapter::new()?;
        let token = std::env::var(TOKEN_ENV).ok();
        let destination = Arc::new(DestinationAdapter::new(&phase.registry, token)?);

        let (tasks, resolution_failures) = self
            .collect_tasks(&manifest, &hub, &phase.owner, &phase.registry)
            .await;

        if tasks.is_empty() {
            self.output.warning("nothing to sync");
        } else {
            self.output
                .info(&format!("🚀 syncing {} image versions", tasks.len()));
        }

        let options = SyncOptions {
            check_exist: manifest.config.check_exist,
            ..phase.options
        };
        let dry_run = options.dry_run;
        let executor = Arc::new(RegctlExecutor::new(self.output.clone()));
        let orchestrator =
            SyncOrchestrator::new(executor, destination, options, self.output.clone());
        let results = orchestrator.execute(tasks).await;
        let totals = SyncTotals::from_results(&results);

        self.output.summary(
            "Sync results",
            &[
                ("Success", totals.success.to_string()),
                ("Skipped", totals.skipped.to_string()),
                ("Failed", totals.failed.to_string()),
                ("Resolution failures", resolution_failures.to_string()),
            ],
        );

        if manifest.config.update_index && !dry_run {
            let builder = StatusReportBuilder::new(&phase.output_path);
            let snapshot = builder.write(&phase.registry, &phase.owner, &results)?;
            self.output.success(&format!(
                "Generated {} ({} images)",
                builder.path().display(),
                snapshot.total_images
            ));
        }

        let clean = totals.failed == 0 && resolution_failures == 0;
        Ok(clean || phase.continue_on_error)
    }

    /// Build the task list for one sync run. Single-latest images target
    /// their pinned tag; all-matching images target every retained version
    /// from a fresh resolution. An image whose resolution fails is excluded
    /// from the run and counted, never silently dropped.
    async fn collect_tasks(
        &self,
        manifest: &Manifest,
        hub: &dyn RegistryAdapter,
        owner: &str,
        registry: &str,
    ) -> (Vec<SyncTask>, usize) {
        let mut tasks = Vec::new();
        let mut failures = 0;
        let default_retention = manifest.config.retention.clone();

        for img in manifest.images.iter().filter(|img| img.enabled) {
            if !img.sync_all_matching {
                let version = img.pinned_tag().unwrap_or("latest");
                tasks.push(SyncTask::new(img, version, registry, owner));
                continue;
            }

            let repository = img.repository();
            self.output
                .verbose(&format!("🔍 fetching matching versions for {}", repository));
            let resolution = match hub.list_tags(repository).await {
                Ok(tags) => resolver::resolve(img, &default_retention, &tags),
                Err(e) => Err(e),
            };
            match resolution {
                Ok(resolution) => {
                    if resolution.retained.is_empty() {
                        self.output
                            .warning(&format!("{}: no matching versions found", repository));
                    }
                    for version in &resolution.retained {
                        tasks.push(SyncTask::new(img, version, registry, owner));
                    }
                    self.report_stale(
                        repository,
                        &resolution,
                        img.retention(&default_retention).cleanup_old_versions,
                    );
                }
                Err(e) => {
                    failures += 1;
                    self.output.error(&format!(
                        "{}: resolution failed, excluded from this run: {} ({})",
                        repository,
                        e,
                        e.kind()
                    ));
                }
            }
        }

        (tasks, failures)
    }

    /// Report retention overflow. Deletion is never performed here; even
    /// with cleanup_old_versions set this only surfaces the intent.
    fn report_stale(&self, repository: &str, resolution: &Resolution, cleanup_requested: bool) {
        if resolution.stale.is_empty() {
            return;
        }
        let list = resolution.stale.join(", ");
        if cleanup_requested {
            self.output.warning(&format!(
                "{}: {} versions beyond retention, cleanup requested (advisory only): {}",
                repository,
                resolution.stale.len(),
                list
            ));
        } else {
            self.output.verbose(&format!(
                "{}: {} versions beyond retention: {}",
                repository,
                resolution.stale.len(),
                list
            ));
        }
    }
}

fn effective_workers(max_workers: usize, no_concurrency: bool) -> usize {
    if no_concurrency {
        1
    } else {
        max_workers.max(1)
    }
}

/// Clamp a user-supplied delay to non-negative before building a Duration;
/// `Duration::from_secs_f64` panics on negative input.
fn retry_delay_duration(seconds: f64) -> Duration {
    Duration::from_secs_f64(seconds.max(0.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MirrorError;
    use async_trait::async_trait;
    use clap::Parser;

    /// Hub fake serving canned tag listings per repository.
    struct FakeHub {
        listings: Vec<(String, Vec<String>)>,
    }

    impl FakeHub {
        fn new(listings: &[(&str, &[&str])]) -> Arc<dyn RegistryAdapter> {
            Arc::new(Self {
                listings: listings
                    .iter()
                    .map(|(repo, tags)| {
                        (
                            repo.to_string(),
                            tags.iter().map(|t| t.to_string()).collect(),
                        )
                    })
                    .collect(),
            })
        }
    }

    #[async_trait]
    impl RegistryAdapter for FakeHub {
        async fn list_tags(&self, repository: &str) -> Result<Vec<String>> {
            self.listings
                .iter()
                .find(|(repo, _)| repo == repository)
                .map(|(_, tags)| tags.clone())
                .ok_or_else(|| MirrorError::NotFound(repository.to_string()))
        }

        async fn exists(&self, repository: &str, tag: &str) -> Result<bool> {
            Ok(self.list_tags(repository).await?.iter().any(|t| t == tag))
        }
    }

    fn runner(manifest_path: &std::path::Path) -> Runner {
        let args = Args::parse_from([
            "registry-mirror",
            "update",
            "--manifest",
            manifest_path.to_str().unwrap(),
        ]);
        Runner {
            args,
            output: OutputManager::new_quiet(),
        }
    }

    fn write_manifest(dir: &std::path::Path, body: &str) -> std::path::PathBuf {
        let path = dir.join("images-manifest.yml");
        std::fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn test_effective_workers() {
        assert_eq!(effective_workers(5, false), 5);
        assert_eq!(effective_workers(5, true), 1);
        assert_eq!(effective_workers(0, false), 1);
    }

    #[test]
    fn test_retry_delay_clamps_negative_to_zero() {
        assert_eq!(retry_delay_duration(-1.0), Duration::ZERO);
        assert_eq!(retry_delay_duration(0.0), Duration::ZERO);
        assert_eq!(retry_delay_duration(2.5), Duration::from_secs_f64(2.5));
    }

    #[tokio::test]
    async fn test_update_advances_pin_and_stamps_last_checked() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_manifest(
            dir.path(),
            r#"
images:
  - source: library/nginx:1.29.4-alpine
    tag_pattern: '[0-9]+\.[0-9]+\.[0-9]+-alpine'
"#,
        );
        let hub = FakeHub::new(&[(
            "library/nginx",
            &["1.29.4-alpine", "1.29.5-alpine", "latest"],
        )]);

        let runner = runner(&path);
        let totals = runner.update_phase(hub, false, 1).await.unwrap();
        assert_eq!(totals.updated, 1);
        assert_eq!(totals.failed, 0);

        let saved = ManifestStore::new(&path).load().unwrap();
        assert_eq!(saved.images[0].source, "library/nginx:1.29.5-alpine");
        assert!(saved.config.last_checked.is_some());
    }

    #[tokio::test]
    async fn test_update_never_moves_pin_backwards() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_manifest(
            dir.path(),
            r#"
images:
  - source: library/nginx:1.29.4-alpine
    tag_pattern: '[0-9]+\.[0-9]+\.[0-9]+-alpine'
"#,
        );
        // Upstream only offers an older sibling next to the pin.
        let hub = FakeHub::new(&[("library/nginx", &["1.29.3-alpine", "1.29.4-alpine"])]);

        let runner = runner(&path);
        let totals = runner.update_phase(hub, false, 1).await.unwrap();
        assert_eq!(totals.updated, 0);
        assert_eq!(totals.unchanged, 1);

        let saved = ManifestStore::new(&path).load().unwrap();
        assert_eq!(saved.images[0].source, "library/nginx:1.29.4-alpine");
    }

    #[tokio::test]
    async fn test_update_merges_retained_versions() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_manifest(
            dir.path(),
            r#"
images:
  - source: library/postgres
    sync_all_matching: true
    tag_pattern: '[0-9]+\.[0-9]+'
    versions: ["14.2", "15.0"]
"#,
        );
        let hub = FakeHub::new(&[("library/postgres", &["16.1", "15.0", "14.2"])]);

        let runner = runner(&path);
        let totals = runner.update_phase(hub, false, 1).await.unwrap();
        assert_eq!(totals.updated, 1);

        let saved = ManifestStore::new(&path).load().unwrap();
        assert_eq!(
            saved.images[0].versions,
            vec!["14.2".to_string(), "15.0".to_string(), "16.1".to_string()]
        );
    }

    #[tokio::test]
    async fn test_update_dry_run_leaves_manifest_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_manifest(
            dir.path(),
            r#"
images:
  - source: library/nginx:1.29.4-alpine
    tag_pattern: '[0-9]+\.[0-9]+\.[0-9]+-alpine'
"#,
        );
        let before = std::fs::read_to_string(&path).unwrap();
        let hub = FakeHub::new(&[("library/nginx", &["1.29.4-alpine", "1.29.5-alpine"])]);

        let runner = runner(&path);
        let totals = runner.update_phase(hub, true, 1).await.unwrap();
        assert_eq!(totals.updated, 1);

        assert_eq!(std::fs::read_to_string(&path).unwrap(), before);
        let saved = ManifestStore::new(&path).load().unwrap();
        assert!(saved.config.last_checked.is_none());
    }

    #[tokio::test]
    async fn test_update_counts_resolution_failures_without_aborting() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_manifest(
            dir.path(),
            r#"
images:
  - source: library/gone:1.0
  - source: library/nginx:1.29.4-alpine
    tag_pattern: '[0-9]+\.[0-9]+\.[0-9]+-alpine'
"#,
        );
        // FakeHub has no listing for library/gone, so its lookup fails.
        let hub = FakeHub::new(&[("library/nginx", &["1.29.4-alpine", "1.29.5-alpine"])]);

        let runner = runner(&path);
        let totals = runner.update_phase(hub, false, 2).await.unwrap();
        assert_eq!(totals.failed, 1);
        assert_eq!(totals.updated, 1);

        let saved = ManifestStore::new(&path).load().unwrap();
        assert_eq!(saved.images[1].source, "library/nginx:1.29.5-alpine");
    }
}
