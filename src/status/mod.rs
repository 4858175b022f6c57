//! Status snapshot generation for the dashboard
//!
//! The snapshot is rebuilt every run by merging this run's results into the
//! previous snapshot: entries for (name, version) pairs touched this run are
//! replaced, entries for images out of scope are left alone. The file is
//! written with write-temp-then-rename so a concurrently reading dashboard
//! never sees a partial document.

use crate::error::{MirrorError, Result};
use crate::sync::{SyncResult, SyncStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SnapshotEntry {
    pub name: String,
    pub source: String,
    pub target: String,
    pub version: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub synced_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub updated_at: DateTime<Utc>,
    pub registry: String,
    pub owner: String,
    pub total_images: usize,
    pub images: Vec<SnapshotEntry>,
}

pub struct StatusReportBuilder {
    path: PathBuf,
}

impl StatusReportBuilder {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Prior snapshot, if one exists and parses. A corrupt or missing prior
    /// file degrades to an empty baseline rather than failing the run.
    pub fn load_previous(&self) -> Option<StatusSnapshot> {
        let raw = std::fs::read_to_string(&self.path).ok()?;
        serde_json::from_str(&raw).ok()
    }

    /// Merge this run's successes and skips into the prior snapshot and
    /// persist the result atomically.
    pub fn write(
        &self,
        registry: &str,
        owner: &str,
        results: &[SyncResult],
    ) -> Result<StatusSnapshot> {
        let snapshot = self.build(registry, owner, results);

        let raw = serde_json::to_string_pretty(&snapshot)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, raw)
            .map_err(|e| MirrorError::Persistence(format!("cannot write {}: {}", tmp.display(), e)))?;
        std::fs::rename(&tmp, &self.path).map_err(|e| {
            MirrorError::Persistence(format!("cannot replace {}: {}", self.path.display(), e))
        })?;

        Ok(snapshot)
    }

    pub fn build(&self, registry: &str, owner: &str, results: &[SyncResult]) -> StatusSnapshot {
        // Keyed merge keeps the snapshot independent of task completion
        // order and of how many runs it took to accumulate the entries.
        let mut entries: BTreeMap<(String, String), SnapshotEntry> = BTreeMap::new();
        if let Some(previous) = self.load_previous() {
            for entry in previous.images {
                entries.insert((entry.name.clone(), entry.version.clone()), entry);
            }
        }

        for result in results {
            let key = (result.task.name.clone(), result.task.version.clone());
            match result.status {
                SyncStatus::Success => {
                    entries.insert(
                        key,
                        SnapshotEntry {
                            name: result.task.name.clone(),
                            source: result.task.source_ref.clone(),
                            target: result.task.target_ref.clone(),
                            version: result.task.version.clone(),
                            description: result.task.description.clone(),
                            synced_at: result.synced_at,
                        },
                    );
                }
                SyncStatus::Skipped => {
                    // A skip means the tag is already mirrored; record it if
                    // the prior snapshot never saw it, keep it otherwise.
                    entries.entry(key).or_insert_with(|| SnapshotEntry {
                        name: result.task.name.clone(),
                        source: result.task.source_ref.clone(),
                        target: result.task.target_ref.clone(),
                        version: result.task.version.clone(),
                        description: result.task.description.clone(),
                        synced_at: result.synced_at,
                    });
                }
                SyncStatus::Failed => {}
            }
        }

        let images: Vec<SnapshotEntry> = entries.into_values().collect();
        let total_images = images
            .iter()
            .map(|entry| entry.name.as_str())
            .collect::<HashSet<_>>()
            .len();

        StatusSnapshot {
            updated_at: Utc::now(),
            registry: registry.to_string(),
            owner: owner.to_string(),
            total_images,
            images,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::SyncTask;

    fn result(name: &str, version: &str, status: SyncStatus) -> SyncResult {
        SyncResult {
            task: SyncTask {
                name: name.to_string(),
                source_ref: format!("{}:{}", name, version),
                target_repository: format!("someone/{}", name.replace('/', "__")),
                target_ref: format!("ghcr.io/someone/{}:{}", name.replace('/', "__"), version),
                version: version.to_string(),
                description: String::new(),
            },
            status,
            error_kind: None,
            attempts: 1,
            synced_at: match status {
                SyncStatus::Success => Some(Utc::now()),
                _ => None,
            },
        }
    }

    #[test]
    fn test_build_counts_distinct_names() {
        let dir = tempfile::tempdir().unwrap();
        let builder = StatusReportBuilder::new(dir.path().join("images.json"));
        let results = vec![
            result("library/postgres", "15.0", SyncStatus::Success),
            result("library/postgres", "16.1", SyncStatus::Success),
            result("library/nginx", "1.29.5-alpine", SyncStatus::Success),
        ];
        let snapshot = builder.build("ghcr.io", "someone", &results);
        assert_eq!(snapshot.images.len(), 3);
        assert_eq!(snapshot.total_images, 2);
    }

    #[test]
    fn test_failed_results_are_not_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let builder = StatusReportBuilder::new(dir.path().join("images.json"));
        let results = vec![
            result("library/nginx", "1.0", SyncStatus::Success),
            result("library/gone", "1.0", SyncStatus::Failed),
        ];
        let snapshot = builder.build("ghcr.io", "someone", &results);
        assert_eq!(snapshot.images.len(), 1);
        assert_eq!(snapshot.images[0].name, "library/nginx");
    }

    #[test]
    fn test_merge_keeps_untouched_entries_and_replaces_targeted() {
        let dir = tempfile::tempdir().unwrap();
        let builder = StatusReportBuilder::new(dir.path().join("images.json"));

        builder
            .write(
                "ghcr.io",
                "someone",
                &[
                    result("library/nginx", "1.29.4-alpine", SyncStatus::Success),
                    result("library/redis", "7.2", SyncStatus::Success),
                ],
            )
            .unwrap();

        // Second run touches only nginx with a newer version.
        let snapshot = builder
            .write(
                "ghcr.io",
                "someone",
                &[result("library/nginx", "1.29.5-alpine", SyncStatus::Success)],
            )
            .unwrap();

        let names: Vec<(&str, &str)> = snapshot
            .images
            .iter()
            .map(|e| (e.name.as_str(), e.version.as_str()))
            .collect();
        assert!(names.contains(&("library/redis", "7.2")));
        assert!(names.contains(&("library/nginx", "1.29.4-alpine")));
        assert!(names.contains(&("library/nginx", "1.29.5-alpine")));
        assert_eq!(snapshot.total_images, 2);
    }

    #[test]
    fn test_skip_preserves_prior_synced_at() {
        let dir = tempfile::tempdir().unwrap();
        let builder = StatusReportBuilder::new(dir.path().join("images.json"));

        let first = builder
            .write(
                "ghcr.io",
                "someone",
                &[result("library/nginx", "1.0", SyncStatus::Success)],
            )
            .unwrap();
        let original_stamp = first.images[0].synced_at;
        assert!(original_stamp.is_some());

        // Idempotent re-run: the tag already exists, so the task is skipped
        // and the prior entry survives untouched.
        let second = builder
            .write(
                "ghcr.io",
                "someone",
                &[result("library/nginx", "1.0", SyncStatus::Skipped)],
            )
            .unwrap();
        assert_eq!(second.images[0].synced_at, original_stamp);
        assert_eq!(second.images.len(), 1);
    }

    #[test]
    fn test_write_is_atomic_and_reloadable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("images.json");
        let builder = StatusReportBuilder::new(&path);

        builder
            .write(
                "ghcr.io",
                "someone",
                &[result("library/nginx", "1.0", SyncStatus::Success)],
            )
            .unwrap();

        assert!(path.exists());
        assert!(!path.with_extension("json.tmp").exists());
        let reloaded = builder.load_previous().unwrap();
        assert_eq!(reloaded.registry, "ghcr.io");
        assert_eq!(reloaded.total_images, 1);
    }

    #[test]
    fn test_corrupt_previous_snapshot_degrades_to_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("images.json");
        std::fs::write(&path, "{ not json").unwrap();
        let builder = StatusReportBuilder::new(&path);
        assert!(builder.load_previous().is_none());
        let snapshot = builder.build("ghcr.io", "someone", &[]);
        assert!(snapshot.images.is_empty());
    }
}
