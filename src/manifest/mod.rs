//! Declarative image manifest: loading, validation, and persistence
//!
//! The manifest is the sole source of desired state. It is loaded fresh for
//! every invocation, mutated only by the update phase's single-threaded merge
//! step, and written back atomically so a half-written file is never observed.

use crate::error::{MirrorError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

fn default_true() -> bool {
    true
}

/// Policy limiting how many versions of one image are tracked.
///
/// `max_versions = 0` means unlimited. Versions beyond the limit are only
/// reported as cleanup candidates; nothing is deleted unless
/// `cleanup_old_versions` is set, and even then removal is an intent surfaced
/// to the operator, not an action this tool takes.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Retention {
    #[serde(default)]
    pub max_versions: usize,
    #[serde(default)]
    pub cleanup_old_versions: bool,
}

/// One image to mirror, as declared in the manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageSpec {
    /// `repository:tag` reference; the tag acts as a version pin and may be
    /// absent.
    pub source: String,

    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default)]
    pub description: String,

    /// Full-string regex an upstream tag must match to be eligible.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag_pattern: Option<String>,

    /// Full-string regex that disqualifies an otherwise matching tag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exclude_pattern: Option<String>,

    /// Mirror every matching tag instead of only the single latest.
    #[serde(default)]
    pub sync_all_matching: bool,

    /// Advisory metadata for humans; not enforced anywhere.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_range: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retention: Option<Retention>,

    /// Versions known to have been discovered for this image, maintained by
    /// the update phase.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub versions: Vec<String>,
}

impl ImageSpec {
    /// Repository part of `source`, without any tag.
    pub fn repository(&self) -> &str {
        match self.source.split_once(':') {
            Some((repo, _)) => repo,
            None => &self.source,
        }
    }

    /// The pinned tag, if `source` carries one.
    pub fn pinned_tag(&self) -> Option<&str> {
        self.source.split_once(':').map(|(_, tag)| tag)
    }

    /// Destination repository name. Nested source paths are flattened with
    /// `__` so `library/nginx` lands in a single-level destination repo.
    pub fn destination_repository(&self) -> String {
        self.repository().replace('/', "__")
    }

    /// Re-pin `source` to a new tag, keeping the repository.
    pub fn set_pinned_tag(&mut self, tag: &str) {
        self.source = format!("{}:{}", self.repository(), tag);
    }

    pub fn retention<'a>(&'a self, default: &'a Retention) -> &'a Retention {
        self.retention.as_ref().unwrap_or(default)
    }
}

/// A version discovered upstream during an update run. Ephemeral: recomputed
/// from the live tag listing each run, only the tag itself is persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct VersionRecord {
    pub tag: String,
    pub discovered_at: DateTime<Utc>,
}

/// Global sync configuration carried in the manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalConfig {
    #[serde(default = "GlobalConfig::default_registry")]
    pub registry: String,

    #[serde(default)]
    pub owner: String,

    /// Check the destination before copying so already-present tags are
    /// skipped instead of re-copied.
    #[serde(default = "default_true")]
    pub check_exist: bool,

    /// Whether sync runs regenerate the status snapshot.
    #[serde(default = "default_true")]
    pub update_index: bool,

    /// Retention applied to images that do not declare their own.
    #[serde(default)]
    pub retention: Retention,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_checked: Option<DateTime<Utc>>,
}

impl GlobalConfig {
    fn default_registry() -> String {
        "ghcr.io".to_string()
    }
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            registry: Self::default_registry(),
            owner: String::new(),
            check_exist: true,
            update_index: true,
            retention: Retention::default(),
            last_checked: None,
        }
    }
}

/// The declarative image list plus global configuration.
///
/// Unknown fields in the file are ignored, not fatal, so the schema can grow
/// without breaking older binaries.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Manifest {
    #[serde(default)]
    pub images: Vec<ImageSpec>,
    #[serde(default)]
    pub config: GlobalConfig,
}

impl Manifest {
    /// Drop later duplicates of the same source repository, returning the
    /// repositories that were removed so the caller can warn about them.
    pub fn dedupe_images(&mut self) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut dropped = Vec::new();
        self.images.retain(|img| {
            if seen.insert(img.repository().to_string()) {
                true
            } else {
                dropped.push(img.repository().to_string());
                false
            }
        });
        dropped
    }

    /// Merge newly discovered versions into an image's known-version list and
    /// trim it to the retained set. Called single-threaded after all
    /// resolution work has joined; workers never touch the manifest.
    pub fn merge_versions(&mut self, repository: &str, retained: &[String]) -> bool {
        if let Some(img) = self
            .images
            .iter_mut()
            .find(|img| img.repository() == repository)
        {
            if img.versions != retained {
                img.versions = retained.to_vec();
                return true;
            }
        }
        false
    }
}

/// Loads and persists the manifest file. Owns the manifest for the lifetime
/// of one CLI invocation; there are no concurrent writers.
pub struct ManifestStore {
    path: PathBuf,
}

impl ManifestStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<Manifest> {
        let raw = std::fs::read_to_string(&self.path).map_err(|e| {
            MirrorError::Persistence(format!("cannot read {}: {}", self.path.display(), e))
        })?;
        let manifest: Manifest = serde_yaml::from_str(&raw).map_err(|e| {
            MirrorError::Persistence(format!("cannot parse {}: {}", self.path.display(), e))
        })?;
        Ok(manifest)
    }

    /// Write-temp-then-rename so a crash mid-write never corrupts the file.
    pub fn save(&self, manifest: &Manifest) -> Result<()> {
        let raw = serde_yaml::to_string(manifest)?;
        let tmp = self.path.with_extension("yml.tmp");
        std::fs::write(&tmp, raw).map_err(|e| {
            MirrorError::Persistence(format!("cannot write {}: {}", tmp.display(), e))
        })?;
        std::fs::rename(&tmp, &self.path).map_err(|e| {
            MirrorError::Persistence(format!("cannot replace {}: {}", self.path.display(), e))
        })?;
        Ok(())
    }
}
