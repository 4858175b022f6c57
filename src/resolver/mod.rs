//! Version resolution: which upstream tags should be synced
//!
//! Resolution is a pure function of one image spec, its known-version list,
//! and the live upstream tag listing. No hidden state, so the same inputs
//! always produce the same sync set regardless of worker count or ordering.

use crate::error::Result;
use crate::manifest::{ImageSpec, Retention};
use regex::Regex;
use std::collections::HashSet;
use std::sync::OnceLock;

/// Outcome of resolving one image against the live tag listing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Resolution {
    /// Tags to sync this run, oldest first.
    pub tags: Vec<String>,
    /// The post-retention known-version list this run establishes.
    pub retained: Vec<String>,
    /// Versions pushed out by retention. Advisory only: cleanup is a
    /// reported intent, never executed by this tool.
    pub stale: Vec<String>,
    /// Newest eligible tag, used by the update phase to advance the pin.
    pub latest: Option<String>,
}

/// Compute the sync set for `spec` from the upstream `tags` listing.
///
/// Filtering keeps a tag iff the include pattern is absent or matches the
/// whole tag, and the exclude pattern is absent or does not match. Both are
/// full-string matches, never substring.
pub fn resolve(spec: &ImageSpec, default_retention: &Retention, tags: &[String]) -> Result<Resolution> {
    let include = spec
        .tag_pattern
        .as_deref()
        .map(full_match_regex)
        .transpose()?;
    let exclude = spec
        .exclude_pattern
        .as_deref()
        .map(full_match_regex)
        .transpose()?;

    let mut seen = HashSet::new();
    let mut filtered: Vec<String> = tags
        .iter()
        .filter(|tag| include.as_ref().map_or(true, |re| re.is_match(tag)))
        .filter(|tag| exclude.as_ref().map_or(true, |re| !re.is_match(tag)))
        .filter(|tag| seen.insert(tag.as_str()))
        .cloned()
        .collect();
    sort_by_version(&mut filtered);

    let selected: Vec<String> = if spec.sync_all_matching {
        filtered
            .iter()
            .filter(|tag| !spec.versions.contains(tag))
            .cloned()
            .collect()
    } else {
        select_latest(&filtered, spec.pinned_tag())
            .into_iter()
            .collect()
    };

    let latest = if spec.sync_all_matching {
        filtered.last().cloned()
    } else {
        selected.first().cloned()
    };

    // Retention trims the union of known and newly selected versions down to
    // the N most recent; anything older becomes a cleanup candidate.
    let mut combined: Vec<String> = spec
        .versions
        .iter()
        .chain(selected.iter())
        .cloned()
        .collect::<HashSet<_>>()
        .into_iter()
        .collect();
    sort_by_version(&mut combined);

    let max = spec.retention(default_retention).max_versions;
    let (stale, retained) = if max > 0 && combined.len() > max {
        let kept = combined.split_off(combined.len() - max);
        (combined, kept)
    } else {
        (Vec::new(), combined)
    };

    let tags_to_sync: Vec<String> = selected
        .into_iter()
        .filter(|tag| retained.contains(tag))
        .collect();

    Ok(Resolution {
        tags: tags_to_sync,
        retained,
        stale,
        latest,
    })
}

/// Newest tag by version order. The currently pinned tag is passed over
/// unless it is the only candidate, so a pin never shadows a newer release
/// that happens to sort equal under a lossy version key.
fn select_latest(sorted: &[String], pinned: Option<&str>) -> Option<String> {
    if sorted.len() > 1 {
        if let Some(pin) = pinned {
            if let Some(tag) = sorted.iter().rev().find(|tag| tag.as_str() != pin) {
                return Some(tag.clone());
            }
        }
    }
    sorted.last().cloned()
}

fn sort_by_version(tags: &mut [String]) {
    tags.sort_by(|a, b| version_key(a).cmp(&version_key(b)));
}

/// Anchor a user pattern so it must match the entire tag.
fn full_match_regex(pattern: &str) -> Result<Regex> {
    Ok(Regex::new(&format!("^(?:{})$", pattern))?)
}

/// Comparable key for a version tag.
///
/// Dot-separated numeric components are compared as integers (a leading `v`
/// is stripped, components after the first `-` are ignored, missing
/// components count as zero). `RELEASE.<date>` tags compare by the embedded
/// date. Tags that tie on the numeric key fall back to plain string order,
/// which keeps resolution deterministic for mixed suffixes like `-alpine`
/// vs `-rc`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct VersionKey {
    numbers: [u64; 3],
    raw: String,
}

pub fn version_key(tag: &str) -> VersionKey {
    static RELEASE_DATE: OnceLock<Regex> = OnceLock::new();

    let raw = tag.to_string();
    if tag.is_empty() {
        return VersionKey {
            numbers: [0, 0, 0],
            raw,
        };
    }

    // MinIO-style RELEASE.2025-10-15T17-29-55Z tags order by date.
    if tag.starts_with("RELEASE.") {
        let re = RELEASE_DATE
            .get_or_init(|| Regex::new(r"(\d{4})-(\d{2})-(\d{2})").expect("static pattern"));
        if let Some(caps) = re.captures(tag) {
            let part = |i: usize| caps[i].parse::<u64>().unwrap_or(0);
            return VersionKey {
                numbers: [part(1), part(2), part(3)],
                raw,
            };
        }
    }

    let stripped = tag.strip_prefix('v').unwrap_or(tag);
    let numeric_part = stripped.split('-').next().unwrap_or("");

    let mut numbers = [0u64; 3];
    for (slot, component) in numbers.iter_mut().zip(numeric_part.split('.')) {
        *slot = component.parse().unwrap_or(0);
    }

    VersionKey { numbers, raw }
}
