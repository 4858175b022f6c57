//! Command-line argument parsing

use clap::{Parser, Subcommand};
use std::path::PathBuf;

pub const DEFAULT_MANIFEST: &str = "images-manifest.yml";
pub const DEFAULT_OUTPUT: &str = "images.json";

#[derive(Parser)]
#[command(name = "registry-mirror")]
#[command(about = "A tool to mirror Docker Hub images to a destination container registry")]
#[command(version, author)]
pub struct Args {
    /// Enable debug output
    #[arg(short = 'D', long = "debug", global = true)]
    pub debug: bool,

    /// Manifest file path
    #[arg(long = "manifest", global = true, default_value = DEFAULT_MANIFEST)]
    pub manifest: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Check upstream for new versions and update the manifest
    Update {
        /// Resolve versions but do not modify the manifest
        #[arg(long = "dry-run")]
        dry_run: bool,

        /// Maximum concurrent upstream queries
        #[arg(long = "max-workers", default_value = "5")]
        max_workers: usize,

        /// Disable concurrent processing (equivalent to --max-workers 1)
        #[arg(long = "no-concurrency")]
        no_concurrency: bool,
    },

    /// Copy resolved versions to the destination registry
    Sync {
        /// Destination repository owner
        #[arg(long = "owner")]
        owner: String,

        /// Destination registry host
        #[arg(long = "registry", default_value = "ghcr.io")]
        registry: String,

        /// Status snapshot output path
        #[arg(long = "output", default_value = DEFAULT_OUTPUT)]
        output: PathBuf,

        /// Maximum concurrent copy operations
        #[arg(long = "max-workers", default_value = "3")]
        max_workers: usize,

        /// Attempts per image before recording a failure
        #[arg(long = "max-retries", default_value = "3")]
        max_retries: u32,

        /// Delay between retry attempts in seconds
        #[arg(long = "retry-delay", default_value = "2.0")]
        retry_delay: f64,

        /// Keep going and build the snapshot even when some images fail
        #[arg(long = "continue-on-error")]
        continue_on_error: bool,

        /// Disable concurrent processing
        #[arg(long = "no-concurrency")]
        no_concurrency: bool,
    },

    /// Run the full flow: update the manifest, then sync
    Run {
        /// Destination repository owner
        #[arg(long = "owner")]
        owner: String,

        /// Destination registry host
        #[arg(long = "registry", default_value = "ghcr.io")]
        registry: String,

        /// Status snapshot output path
        #[arg(long = "output", default_value = DEFAULT_OUTPUT)]
        output: PathBuf,

        /// Resolve versions but issue no writes (applies to the update step)
        #[arg(long = "dry-run")]
        dry_run: bool,

        /// Continue into the sync step even if the update step failed
        #[arg(long = "continue-on-error")]
        continue_on_error: bool,

        /// Maximum concurrent upstream queries for the update step
        #[arg(long = "max-workers", default_value = "5")]
        max_workers: usize,

        /// Maximum concurrent copy operations for the sync step
        #[arg(long = "max-workers-sync", default_value = "3")]
        max_workers_sync: usize,

        /// Attempts per image before recording a failure
        #[arg(long = "max-retries", default_value = "3")]
        max_retries: u32,

        /// Delay between retry attempts in seconds
        #[arg(long = "retry-delay", default_value = "2.0")]
        retry_delay: f64,

        /// Disable concurrent processing for both steps
        #[arg(long = "no-concurrency")]
        no_concurrency: bool,
    },
}

impl Args {
    pub fn parse_args() -> Self {
        Args::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_defaults() {
        let args = Args::parse_from(["registry-mirror", "update"]);
        match args.command {
            Command::Update {
                dry_run,
                max_workers,
                no_concurrency,
            } => {
                assert!(!dry_run);
                assert_eq!(max_workers, 5);
                assert!(!no_concurrency);
            }
            _ => panic!("expected update command"),
        }
        assert_eq!(args.manifest, PathBuf::from(DEFAULT_MANIFEST));
    }

    #[test]
    fn test_sync_requires_owner() {
        assert!(Args::try_parse_from(["registry-mirror", "sync"]).is_err());
        let args = Args::parse_from(["registry-mirror", "sync", "--owner", "someone"]);
        match args.command {
            Command::Sync {
                owner,
                registry,
                max_retries,
                retry_delay,
                ..
            } => {
                assert_eq!(owner, "someone");
                assert_eq!(registry, "ghcr.io");
                assert_eq!(max_retries, 3);
                assert!((retry_delay - 2.0).abs() < f64::EPSILON);
            }
            _ => panic!("expected sync command"),
        }
    }

    #[test]
    fn test_run_has_independent_sync_worker_bound() {
        let args = Args::parse_from([
            "registry-mirror",
            "run",
            "--owner",
            "someone",
            "--max-workers",
            "10",
            "--max-workers-sync",
            "2",
        ]);
        match args.command {
            Command::Run {
                max_workers,
                max_workers_sync,
                ..
            } => {
                assert_eq!(max_workers, 10);
                assert_eq!(max_workers_sync, 2);
            }
            _ => panic!("expected run command"),
        }
    }

    #[test]
    fn test_global_manifest_flag_after_subcommand() {
        let args = Args::parse_from(["registry-mirror", "update", "--manifest", "custom.yml"]);
        assert_eq!(args.manifest, PathBuf::from("custom.yml"));
    }
}
