//! Command line interface module
//!
//! Argument parsing and the runner that wires the manifest store, registry
//! adapters, resolver, orchestrator, and snapshot builder per subcommand.

pub mod args;
pub mod runner;

pub use args::{Args, Command};
pub use runner::Runner;
