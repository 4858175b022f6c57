//! Registry Mirror Library
//!
//! This file serves as the library root for the registry-mirror crate,
//! organizing the modules that resolve upstream image versions and mirror
//! them into a destination registry.

pub mod cli;
pub mod error;
pub mod manifest;
pub mod output;
pub mod registry;
pub mod resolver;
pub mod status;
pub mod sync;

pub use error::{ErrorKind, MirrorError, Result};
pub use output::OutputManager;
