//! Shared pieces of the luapack package format.
//!
//! This crate provides:
//! - The trailer wire format (marker plus length-prefixed fields) used by both the packer and the launcher
//! - The error taxonomy shared by the build-time and run-time halves
#![expect(
    clippy::missing_errors_doc,
    reason = "The situation it maps to errors should be obvious."
)]

extern crate alloc;
extern crate core;

mod error;
mod trailer;

pub use error::*;
pub use trailer::*;

/// Prefix for the per-run extraction directory created by the launcher.
pub const EXTRACTION_DIR_PREFIX: &str = "luapack_run_";

/// Environment variable holding the `tracing` filter for both binaries.
pub const LOG_ENV_VAR: &str = "LUAPACK_LOG";

/// Environment variable overriding the base directory for extraction roots.
pub const TMPDIR_ENV_VAR: &str = "LUAPACK_TMPDIR";
