//! Configuration loading utilities for the packer.
//!
//! This module provides functions for reading and parsing
//! configuration files from disk.

use std::{fs, path::Path};

use eyre::WrapErr as _;

use crate::config::{PackerConfig, resolve_config_relative_path};

/// Reads and parses the packer config from a TOML file.
///
/// A relative `stub` path is rewritten relative to the config file.
///
/// # Arguments
///
/// * `path` - File path to the TOML configuration file.
///
/// # Errors
///
/// Returns an error if the config file cannot be read or parsed.
pub fn load<P: AsRef<Path>>(path: P) -> eyre::Result<PackerConfig> {
    let path_ref = path.as_ref();
    let content = fs::read_to_string(path_ref).wrap_err(format!(
        "Failed to read config file at: {}",
        path_ref.display()
    ))?;
    let mut config: PackerConfig = toml::from_str(&content).wrap_err(format!(
        "Failed to parse config as TOML at: {}",
        path_ref.display()
    ))?;
    config.stub = config
        .stub
        .map(|stub| resolve_config_relative_path(path_ref, &stub));
    Ok(config)
}
