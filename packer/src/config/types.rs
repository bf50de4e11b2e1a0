//! Configuration data types for the packer.
//!
//! This module contains the structures the optional TOML config file deserializes into.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::archive::Compression;

/// Root of the packer configuration file.
#[derive(Debug, Deserialize, Default, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct PackerConfig {
    /// Prebuilt launcher stub. Relative paths are resolved against the config file's directory.
    #[serde(default)]
    pub stub: Option<PathBuf>,
    /// Output path used when none is given on the command line.
    #[serde(default)]
    pub output: Option<PathBuf>,
    /// Archive settings.
    #[serde(default)]
    pub archive: ArchiveConfig,
}

/// The `[archive]` section.
#[derive(Debug, Deserialize, Default, Clone, Copy, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ArchiveConfig {
    #[serde(default)]
    pub compression: Compression,
    #[serde(default)]
    pub level: Option<i64>,
    /// Upper bound for the archive size in bytes.
    #[serde(default)]
    pub max_size: Option<u64>,
}

/// Resolves a path from the config file relative to the file's own directory.
#[must_use]
pub fn resolve_config_relative_path(config_path: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        config_path
            .parent()
            .map_or_else(|| path.to_path_buf(), |d| d.join(path))
    }
}
