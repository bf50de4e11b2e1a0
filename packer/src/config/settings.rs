//! Merges command-line flags with the optional config file into one set of pack settings.
//!
//! Flags win over the config file, the config file wins over built-in defaults.

use std::{
    env::{self, consts::EXE_SUFFIX},
    path::PathBuf,
};

use eyre::{WrapErr as _, eyre};

use crate::{
    archive::ArchiveOptions,
    cli::PackArgs,
    compose::ComposeLimits,
    config::{PackerConfig, load},
};

/// Base name of the artifact when no output path is configured.
pub const DEFAULT_OUTPUT_NAME: &str = "luapack-packed";

/// Binary names looked up next to the packer when no stub is configured.
const STUB_CANDIDATES: [&str; 2] = ["luapack_launcher", "launcher"];

/// Fully resolved inputs of one pack run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackSettings {
    pub project_dir: PathBuf,
    pub compiler: String,
    pub entry: String,
    pub output: PathBuf,
    /// Launcher stub; `None` looks next to the packer executable when the stub is loaded.
    pub stub: Option<PathBuf>,
    pub archive: ArchiveOptions,
    pub limits: ComposeLimits,
}

impl PackSettings {
    /// Builds settings from CLI arguments, reading `--config` when given.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file is unreadable or invalid.
    pub fn from_args(args: &PackArgs) -> eyre::Result<Self> {
        let config = match args.config {
            Some(ref path) => load(path)?,
            None => PackerConfig::default(),
        };

        Ok(Self {
            project_dir: args.project_dir.clone(),
            compiler: args.compiler.clone(),
            entry: args.entry.clone(),
            output: args
                .output
                .clone()
                .or(config.output)
                .unwrap_or_else(default_output_path),
            stub: args.stub.clone().or(config.stub),
            archive: ArchiveOptions {
                compression: args.compression.unwrap_or(config.archive.compression),
                level: args.level.or(config.archive.level),
            },
            limits: ComposeLimits {
                max_archive_size: args.max_archive_size.or(config.archive.max_size),
            },
        })
    }

    /// The configured stub, or the launcher shipped next to the packer.
    ///
    /// # Errors
    ///
    /// Returns an error if no stub is configured and none is found next to the packer.
    pub fn stub_path(&self) -> eyre::Result<PathBuf> {
        match self.stub {
            Some(ref stub) => Ok(stub.clone()),
            None => default_stub_path(),
        }
    }
}

/// `luapack-packed`, with the platform's executable suffix.
#[must_use]
pub fn default_output_path() -> PathBuf {
    PathBuf::from(format!("{DEFAULT_OUTPUT_NAME}{EXE_SUFFIX}"))
}

/// Finds a launcher binary shipped next to the running packer.
///
/// # Errors
///
/// Returns an error if none of the known launcher names exists in the packer's directory.
pub fn default_stub_path() -> eyre::Result<PathBuf> {
    let exe = env::current_exe().wrap_err("Failed to resolve the packer's own path")?;
    let dir = exe
        .parent()
        .ok_or_else(|| eyre!("Packer executable has no parent directory: {}", exe.display()))?;
    STUB_CANDIDATES
        .iter()
        .map(|name| dir.join(format!("{name}{EXE_SUFFIX}")))
        .find(|candidate| candidate.is_file())
        .ok_or_else(|| {
            eyre!(
                "No launcher stub found next to {}; pass --stub or set `stub` in the config file",
                exe.display()
            )
        })
}
