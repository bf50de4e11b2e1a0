//! Command-line interface definitions for the packer.
//!
//! This module contains the CLI argument parsing structures and enums
//! used by the main packer binary.

use std::{env, path::PathBuf};

use clap::{Parser, Subcommand, ValueEnum};

use crate::archive::Compression;

/// Top-level command-line interface definition.
#[derive(Debug, Parser)]
#[command(name = env!("CARGO_PKG_NAME"))]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = env!("CARGO_PKG_DESCRIPTION"))]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Output format for log messages on stderr
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Compact)]
    pub log_format: LogFormat,
}

/// Available subcommands for the packer.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Pack a project directory and its interpreter into one executable.
    Pack(PackArgs),

    /// Print the metadata and archive listing of a packed executable.
    Inspect {
        /// Path to the packed executable
        package: PathBuf,
    },
}

/// Arguments for the pack command.
#[derive(Debug, Parser)]
pub struct PackArgs {
    /// Directory whose files are bundled
    pub project_dir: PathBuf,

    /// Interpreter executable, relative to the project directory
    pub compiler: String,

    /// Script passed to the interpreter, relative to the project directory
    pub entry: String,

    /// Where to write the packed executable
    pub output: Option<PathBuf>,

    /// Optional TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Prebuilt launcher stub (defaults to the `luapack_launcher` binary next to this executable)
    #[arg(long)]
    pub stub: Option<PathBuf>,

    /// Compression method for archive entries
    #[arg(long, value_enum)]
    pub compression: Option<Compression>,

    /// Compression level, meaning depends on the method
    #[arg(long)]
    pub level: Option<i64>,

    /// Refuse archives larger than this many bytes
    #[arg(long)]
    pub max_archive_size: Option<u64>,
}

/// Log output styles supported by `tracing-subscriber`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Compact,
    Json,
    Pretty,
}
