//! Fake library entry for the `packer` crate.
//!
//! Exposes `inner_main` so a workspace-level shim binary can call into the packer logic.
//!
//! Provides commands to pack a project into a self-extracting executable and to inspect one.

extern crate alloc;
extern crate core;

pub mod archive;
pub mod cli;
pub mod compose;
pub mod config;

use std::{
    fs,
    io::{self, Cursor},
    path::Path,
    sync::Once,
};

use eyre::{Result, WrapErr as _};
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt::time::ChronoLocal};
use zip::ZipArchive;

use luapack_common::{LOG_ENV_VAR, PackageError, PackageMetadata, locate_trailer};

use archive::{archive_project, entry_name};
use cli::{Cli, Command, LogFormat};
use compose::{ComposedPackage, LauncherStub, compose_package};
use config::PackSettings;

static INIT_TRACING: Once = Once::new();

/// The packer's main function; can be called from a shim binary.
///
/// Parses CLI and dispatches packing or inspection.
///
/// # Errors
///
/// Returns an error naming the failing phase if packing or inspection fails.
pub fn inner_main(invocation: Cli) -> Result<()> {
    init_tracing(invocation.log_format);

    match invocation.command {
        Command::Pack(args) => {
            let settings = PackSettings::from_args(&args)?;
            let written = pack(&settings)?;
            println!("Build success! Output to {}", written.path.display());
            Ok(())
        }
        Command::Inspect { package } => inspect(&package),
    }
}

fn init_tracing(format: LogFormat) {
    INIT_TRACING.call_once(move || {
        let builder = tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_env(LOG_ENV_VAR).unwrap_or_else(|_| EnvFilter::new("info")),
            )
            .with_writer(io::stderr)
            .with_timer(ChronoLocal::rfc_3339());

        match format {
            LogFormat::Compact => builder.compact().init(),
            LogFormat::Json => builder.json().init(),
            LogFormat::Pretty => builder.pretty().init(),
        }
    });
}

/// Runs the whole build-time pipeline: validate, load stub, archive, compose.
///
/// # Errors
///
/// Each phase wraps its failure with a message naming the phase.
pub fn pack(settings: &PackSettings) -> Result<ComposedPackage> {
    let span = tracing::info_span!("pack", project = ?settings.project_dir, output = ?settings.output);
    let _enter = span.enter();

    info!(compiler = %settings.compiler, entry = %settings.entry, "Validating project");
    let (compiler_path, entry_script_path) =
        validate_inputs(settings).wrap_err("Invalid pack inputs")?;

    let stub = load_stub(settings).wrap_err("Failed to load launcher stub")?;

    info!(compression = ?settings.archive.compression, "Archiving project files");
    let archive = archive_project(&settings.project_dir, &settings.archive)
        .wrap_err("Failed to archive project")?;

    info!(archive_bytes = archive.len(), "Composing package");
    let metadata = PackageMetadata {
        compiler_path,
        entry_script_path,
        archive,
    };
    compose_package(&stub, &metadata, &settings.limits, &settings.output)
        .wrap_err("Failed to compose package")
}

/// Resolves the stub path, falling back to the one next to the packer, and reads it.
fn load_stub(settings: &PackSettings) -> Result<LauncherStub> {
    let path = settings.stub_path()?;
    info!(stub = ?path, "Loading launcher stub");
    Ok(LauncherStub::load(&path)?)
}

/// Checks that the project, compiler and entry script exist.
///
/// Returns the compiler and entry paths normalized to `/` separators.
fn validate_inputs(settings: &PackSettings) -> Result<(String, String), PackageError> {
    let project = &settings.project_dir;
    if !project.is_dir() {
        return Err(PackageError::path("project directory not found", project));
    }

    let compiler = project_member(
        project,
        &settings.compiler,
        "compiler not found in project directory",
    )?;
    let entry = project_member(
        project,
        &settings.entry,
        "entry script not found in project directory",
    )?;
    Ok((compiler, entry))
}

fn project_member(
    project: &Path,
    relative: &str,
    not_found: &'static str,
) -> Result<String, PackageError> {
    let name = entry_name(Path::new(relative))
        .filter(|name| !name.is_empty())
        .ok_or_else(|| {
            PackageError::path("path must be relative to the project directory", relative)
        })?;
    let full = project.join(relative);
    if !full.is_file() {
        return Err(PackageError::path(not_found, full));
    }
    Ok(name)
}

/// Prints the trailer metadata and archive listing of a packed executable.
///
/// # Errors
///
/// Returns an error if the file cannot be read or carries no valid trailer.
pub fn inspect(package: &Path) -> Result<()> {
    let image = fs::read(package).wrap_err(format!("Failed to read {}", package.display()))?;
    let (stub_len, metadata) =
        locate_trailer(&image).wrap_err(format!("Failed to parse {}", package.display()))?;

    println!("package:      {}", package.display());
    println!("stub bytes:   {stub_len}");
    println!("compiler:     {}", metadata.compiler_path);
    println!("entry script: {}", metadata.entry_script_path);
    println!("archive:      {} bytes", metadata.archive.len());

    let mut archive =
        ZipArchive::new(Cursor::new(metadata.archive)).wrap_err("Failed to open archive")?;
    for idx in 0..archive.len() {
        let entry = archive
            .by_index(idx)
            .wrap_err(format!("Failed to read archive entry {idx}"))?;
        println!(
            "  {:>6o} {:>10} {}",
            entry.unix_mode().unwrap_or(0) & 0o7777,
            entry.size(),
            entry.name()
        );
    }
    Ok(())
}
