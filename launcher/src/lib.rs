//! Fake library entry for the `launcher` crate.
//!
//! Exposes `inner_main` so the stub binary (and the workspace-level shim used by the
//! integration tests) can call into the launcher logic.
//!
//! A run goes through `Locate → Parse → Extract → Prepare → Exec → Await → Cleanup`,
//! stopping at the first failing step. Cleanup runs on every path.
extern crate alloc;
extern crate core;

pub mod exec;
pub mod extract;

use core::{error::Error as _, fmt};
use std::{
    env,
    ffi::OsString,
    fs,
    path::{Path, PathBuf},
    sync::Once,
};

use thiserror::Error as ThisError;
use tracing::{Instrument as _, debug, info_span};
use tracing_subscriber::{EnvFilter, fmt::time::ChronoLocal};

use luapack_common::{
    FormatError, IoResultExt as _, LOG_ENV_VAR, PackageError, PackageMetadata, locate_trailer,
};

use exec::{Termination, child_command, exit_code, run_child};
use extract::{ExtractionRoot, extract_archive, prepare};

static INIT_TRACING: Once = Once::new();

/// Steps of a launcher run, used to label failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Locate,
    Parse,
    Extract,
    Prepare,
    Exec,
    Await,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match *self {
            Phase::Locate => "locate",
            Phase::Parse => "parse",
            Phase::Extract => "extract",
            Phase::Prepare => "prepare",
            Phase::Exec => "exec",
            Phase::Await => "await",
        };
        write!(f, "{s}")
    }
}

/// A failed run: the step it stopped at and why.
#[derive(Debug, ThisError)]
#[error("{phase}")]
pub struct LaunchFailure {
    pub phase: Phase,
    #[source]
    pub error: PackageError,
}

impl LaunchFailure {
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        self.error.exit_code()
    }
}

/// Extension trait labelling a `PackageError` with the step it happened in.
trait PhaseExt<T> {
    fn in_phase(self, phase: Phase) -> Result<T, LaunchFailure>;
}

impl<T> PhaseExt<T> for Result<T, PackageError> {
    fn in_phase(self, phase: Phase) -> Result<T, LaunchFailure> {
        self.map_err(|error| LaunchFailure { phase, error })
    }
}

/// The launcher's main function; returns the process exit code.
///
/// Forwards every argument after the launcher's own name to the interpreter. Internal
/// failures are reported on stderr with a code per failure class.
pub async fn inner_main() -> i32 {
    init_tracing();

    let exe = match env::current_exe() {
        Ok(exe) => exe,
        Err(e) => {
            eprintln!("{}: cannot resolve own executable: {e}", program_name());
            return luapack_common::EXIT_IO;
        }
    };
    let args: Vec<OsString> = env::args_os().skip(1).collect();

    match launch(&exe, &args).await {
        Ok(code) => code,
        Err(failure) => {
            report(&exe, &failure);
            failure.exit_code()
        }
    }
}

fn init_tracing() {
    INIT_TRACING.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_env(LOG_ENV_VAR).unwrap_or_else(|_| EnvFilter::new("warn")),
            )
            .with_writer(std::io::stderr)
            .with_timer(ChronoLocal::rfc_3339())
            .compact()
            .init();
    });
}

/// Runs the package stored in `exe` with `args`, returning the interpreter's exit code.
///
/// # Errors
///
/// Returns the failing phase and its error. The extraction root is already removed when
/// this returns, whatever the outcome.
pub async fn launch(exe: &Path, args: &[OsString]) -> Result<i32, LaunchFailure> {
    let span = info_span!("launch", ?exe, pid = std::process::id());
    launch_in_span(exe, args).instrument(span).await
}

async fn launch_in_span(exe: &Path, args: &[OsString]) -> Result<i32, LaunchFailure> {
    // Installed first so a termination request during extraction still reaches cleanup.
    let mut signals = Termination::install().in_phase(Phase::Locate)?;

    debug!("locate");
    let image = fs::read(exe)
        .io_context(|| format!("cannot read {}", exe.display()))
        .in_phase(Phase::Locate)?;

    debug!(bytes = image.len(), "parse");
    let (stub_len, metadata) = locate_trailer(&image).map_err(|e| {
        let phase = if e == FormatError::MarkerNotFound {
            Phase::Locate
        } else {
            Phase::Parse
        };
        LaunchFailure {
            phase,
            error: e.into(),
        }
    })?;
    drop(image);
    debug!(
        stub_len,
        compiler = %metadata.compiler_path,
        entry = %metadata.entry_script_path,
        archive_bytes = metadata.archive.len(),
        "trailer found"
    );

    let root = ExtractionRoot::create().in_phase(Phase::Extract)?;
    let outcome = run_in_root(root.path(), &metadata, args, &mut signals).await;

    debug!("cleanup");
    root.cleanup();
    outcome
}

async fn run_in_root(
    root: &Path,
    metadata: &PackageMetadata,
    args: &[OsString],
    signals: &mut Termination,
) -> Result<i32, LaunchFailure> {
    debug!(?root, "extract");
    let entries = extract_archive(&metadata.archive, root).in_phase(Phase::Extract)?;
    debug!(entries, "prepare");
    let compiler: PathBuf = prepare(root, metadata).in_phase(Phase::Prepare)?;

    debug!(?compiler, ?args, "exec");
    let command = child_command(&compiler, &metadata.entry_script_path, args, root);
    let status = run_child(command, &compiler, signals)
        .await
        .map_err(|error| {
            let phase = if matches!(error, PackageError::Exec { .. }) {
                Phase::Exec
            } else {
                Phase::Await
            };
            LaunchFailure { phase, error }
        })?;
    Ok(exit_code(status))
}

/// Writes the single-line diagnostic for a failed run to stderr.
fn report(exe: &Path, failure: &LaunchFailure) {
    if matches!(
        failure.error,
        PackageError::Format(FormatError::MarkerNotFound)
    ) {
        eprintln!("{} is not a packaged artifact", exe.display());
        return;
    }

    let mut message = format!("{}: {}: {}", program_name(), failure.phase, failure.error);
    let mut source = failure.error.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    eprintln!("{message}");
}

fn program_name() -> String {
    env::args_os()
        .next()
        .map(PathBuf::from)
        .and_then(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
        .unwrap_or_else(|| env!("CARGO_PKG_NAME").to_string())
}
