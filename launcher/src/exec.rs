//! Spawning the embedded interpreter and waiting for it.
//!
//! The child inherits stdio and the environment. Its working directory is the extraction
//! root; the launcher's own working directory is never touched.

use std::{
    ffi::OsString,
    future,
    path::Path,
    process::{ExitStatus, Stdio},
};

use tokio::process::{Child, Command};
use tracing::{debug, info};

use luapack_common::{IoResultExt as _, PackageError};

/// Exit code used when the child's status carries neither a code nor a signal.
const UNKNOWN_STATUS_EXIT: i32 = 1;

/// Builds the interpreter invocation: `compiler entry args...`.
#[must_use]
pub fn child_command(compiler: &Path, entry: &str, args: &[OsString], workdir: &Path) -> Command {
    let mut command = Command::new(compiler);
    command
        .arg(native_separators(entry))
        .args(args)
        .current_dir(workdir)
        .stdin(Stdio::inherit())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit());
    command
}

fn native_separators(relative: &str) -> String {
    if cfg!(windows) {
        relative.replace('/', "\\")
    } else {
        relative.to_string()
    }
}

/// Spawns `command`, relays termination signals to it and waits until it exits.
///
/// # Errors
///
/// Returns `PackageError::Exec` if the interpreter cannot be started, and an I/O error if
/// waiting on it fails.
pub async fn run_child(
    mut command: Command,
    program: &Path,
    signals: &mut Termination,
) -> Result<ExitStatus, PackageError> {
    let mut child = command.spawn().map_err(|source| PackageError::Exec {
        program: program.to_path_buf(),
        source,
    })?;
    debug!(pid = child.id(), "interpreter started");

    loop {
        tokio::select! {
            status = child.wait() => {
                let status = status.io_context(|| format!("cannot wait for {}", program.display()))?;
                debug!(%status, "interpreter exited");
                return Ok(status);
            }
            signal = signals.recv() => relay(&child, signal),
        }
    }
}

/// Maps the child's status onto the launcher's exit code.
///
/// A child killed by a signal yields `128 + signal`, as shells report it.
#[must_use]
pub fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt as _;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    UNKNOWN_STATUS_EXIT
}

/// A termination request received while the interpreter runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationSignal {
    Interrupt,
    Terminate,
    Hangup,
}

/// Listens for termination signals for the whole run.
///
/// Once installed, these signals no longer kill the launcher outright, which keeps the
/// cleanup path reachable. Signals arriving before the child exists are queued and relayed
/// as soon as it is spawned.
#[derive(Debug)]
pub struct Termination {
    #[cfg(unix)]
    interrupt: tokio::signal::unix::Signal,
    #[cfg(unix)]
    terminate: tokio::signal::unix::Signal,
    #[cfg(unix)]
    hangup: tokio::signal::unix::Signal,
}

impl Termination {
    /// Installs the handlers. Must be called from within the Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if a handler cannot be registered.
    #[cfg(unix)]
    pub fn install() -> Result<Self, PackageError> {
        use tokio::signal::unix::{SignalKind, signal};

        let listen = |kind: SignalKind| {
            signal(kind).io_context(|| format!("cannot install handler for {kind:?}"))
        };
        Ok(Self {
            interrupt: listen(SignalKind::interrupt())?,
            terminate: listen(SignalKind::terminate())?,
            hangup: listen(SignalKind::hangup())?,
        })
    }

    #[cfg(not(unix))]
    pub fn install() -> Result<Self, PackageError> {
        Ok(Self {})
    }

    /// Resolves with the next received signal.
    #[cfg(unix)]
    pub async fn recv(&mut self) -> TerminationSignal {
        tokio::select! {
            Some(()) = self.interrupt.recv() => TerminationSignal::Interrupt,
            Some(()) = self.terminate.recv() => TerminationSignal::Terminate,
            Some(()) = self.hangup.recv() => TerminationSignal::Hangup,
            else => future::pending().await,
        }
    }

    #[cfg(not(unix))]
    pub async fn recv(&mut self) -> TerminationSignal {
        match tokio::signal::ctrl_c().await {
            Ok(()) => TerminationSignal::Interrupt,
            Err(_) => future::pending().await,
        }
    }
}

/// Passes a signal on to the child.
///
/// Every termination signal is relayed, SIGINT included: a signal aimed at the launcher's
/// pid alone must still reach the interpreter. On a terminal Ctrl-C the child may see SIGINT
/// twice, once from the terminal and once from here.
fn relay(child: &Child, signal: TerminationSignal) {
    info!(?signal, "relaying signal to interpreter");
    forward(child, signal);
}

#[cfg(unix)]
fn forward(child: &Child, signal: TerminationSignal) {
    use nix::{
        sys::signal::{Signal, kill},
        unistd::Pid,
    };

    let Some(pid) = child.id().and_then(|id| i32::try_from(id).ok()) else {
        return;
    };
    let signal = match signal {
        TerminationSignal::Interrupt => Signal::SIGINT,
        TerminationSignal::Terminate => Signal::SIGTERM,
        TerminationSignal::Hangup => Signal::SIGHUP,
    };
    if let Err(e) = kill(Pid::from_raw(pid), signal) {
        tracing::warn!(pid, ?signal, error = %e, "failed to relay signal");
    }
}

#[cfg(not(unix))]
fn forward(_child: &Child, _signal: TerminationSignal) {}
