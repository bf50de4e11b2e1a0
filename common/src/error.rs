//! Error taxonomy shared by the packer and the launcher.

use std::{io, path::PathBuf};

use thiserror::Error as ThisError;

use crate::FormatError;

/// Exit code for a launcher run on an image without a trailer.
pub const EXIT_NOT_PACKAGED: i32 = 64;
/// Exit code for a trailer or archive that cannot be decoded.
pub const EXIT_FORMAT: i32 = 65;
/// Exit code for missing or invalid paths.
pub const EXIT_PATH: i32 = 66;
/// Exit code for read/write/create failures.
pub const EXIT_IO: i32 = 74;
/// Exit code for a failure to mark the interpreter executable.
pub const EXIT_PERMISSION: i32 = 77;
/// Exit code for an interpreter that cannot be started.
pub const EXIT_EXEC: i32 = 126;

/// Every failure the packaging and bootstrap pipelines can report.
#[derive(Debug, ThisError)]
pub enum PackageError {
    #[error("{what}: {}", path.display())]
    Path { what: &'static str, path: PathBuf },
    #[error("{context}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Format(#[from] FormatError),
    #[error("cannot mark {} as executable", path.display())]
    Permission {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("cannot start {}", program.display())]
    Exec {
        program: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl PackageError {
    /// Builds a [`PackageError::Path`].
    pub fn path(what: &'static str, path: impl Into<PathBuf>) -> Self {
        Self::Path {
            what,
            path: path.into(),
        }
    }

    /// Process exit code the launcher uses for this failure class.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match *self {
            Self::Path { .. } => EXIT_PATH,
            Self::Io { .. } => EXIT_IO,
            Self::Format(FormatError::MarkerNotFound) => EXIT_NOT_PACKAGED,
            Self::Format(_) => EXIT_FORMAT,
            Self::Permission { .. } => EXIT_PERMISSION,
            Self::Exec { .. } => EXIT_EXEC,
        }
    }
}

/// Attaches a description to I/O failures.
pub trait IoResultExt<T> {
    fn io_context<F: FnOnce() -> String>(self, context: F) -> Result<T, PackageError>;
}

impl<T> IoResultExt<T> for io::Result<T> {
    fn io_context<F: FnOnce() -> String>(self, context: F) -> Result<T, PackageError> {
        self.map_err(|source| PackageError::Io {
            context: context(),
            source,
        })
    }
}
