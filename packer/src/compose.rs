//! Writes the final package: launcher stub, marker, metadata, archive.
//!
//! The artifact is assembled in a temporary file next to the output and renamed into
//! place, so a failed pack never leaves a partial file at the requested path.

use std::{
    fs,
    io::Write as _,
    path::{Path, PathBuf},
};

use sha2::{Digest as _, Sha256};
use tempfile::Builder;
use tracing::{debug, info};

use luapack_common::{
    Field, FormatError, IoResultExt as _, PackageError, PackageMetadata, compose_image,
};

/// Mode given to the produced artifact.
#[cfg(unix)]
const ARTIFACT_MODE: u32 = 0o755;

/// A prebuilt launcher binary and where it was read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LauncherStub {
    pub path: PathBuf,
    pub bytes: Vec<u8>,
}

impl LauncherStub {
    /// Reads the stub at `path`.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file cannot be read and a path error if it is empty.
    pub fn load(path: &Path) -> Result<Self, PackageError> {
        let bytes = fs::read(path).io_context(|| format!("cannot read {}", path.display()))?;
        let stub = Self {
            path: path.to_path_buf(),
            bytes,
        };
        stub.ensure_not_empty()?;
        Ok(stub)
    }

    fn ensure_not_empty(&self) -> Result<(), PackageError> {
        if self.bytes.is_empty() {
            return Err(PackageError::path("launcher stub is empty", &self.path));
        }
        Ok(())
    }
}

/// Limits applied while composing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ComposeLimits {
    /// Largest accepted archive in bytes. `None` only applies the format's own field limit.
    pub max_archive_size: Option<u64>,
}

/// What was written by [`compose_package`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComposedPackage {
    pub path: PathBuf,
    pub stub_len: usize,
    pub total_len: usize,
    /// Hex-encoded SHA-256 of the whole artifact.
    pub sha256: String,
}

/// Composes `stub` and `metadata` into an executable at `output`.
///
/// # Errors
///
/// Returns a path error naming the stub if it is empty, a format error for empty relative
/// paths or oversized archives, and I/O or permission errors from writing the artifact.
pub fn compose_package(
    stub: &LauncherStub,
    metadata: &PackageMetadata,
    limits: &ComposeLimits,
    output: &Path,
) -> Result<ComposedPackage, PackageError> {
    stub.ensure_not_empty()?;
    if metadata.compiler_path.is_empty() {
        return Err(FormatError::EmptyField {
            field: Field::CompilerPath,
        }
        .into());
    }
    if metadata.entry_script_path.is_empty() {
        return Err(FormatError::EmptyField {
            field: Field::EntryScriptPath,
        }
        .into());
    }
    if let Some(max) = limits.max_archive_size {
        let len = metadata.archive.len();
        if u64::try_from(len).map_or(true, |len| len > max) {
            return Err(FormatError::ArchiveTooLarge { len, max }.into());
        }
    }

    let image = compose_image(&stub.bytes, metadata)?;
    let sha256 = hex::encode(Sha256::digest(&image));

    let parent = match output.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    let mut staged = Builder::new()
        .prefix(".luapack-")
        .tempfile_in(parent)
        .io_context(|| format!("cannot create output file in {}", parent.display()))?;
    debug!(staging = ?staged.path(), "writing package");

    staged
        .write_all(&image)
        .io_context(|| format!("cannot write {}", staged.path().display()))?;
    staged
        .as_file()
        .sync_all()
        .io_context(|| format!("cannot flush {}", staged.path().display()))?;
    set_executable(staged.path())?;

    staged.persist(output).map_err(|e| PackageError::Io {
        context: format!("cannot move package into place at {}", output.display()),
        source: e.error,
    })?;

    info!(path = ?output, bytes = image.len(), %sha256, "package written");
    Ok(ComposedPackage {
        path: output.to_path_buf(),
        stub_len: stub.bytes.len(),
        total_len: image.len(),
        sha256,
    })
}

#[cfg(unix)]
fn set_executable(path: &Path) -> Result<(), PackageError> {
    use std::os::unix::fs::PermissionsExt as _;
    fs::set_permissions(path, fs::Permissions::from_mode(ARTIFACT_MODE)).map_err(|source| {
        PackageError::Permission {
            path: path.to_path_buf(),
            source,
        }
    })
}

#[cfg(not(unix))]
fn set_executable(_path: &Path) -> Result<(), PackageError> {
    Ok(())
}
