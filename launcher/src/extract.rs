//! Extraction root lifecycle, archive extraction and interpreter preparation.

use std::{
    env,
    fs::{self, File},
    io::{self, Cursor},
    path::{self, Component, Path, PathBuf},
};

use tempfile::{Builder, TempDir};
use tracing::{debug, warn};
use zip::{ZipArchive, result::ZipError};

use luapack_common::{
    EXTRACTION_DIR_PREFIX, FormatError, IoResultExt as _, PackageError, PackageMetadata,
    TMPDIR_ENV_VAR,
};

/// Private directory holding one run's extracted project.
///
/// Removed by [`ExtractionRoot::cleanup`], or on drop if a run unwinds before reaching it.
#[derive(Debug)]
pub struct ExtractionRoot {
    dir: TempDir,
}

impl ExtractionRoot {
    /// Creates a fresh, uniquely named directory under `LUAPACK_TMPDIR` or the system temp dir.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the directory cannot be created.
    pub fn create() -> Result<Self, PackageError> {
        let base = env::var_os(TMPDIR_ENV_VAR).map_or_else(env::temp_dir, PathBuf::from);
        Self::create_in(&base)
    }

    /// Creates the directory inside `base`.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if `base` cannot be resolved or the directory cannot be created.
    pub fn create_in(base: &Path) -> Result<Self, PackageError> {
        let base = path::absolute(base)
            .io_context(|| format!("cannot resolve extraction base {}", base.display()))?;
        let dir = Builder::new()
            .prefix(EXTRACTION_DIR_PREFIX)
            .tempdir_in(&base)
            .io_context(|| format!("cannot create extraction root in {}", base.display()))?;
        debug!(root = ?dir.path(), "created extraction root");
        Ok(Self { dir })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Removes the directory and everything in it.
    ///
    /// A failure is logged rather than returned so it never masks the child's exit status.
    pub fn cleanup(self) {
        let root = self.dir.path().to_path_buf();
        match self.dir.close() {
            Ok(()) => debug!(?root, "removed extraction root"),
            Err(e) => warn!(?root, error = %e, "failed to remove extraction root"),
        }
    }
}

/// Writes every archive entry below `root`, recreating directories and permission bits.
///
/// Returns the number of entries written.
///
/// # Errors
///
/// Returns a format error for corrupt archives or entry names escaping `root`, and an I/O
/// error for any failed write.
pub fn extract_archive(archive: &[u8], root: &Path) -> Result<usize, PackageError> {
    if archive.is_empty() {
        return Ok(0);
    }

    let mut zip = ZipArchive::new(Cursor::new(archive)).map_err(|e| zip_error("archive", e))?;
    let mut dir_modes = Vec::new();

    for idx in 0..zip.len() {
        let mut entry = zip
            .by_index(idx)
            .map_err(|e| zip_error(&format!("entry {idx}"), e))?;
        let Some(relative) = entry.enclosed_name() else {
            return Err(FormatError::UnsafeEntry {
                name: entry.name().to_string(),
            }
            .into());
        };
        let target = root.join(relative);

        if entry.is_dir() {
            fs::create_dir_all(&target)
                .io_context(|| format!("cannot create directory {}", target.display()))?;
            if let Some(mode) = entry.unix_mode() {
                dir_modes.push((target, mode));
            }
            continue;
        }

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .io_context(|| format!("cannot create directory {}", parent.display()))?;
        }
        let mut out = File::create(&target)
            .io_context(|| format!("cannot create {}", target.display()))?;
        io::copy(&mut entry, &mut out)
            .io_context(|| format!("cannot extract {}", entry.name()))?;
        drop(out);

        if let Some(mode) = entry.unix_mode() {
            apply_mode(&target, mode & 0o7777)?;
        }
        debug!(path = ?target, "extracted");
    }

    // Directory modes last, so a read-only directory does not block its own children.
    // The owner keeps full access so cleanup can remove the tree.
    for (dir, mode) in dir_modes {
        apply_mode(&dir, (mode & 0o7777) | 0o700)?;
    }

    Ok(zip.len())
}

/// Grants execute permission on the interpreter and checks the entry script is present.
///
/// Returns the absolute interpreter path.
///
/// # Errors
///
/// Returns a path error if either member is missing or not relative, and a permission
/// error if the execute bit cannot be set.
pub fn prepare(root: &Path, metadata: &PackageMetadata) -> Result<PathBuf, PackageError> {
    let compiler = resolve_member(root, &metadata.compiler_path, "compiler not found in package")?;
    resolve_member(
        root,
        &metadata.entry_script_path,
        "entry script not found in package",
    )?;
    mark_executable(&compiler)?;
    Ok(compiler)
}

/// Maps a `/`-separated package path onto the extraction root with native separators.
fn resolve_member(
    root: &Path,
    relative: &str,
    not_found: &'static str,
) -> Result<PathBuf, PackageError> {
    let mut resolved = root.to_path_buf();
    for component in Path::new(&relative.replace('\\', "/")).components() {
        match component {
            Component::Normal(part) => resolved.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(PackageError::path(
                    "package path must stay inside the package",
                    relative,
                ));
            }
        }
    }
    if !resolved.is_file() {
        return Err(PackageError::path(not_found, resolved));
    }
    Ok(resolved)
}

#[cfg(unix)]
fn mark_executable(path: &Path) -> Result<(), PackageError> {
    use std::os::unix::fs::PermissionsExt as _;

    let permission_error = |source| PackageError::Permission {
        path: path.to_path_buf(),
        source,
    };
    let mode = fs::metadata(path)
        .map_err(permission_error)?
        .permissions()
        .mode();
    fs::set_permissions(path, fs::Permissions::from_mode(mode | 0o111)).map_err(permission_error)
}

#[cfg(not(unix))]
fn mark_executable(_path: &Path) -> Result<(), PackageError> {
    Ok(())
}

#[cfg(unix)]
fn apply_mode(path: &Path, mode: u32) -> Result<(), PackageError> {
    use std::os::unix::fs::PermissionsExt as _;
    fs::set_permissions(path, fs::Permissions::from_mode(mode)).map_err(|source| {
        PackageError::Permission {
            path: path.to_path_buf(),
            source,
        }
    })
}

#[cfg(not(unix))]
fn apply_mode(_path: &Path, _mode: u32) -> Result<(), PackageError> {
    Ok(())
}

fn zip_error(what: &str, err: ZipError) -> PackageError {
    match err {
        ZipError::Io(source) => PackageError::Io {
            context: format!("cannot read {what}"),
            source,
        },
        other => FormatError::CorruptArchive(format!("{what}: {other}")).into(),
    }
}
