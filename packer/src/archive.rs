//! Turns a project directory into a single ZIP archive blob.
//!
//! Entries are sorted by their normalized relative path and carry a fixed timestamp, so
//! the same tree always yields the same bytes. Permission bits are stored per entry so
//! the launcher can restore them.

use std::{
    fs::{self, File},
    io::{self, Cursor},
    path::{Component, Path, PathBuf},
};

use serde::Deserialize;
use tracing::debug;
use walkdir::WalkDir;
use zip::{CompressionMethod, DateTime, ZipWriter, result::ZipError, write::SimpleFileOptions};

use luapack_common::{FormatError, IoResultExt as _, PackageError};

/// Compression applied to archive entries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    Stored,
    #[default]
    Deflated,
    Zstd,
}

impl From<Compression> for CompressionMethod {
    fn from(value: Compression) -> Self {
        match value {
            Compression::Stored => Self::Stored,
            Compression::Deflated => Self::Deflated,
            Compression::Zstd => Self::Zstd,
        }
    }
}

/// Knobs for [`archive_project`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArchiveOptions {
    pub compression: Compression,
    /// `None` uses the method's default level.
    pub level: Option<i64>,
}

#[derive(Debug)]
enum EntryKind {
    Dir,
    File,
}

#[derive(Debug)]
struct Entry {
    name: String,
    source: PathBuf,
    kind: EntryKind,
    mode: u32,
}

/// Archives every file and directory below `root`.
///
/// # Errors
///
/// Fails on the first unreadable entry, symlink or special file; no partial archive is returned.
pub fn archive_project(root: &Path, options: &ArchiveOptions) -> Result<Vec<u8>, PackageError> {
    let entries = collect_entries(root)?;

    let base = SimpleFileOptions::default()
        .compression_method(options.compression.into())
        .compression_level(options.level)
        .last_modified_time(DateTime::default());

    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    for entry in &entries {
        let entry_options = base.unix_permissions(entry.mode);
        match entry.kind {
            EntryKind::Dir => {
                zip.add_directory(entry.name.as_str(), entry_options)
                    .map_err(|e| zip_error(&entry.name, e))?;
            }
            EntryKind::File => {
                let mut source = File::open(&entry.source)
                    .io_context(|| format!("cannot read {}", entry.source.display()))?;
                zip.start_file(entry.name.as_str(), entry_options)
                    .map_err(|e| zip_error(&entry.name, e))?;
                io::copy(&mut source, &mut zip)
                    .io_context(|| format!("cannot archive {}", entry.source.display()))?;
            }
        }
        debug!(name = %entry.name, mode = %format_args!("{:o}", entry.mode), "archived entry");
    }

    let blob = zip
        .finish()
        .map_err(|e| zip_error("central directory", e))?
        .into_inner();
    debug!(entries = entries.len(), bytes = blob.len(), "archive finished");
    Ok(blob)
}

/// Walks `root` in a deterministic order.
fn collect_entries(root: &Path) -> Result<Vec<Entry>, PackageError> {
    let mut entries = Vec::new();
    for walked in WalkDir::new(root).min_depth(1).sort_by_file_name() {
        let walked = walked
            .map_err(io::Error::from)
            .io_context(|| format!("cannot walk {}", root.display()))?;
        let path = walked.path();
        let file_type = walked.file_type();

        let kind = if file_type.is_dir() {
            EntryKind::Dir
        } else if file_type.is_file() {
            EntryKind::File
        } else {
            return Err(PackageError::Io {
                context: format!("cannot archive {}", path.display()),
                source: io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "only regular files and directories can be packed, not symlinks or special files",
                ),
            });
        };

        let relative = path
            .strip_prefix(root)
            .map_err(|_| PackageError::path("entry outside of project directory", path))?;
        let metadata = fs::symlink_metadata(path)
            .io_context(|| format!("cannot stat {}", path.display()))?;

        entries.push(Entry {
            name: entry_name(relative)
                .ok_or_else(|| PackageError::path("file name is not valid UTF-8", path))?,
            source: path.to_path_buf(),
            mode: permission_bits(&metadata, &kind),
            kind,
        });
    }
    entries.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(entries)
}

/// Joins the components of a relative path with `/`.
pub(crate) fn entry_name(relative: &Path) -> Option<String> {
    let mut parts = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_str()?),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    Some(parts.join("/"))
}

#[cfg(unix)]
fn permission_bits(metadata: &fs::Metadata, _kind: &EntryKind) -> u32 {
    use std::os::unix::fs::PermissionsExt as _;
    metadata.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn permission_bits(_metadata: &fs::Metadata, kind: &EntryKind) -> u32 {
    match *kind {
        EntryKind::Dir => 0o755,
        EntryKind::File => 0o644,
    }
}

fn zip_error(name: &str, err: ZipError) -> PackageError {
    match err {
        ZipError::Io(source) => PackageError::Io {
            context: format!("cannot write archive entry {name}"),
            source,
        },
        other => PackageError::Format(FormatError::CorruptArchive(format!("{name}: {other}"))),
    }
}
