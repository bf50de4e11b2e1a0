//! The trailer appended to the launcher stub.
//!
//! Layout: the marker `###LUAPACK_DATA_PART_START###`, then three length-prefixed fields
//! in fixed order: compiler path, entry script path, archive. Every length is a
//! little-endian `u32`.
//!
//! The trailer is found by searching for the last occurrence of the marker. The stub's
//! own machine code may contain the marker bytes, and so may the fields themselves, so a
//! candidate only counts when its three fields end exactly at the end of the image.
//!
//! The marker is kept masked in the binary and unmasked on use, so a stub that links this
//! crate does not carry it verbatim and a bare stub reports "not packaged".

use core::fmt;

use thiserror::Error as ThisError;

const MARKER_TEXT: &[u8] = b"###LUAPACK_DATA_PART_START###";

/// Length of the byte string that opens the trailer.
pub const MARKER_LEN: usize = MARKER_TEXT.len();

const MARKER_MASK: u8 = 0xa5;

#[expect(
    clippy::indexing_slicing,
    reason = "Bounded by the loop condition, evaluated at compile time"
)]
const MASKED_MARKER: [u8; MARKER_LEN] = {
    let mut out = [0; MARKER_LEN];
    let mut i = 0;
    while i < MARKER_LEN {
        out[i] = MARKER_TEXT[i] ^ MARKER_MASK;
        i += 1;
    }
    out
};

/// Byte string that opens the trailer.
#[must_use]
pub fn marker() -> [u8; MARKER_LEN] {
    let mut out = MASKED_MARKER;
    for byte in &mut out {
        // Opaque to the optimizer, so the unmasked bytes are never folded into a constant.
        *byte = core::hint::black_box(*byte) ^ MARKER_MASK;
    }
    out
}

/// Size of each field's length prefix.
const LEN_PREFIX: usize = size_of::<u32>();

/// The three fields carried by a package trailer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageMetadata {
    /// Interpreter executable, relative to the archive root.
    pub compiler_path: String,
    /// Script handed to the interpreter as its first argument.
    pub entry_script_path: String,
    /// The compressed project archive.
    pub archive: Vec<u8>,
}

/// Identifies a trailer field in error messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    CompilerPath,
    EntryScriptPath,
    Archive,
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match *self {
            Field::CompilerPath => "compiler path",
            Field::EntryScriptPath => "entry script path",
            Field::Archive => "archive",
        };
        write!(f, "{s}")
    }
}

/// Reasons a package image or its archive cannot be decoded.
#[derive(Debug, Clone, PartialEq, Eq, ThisError)]
pub enum FormatError {
    #[error("not a packaged artifact (no trailer marker)")]
    MarkerNotFound,
    #[error("trailer ends before the {field} field")]
    MissingField { field: Field },
    #[error("{field} declares {declared} bytes but only {available} remain")]
    Truncated {
        field: Field,
        declared: u32,
        available: usize,
    },
    #[error("{trailing} unexpected bytes after the archive field")]
    TrailingBytes { trailing: usize },
    #[error("{field} is {len} bytes, more than a trailer field can hold")]
    FieldTooLarge { field: Field, len: usize },
    #[error("{field} is empty")]
    EmptyField { field: Field },
    #[error("{field} is not valid UTF-8")]
    InvalidUtf8 { field: Field },
    #[error("archive entry {name:?} escapes the extraction root")]
    UnsafeEntry { name: String },
    #[error("archive is {len} bytes, the configured limit is {max}")]
    ArchiveTooLarge { len: usize, max: u64 },
    #[error("archive is corrupt: {0}")]
    CorruptArchive(String),
}

impl PackageMetadata {
    /// Serializes the trailer, marker included.
    ///
    /// The result is meant to be appended directly after the stub bytes.
    pub fn encode(&self) -> Result<Vec<u8>, FormatError> {
        let fields: [(Field, &[u8]); 3] = [
            (Field::CompilerPath, self.compiler_path.as_bytes()),
            (Field::EntryScriptPath, self.entry_script_path.as_bytes()),
            (Field::Archive, &self.archive),
        ];

        let capacity = MARKER_LEN + fields.iter().map(|f| LEN_PREFIX + f.1.len()).sum::<usize>();
        let mut out = Vec::with_capacity(capacity);
        out.extend_from_slice(&marker());
        for (field, bytes) in fields {
            let len = u32::try_from(bytes.len()).map_err(|_| FormatError::FieldTooLarge {
                field,
                len: bytes.len(),
            })?;
            out.extend_from_slice(&len.to_le_bytes());
            out.extend_from_slice(bytes);
        }
        Ok(out)
    }

    /// Decodes the bytes that follow a marker.
    ///
    /// All three fields must be present and must consume `body` completely.
    pub fn decode(body: &[u8]) -> Result<Self, FormatError> {
        let mut rest = body;
        let compiler_path = read_field(&mut rest, Field::CompilerPath)?;
        let entry_script_path = read_field(&mut rest, Field::EntryScriptPath)?;
        let archive = read_field(&mut rest, Field::Archive)?;
        if !rest.is_empty() {
            return Err(FormatError::TrailingBytes {
                trailing: rest.len(),
            });
        }

        Ok(Self {
            compiler_path: into_string(compiler_path, Field::CompilerPath)?,
            entry_script_path: into_string(entry_script_path, Field::EntryScriptPath)?,
            archive: archive.to_vec(),
        })
    }
}

/// Finds and decodes the trailer of a complete package image.
///
/// Returns the offset of the accepted marker (the size of the stub) with the metadata.
/// Marker occurrences are tried from the last one backwards; when none decodes, the error
/// from the last occurrence is returned.
pub fn locate_trailer(image: &[u8]) -> Result<(usize, PackageMetadata), FormatError> {
    let marker = marker();
    let mut search_end = image.len();
    let mut last_error = None;

    while let Some(pos) = image.get(..search_end).and_then(|hay| rfind(hay, &marker)) {
        let body = image.get(pos + MARKER_LEN..).unwrap_or_default();
        match PackageMetadata::decode(body) {
            Ok(metadata) => return Ok((pos, metadata)),
            Err(e) => {
                last_error.get_or_insert(e);
            }
        }
        // Keep overlapping occurrences that start before `pos` searchable.
        search_end = pos + MARKER_LEN - 1;
    }

    Err(last_error.unwrap_or(FormatError::MarkerNotFound))
}

/// Appends `metadata` to a copy of `stub`.
pub fn compose_image(stub: &[u8], metadata: &PackageMetadata) -> Result<Vec<u8>, FormatError> {
    let trailer = metadata.encode()?;
    let mut image = Vec::with_capacity(stub.len() + trailer.len());
    image.extend_from_slice(stub);
    image.extend_from_slice(&trailer);
    Ok(image)
}

fn read_field<'a>(rest: &mut &'a [u8], field: Field) -> Result<&'a [u8], FormatError> {
    let Some((prefix, tail)) = rest.split_first_chunk::<LEN_PREFIX>() else {
        return Err(FormatError::MissingField { field });
    };
    let declared = u32::from_le_bytes(*prefix);
    let Some(value) = usize::try_from(declared)
        .ok()
        .and_then(|len| tail.get(..len))
    else {
        return Err(FormatError::Truncated {
            field,
            declared,
            available: tail.len(),
        });
    };
    *rest = tail.get(value.len()..).unwrap_or_default();
    Ok(value)
}

fn into_string(bytes: &[u8], field: Field) -> Result<String, FormatError> {
    String::from_utf8(bytes.to_vec()).map_err(|_| FormatError::InvalidUtf8 { field })
}

fn rfind(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).rposition(|w| w == needle)
}
