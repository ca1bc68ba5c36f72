//! Pass archive creation.
//!
//! Packs a finished bundle directory into the zip container the wallet
//! installs. The layout is flat: `pass.json` sits at the archive root, never
//! under an enclosing directory entry.
//!
//! # Examples
//!
//! ```no_run
//! use pkpass::archive::{create_archive, Compression};
//!
//! let bytes = create_archive("bundle", "Event.pkpass", Compression::Stored)?;
//! println!("{} bytes", bytes.len());
//! # Ok::<(), pkpass::Error>(())
//! ```

use crate::manifest::relative_key;
use crate::{Error, Result};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, Cursor, Read, Seek, Write};
use std::path::Path;
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

/// Upper bound on the buffer reserved from a declared entry size.
const MAX_PREALLOCATION: u64 = 1 << 20;

/// Zip compression used for archive entries.
///
/// Every wallet unzip implementation handles [`Compression::Stored`], which is
/// the default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Compression {
    /// No compression.
    #[default]
    Stored,
    /// Deflate at the given level (clamped to 0-9).
    Deflated(u32),
}

impl Compression {
    /// Compression from a 0-9 level, where 0 means [`Compression::Stored`].
    #[must_use]
    pub fn from_level(level: u32) -> Self {
        match level.min(9) {
            0 => Compression::Stored,
            level => Compression::Deflated(level),
        }
    }

    fn options(self) -> SimpleFileOptions {
        match self {
            Compression::Stored => {
                SimpleFileOptions::default().compression_method(CompressionMethod::Stored)
            }
            Compression::Deflated(level) => SimpleFileOptions::default()
                .compression_method(CompressionMethod::Deflated)
                .compression_level(Some(i64::from(level.min(9)))),
        }
    }
}

/// Write `source_dir` as a flat zip archive into `writer`.
///
/// Entries are added in sorted path order. Sub-directories get their own
/// `name/` entries; the source directory itself is never added.
///
/// # Errors
///
/// Returns [`Error::Archive`] if the source is missing, not a directory,
/// contains no files, or a file cannot be read, and [`Error::Zip`] on zip
/// write failures.
pub fn write_archive<W: Write + Seek>(
    source_dir: impl AsRef<Path>,
    writer: W,
    compression: Compression,
) -> Result<W> {
    let source_dir = source_dir.as_ref();

    if !source_dir.is_dir() {
        return Err(Error::Archive(format!(
            "Not a directory: {}",
            source_dir.display()
        )));
    }

    let entries: Vec<_> = WalkDir::new(source_dir)
        .min_depth(1)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .collect::<std::result::Result<_, _>>()
        .map_err(|e| Error::Archive(format!("Failed to walk directory: {e}")))?;

    if !entries.iter().any(|e| e.file_type().is_file()) {
        return Err(Error::Archive(format!(
            "No files to archive in {}",
            source_dir.display()
        )));
    }

    let options = compression.options();
    let mut zip = ZipWriter::new(writer);

    for entry in &entries {
        let archive_path = relative_key(source_dir, entry.path())
            .map_err(|e| Error::Archive(e.to_string()))?;

        if entry.file_type().is_dir() {
            zip.add_directory(format!("{archive_path}/"), options)?;
        } else if entry.file_type().is_file() {
            zip.start_file(archive_path.as_str(), options)?;
            File::open(entry.path())
                .and_then(|mut file| io::copy(&mut file, &mut zip))
                .map_err(|e| Error::Archive(format!("Failed to add {archive_path}: {e}")))?;
        } else {
            log::warn!("Not archiving special file: {}", entry.path().display());
        }
    }

    let writer = zip.finish()?;
    Ok(writer)
}

/// Create the archive at `output_path` and return its bytes.
///
/// Parent directories of `output_path` are created if needed.
pub fn create_archive(
    source_dir: impl AsRef<Path>,
    output_path: impl AsRef<Path>,
    compression: Compression,
) -> Result<Vec<u8>> {
    let bytes = archive_to_vec(source_dir, compression)?;
    let output_path = output_path.as_ref();

    if let Some(parent) = output_path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent).map_err(|e| output_error(parent, e))?;
        }
    }
    fs::write(output_path, &bytes).map_err(|e| output_error(output_path, e))?;

    Ok(bytes)
}

fn output_error(path: &Path, err: io::Error) -> Error {
    Error::Archive(format!("Failed to write {}: {err}", path.display()))
}

/// Build the archive in memory.
pub fn archive_to_vec(source_dir: impl AsRef<Path>, compression: Compression) -> Result<Vec<u8>> {
    let cursor = write_archive(source_dir, Cursor::new(Vec::new()), compression)?;
    Ok(cursor.into_inner())
}

/// Unpack an archive into a map of entry name to contents.
///
/// Directory entries are omitted. Declared entry sizes are only a capacity
/// hint and are capped, since the archive may be untrusted.
pub fn read_archive(data: &[u8]) -> Result<BTreeMap<String, Vec<u8>>> {
    let mut archive = ZipArchive::new(Cursor::new(data))?;
    let mut files = BTreeMap::new();

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        if entry.is_dir() {
            continue;
        }
        let mut buffer = Vec::with_capacity(initial_capacity(entry.size()));
        entry.read_to_end(&mut buffer)?;
        files.insert(entry.name().to_string(), buffer);
    }

    Ok(files)
}

fn initial_capacity(declared: u64) -> usize {
    usize::try_from(declared.min(MAX_PREALLOCATION)).unwrap_or(0)
}
