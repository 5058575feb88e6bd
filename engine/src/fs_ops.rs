//! Local filesystem operations.
//!
//! This module provides the local half of every walk:
//! - Listing one directory level, sorted by name
//! - Creating parent directories before a download
//! - Canonical directory keys for the symlink cycle guard

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::error::EngineError;

/// One entry of a local directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalEntry {
    /// Bare file name (lossy UTF-8)
    pub name: String,
    pub path: PathBuf,
    /// True for directories and symlinks to directories
    pub is_dir: bool,
    pub size: u64,
}

/// List the immediate children of `dir`, sorted by name.
///
/// Symlinks are followed. A link whose target cannot be read is reported as a
/// file so that the transfer of it fails where it is attempted.
///
/// # Errors
/// Returns `EngineError::Io` if `dir` itself cannot be read.
pub fn read_local_dir(dir: &Path) -> Result<Vec<LocalEntry>, EngineError> {
    let io_err = |source: io::Error| EngineError::Io {
        path: dir.to_path_buf(),
        source,
    };

    let mut entries = Vec::new();
    for entry in fs::read_dir(dir).map_err(io_err)? {
        let entry = entry.map_err(io_err)?;
        let path = entry.path();
        let (is_dir, size) = match fs::metadata(&path) {
            Ok(metadata) => (metadata.is_dir(), metadata.len()),
            Err(_) => (false, 0),
        };
        entries.push(LocalEntry {
            name: entry.file_name().to_string_lossy().into_owned(),
            path,
            is_dir,
            size: if is_dir { 0 } else { size },
        });
    }
    entries.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(entries)
}

/// Ensure the parent directory of a path exists, creating it if necessary.
///
/// # Errors
/// Returns `EngineError::Io` if the parent exists but is not a directory, or
/// if creating it fails.
pub fn ensure_parent_dir_exists(path: &Path) -> Result<(), EngineError> {
    let Some(parent) = path.parent() else {
        return Ok(());
    };
    // relative file name with no directory part
    if parent.as_os_str().is_empty() {
        return Ok(());
    }

    match fs::metadata(parent) {
        Ok(metadata) if metadata.is_dir() => Ok(()),
        Ok(_) => Err(EngineError::Io {
            path: parent.to_path_buf(),
            source: io::Error::new(
                io::ErrorKind::InvalidInput,
                "parent path exists but is not a directory",
            ),
        }),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            fs::create_dir_all(parent).map_err(|source| EngineError::Io {
                path: parent.to_path_buf(),
                source,
            })
        }
        Err(source) => Err(EngineError::Io {
            path: parent.to_path_buf(),
            source,
        }),
    }
}

/// Create `path` for writing, creating missing parent directories first.
pub fn create_local_file(path: &Path) -> Result<fs::File, EngineError> {
    ensure_parent_dir_exists(path)?;
    fs::File::create(path).map_err(|source| EngineError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Resolve `dir` to the key used by the cycle guard.
pub fn canonical_key(dir: &Path) -> Result<PathBuf, EngineError> {
    fs::canonicalize(dir).map_err(|source| EngineError::Io {
        path: dir.to_path_buf(),
        source,
    })
}
