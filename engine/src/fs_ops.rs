//! Filesystem operations module.
//!
//! This module provides low-level operations for:
//! - Probing sources for readability and measuring their size on disk
//! - Enumerating directory sources into individual copy items
//! - Re-rooting absolute source paths under a backup folder
//! - Streaming file copies in fixed-size chunks with metadata preservation
//! - Creating directories recursively

use std::fs;
use std::io::{self, Read, Write};
use std::path::{Component, Path, PathBuf};
use tracing::debug;
use crate::error::CopyError;

/// A single entry to create under the backup folder.
#[derive(Debug)]
pub struct PlannedItem {
    /// Full source path
    pub source_path: PathBuf,

    /// Full destination path beneath the backup folder
    pub destination_path: PathBuf,

    /// File size in bytes (0 for directories)
    pub file_size: u64,

    /// True if this item represents a directory
    pub is_dir: bool,

    /// Set when a nested directory could not be listed during planning
    pub enumeration_error: Option<io::Error>,
}

/// Check that `path` exists and can be opened for reading.
///
/// Files are opened, directories are listed. Returns the target metadata.
/// Anything other than a regular file or a directory is rejected unopened,
/// since opening a pipe blocks until a writer appears.
pub fn probe_readable(path: &Path) -> io::Result<fs::Metadata> {
    let metadata = fs::metadata(path)?;
    if metadata.is_dir() {
        fs::read_dir(path)?;
    } else if metadata.is_file() {
        fs::File::open(path)?;
    } else {
        return Err(not_a_regular_file());
    }
    Ok(metadata)
}

fn not_a_regular_file() -> io::Error {
    io::Error::new(io::ErrorKind::InvalidInput, "Not a regular file or directory")
}

/// Size on disk of a file, or the recursive sum of all files under a directory.
///
/// Only `path` itself must be readable. Nested entries that cannot be listed
/// or measured count as zero, as do pipes, sockets and devices.
pub fn disk_size(path: &Path) -> io::Result<u64> {
    let metadata = fs::metadata(path)?;
    if !metadata.is_dir() {
        return Ok(metadata.len());
    }
    Ok(directory_size(path))
}

fn directory_size(path: &Path) -> u64 {
    let entries = match fs::read_dir(path) {
        Ok(entries) => entries,
        Err(e) => {
            debug!(path = %path.display(), error = %e, "Cannot list directory, counting it as empty");
            return 0;
        }
    };

    let mut total = 0;
    for entry in entries.flatten() {
        let entry_path = entry.path();
        let Ok(file_type) = entry.file_type() else {
            continue;
        };
        // Symlinked directories are not followed to avoid cycles
        let measured = if file_type.is_symlink() {
            fs::metadata(&entry_path).map(|target| if target.is_file() { target.len() } else { 0 })
        } else if file_type.is_dir() {
            Ok(directory_size(&entry_path))
        } else if file_type.is_file() {
            entry.metadata().map(|m| m.len())
        } else {
            Ok(0)
        };

        match measured {
            Ok(size) => total += size,
            Err(e) => debug!(path = %entry_path.display(), error = %e, "Cannot measure entry, skipping"),
        }
    }
    total
}

/// Map an absolute source path to its place beneath `target`.
///
/// The drive prefix and root are dropped so the original hierarchy is
/// replicated: `/home/u/doc.txt` under `/backup/b` becomes
/// `/backup/b/home/u/doc.txt`.
pub fn rebase_under(target: &Path, source: &Path) -> PathBuf {
    let relative: PathBuf = source
        .components()
        .filter(|c| !matches!(c, Component::Prefix(_) | Component::RootDir))
        .collect();
    target.join(relative)
}

/// Expand one source into the items to copy for it.
///
/// A file yields a single item. A directory yields an item for itself
/// followed by every entry beneath it, depth first.
///
/// # Errors
/// Returns the I/O error if the source itself cannot be read. Failures
/// listing nested directories are recorded on that directory's item.
pub fn enumerate_source(source: &Path, target: &Path) -> io::Result<Vec<PlannedItem>> {
    let metadata = probe_readable(source)?;
    let destination_root = rebase_under(target, source);

    if !metadata.is_dir() {
        return Ok(vec![PlannedItem {
            source_path: source.to_path_buf(),
            destination_path: destination_root,
            file_size: metadata.len(),
            is_dir: false,
            enumeration_error: None,
        }]);
    }

    fn recurse(path: &Path, destination: &Path, items: &mut Vec<PlannedItem>) -> io::Result<()> {
        for entry in fs::read_dir(path)? {
            let entry = entry?;
            let entry_path = entry.path();
            let dest_path = destination.join(entry.file_name());
            let file_type = entry.file_type()?;

            // Dangling links are planned so the copy records them as failures
            let (is_dir, is_file) = if file_type.is_symlink() {
                match fs::metadata(&entry_path) {
                    Ok(target) if target.is_dir() => continue,
                    Ok(target) => (false, target.is_file()),
                    Err(_) => (false, true),
                }
            } else {
                (file_type.is_dir(), file_type.is_file())
            };

            if !is_dir && !is_file {
                debug!(path = %entry_path.display(), "Skipping special file");
                continue;
            }

            if is_dir {
                items.push(PlannedItem {
                    source_path: entry_path.clone(),
                    destination_path: dest_path.clone(),
                    file_size: 0,
                    is_dir: true,
                    enumeration_error: None,
                });
                let dir_index = items.len() - 1;

                // Record the failure on the directory item and continue
                if let Err(e) = recurse(&entry_path, &dest_path, items) {
                    items[dir_index].enumeration_error = Some(e);
                }
            } else {
                let file_size = fs::metadata(&entry_path).map(|m| m.len()).unwrap_or(0);
                items.push(PlannedItem {
                    source_path: entry_path,
                    destination_path: dest_path,
                    file_size,
                    is_dir: false,
                    enumeration_error: None,
                });
            }
        }
        Ok(())
    }

    let mut items = vec![PlannedItem {
        source_path: source.to_path_buf(),
        destination_path: destination_root.clone(),
        file_size: 0,
        is_dir: true,
        enumeration_error: None,
    }];
    recurse(source, &destination_root, &mut items)?;
    Ok(items)
}

/// Copy a file in chunks of `chunk_size` bytes, preserving its modification time.
///
/// `on_chunk` is invoked with the length of every chunk written.
///
/// # Returns
/// Number of bytes copied
///
/// # Errors
/// Returns CopyError if the copy fails; a partial destination file may remain.
pub fn copy_file_chunked(
    src: &Path,
    dst: &Path,
    chunk_size: usize,
    on_chunk: &mut dyn FnMut(u64),
) -> Result<u64, CopyError> {
    ensure_parent_dir_exists(dst)?;

    let read_error = |e: io::Error| CopyError::Read {
        path: src.to_path_buf(),
        source: e,
    };
    let write_error = |e: io::Error| CopyError::Write {
        path: dst.to_path_buf(),
        source: e,
    };

    if !fs::metadata(src).map_err(read_error)?.is_file() {
        return Err(read_error(not_a_regular_file()));
    }
    let mut src_file = fs::File::open(src).map_err(read_error)?;
    let src_mtime = src_file.metadata().and_then(|m| m.modified()).ok();
    let mut dst_file = fs::File::create(dst).map_err(write_error)?;

    let mut buffer = vec![0u8; chunk_size.max(1)];
    let mut bytes_copied = 0u64;
    loop {
        let length = match src_file.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(read_error(e)),
        };
        dst_file.write_all(&buffer[..length]).map_err(write_error)?;
        bytes_copied += length as u64;
        on_chunk(length as u64);
    }
    dst_file.flush().map_err(write_error)?;
    drop(dst_file);

    if let Some(mtime) = src_mtime {
        let _ = filetime::set_file_mtime(dst, filetime::FileTime::from_system_time(mtime));
    }

    Ok(bytes_copied)
}

/// Ensure the parent directory of a path exists, creating it if necessary.
///
/// # Errors
/// Returns CopyError if directory creation fails
pub fn ensure_parent_dir_exists(path: &Path) -> Result<(), CopyError> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => ensure_dir_exists(parent),
        _ => Ok(()),
    }
}

/// Ensure `path` is a directory, creating it and any missing ancestors.
pub fn ensure_dir_exists(path: &Path) -> Result<(), CopyError> {
    match fs::metadata(path) {
        Ok(metadata) if metadata.is_dir() => Ok(()),
        Ok(_) => Err(CopyError::DirectoryCreationFailed {
            path: path.to_path_buf(),
            source: io::Error::new(
                io::ErrorKind::InvalidInput,
                "Path exists but is not a directory",
            ),
        }),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            fs::create_dir_all(path).map_err(|e| CopyError::DirectoryCreationFailed {
                path: path.to_path_buf(),
                source: e,
            })
        }
        Err(e) => Err(CopyError::DirectoryCreationFailed {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

/// Check that new entries can be created in `dir` by creating and removing a probe file.
pub fn probe_writable(dir: &Path) -> io::Result<()> {
    let probe = tempfile::Builder::new()
        .prefix(".mirror-write-probe")
        .tempfile_in(dir)?;
    probe.close()
}
