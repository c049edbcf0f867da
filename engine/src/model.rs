//! Core data model for backup specifications.
//!
//! A `BackupSpec` names one backup job: what to call the backup folder,
//! which directory to create it in, and the ordered list of files and
//! folders to copy into it. Every mutator validates its input against the
//! filesystem and rejects bad values without touching the spec.

use std::env;
use std::path::{Path, PathBuf};
use serde::{Deserialize, Serialize};
use tracing::debug;
use crate::error::SpecError;
use crate::fs_ops;
use crate::validate;

/// One source path and its size on disk when it was added.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceEntry {
    /// Absolute path to a file or folder
    pub path: PathBuf,

    /// Bytes on disk at insertion time (recursive for folders)
    pub size: u64,
}

/// A named, destination-bound, ordered collection of source paths.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackupSpec {
    name: Option<String>,
    destination: Option<PathBuf>,
    sources: Vec<SourceEntry>,
    total_bytes: u64,
}

impl BackupSpec {
    /// Create an empty spec with no name, destination, or sources.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty spec with its name and destination already set.
    pub fn with_name_and_destination<P: AsRef<Path>>(
        name: &str,
        destination: P,
    ) -> Result<Self, SpecError> {
        let mut spec = Self::new();
        spec.set_name(name)?;
        spec.set_destination(destination)?;
        Ok(spec)
    }

    /// Rebuild a spec from persisted parts without touching the filesystem.
    pub(crate) fn from_parts(
        name: Option<String>,
        destination: Option<PathBuf>,
        sources: Vec<SourceEntry>,
        total_bytes: u64,
    ) -> Self {
        BackupSpec {
            name,
            destination,
            sources,
            total_bytes,
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Set the backup folder name.
    ///
    /// # Errors
    /// `SpecError::InvalidName` if the name is empty or a file by that name
    /// cannot be created on this host.
    pub fn set_name(&mut self, name: &str) -> Result<(), SpecError> {
        validate::check_name(name)?;
        self.name = Some(name.to_string());
        Ok(())
    }

    /// Canonical path of the directory the backup folder is created in.
    pub fn destination(&self) -> Option<&Path> {
        self.destination.as_deref()
    }

    /// Set the destination directory, stored in canonical form.
    ///
    /// # Errors
    /// `SpecError::InvalidDestination` if the path is empty, missing, or not a directory.
    pub fn set_destination<P: AsRef<Path>>(&mut self, destination: P) -> Result<(), SpecError> {
        let canonical = validate::check_destination(destination.as_ref())?;
        self.destination = Some(canonical);
        Ok(())
    }

    /// The backup folder a run would create: `destination/name`.
    pub fn target(&self) -> Option<PathBuf> {
        match (&self.destination, &self.name) {
            (Some(destination), Some(name)) => Some(destination.join(name)),
            _ => None,
        }
    }

    pub fn sources(&self) -> &[SourceEntry] {
        &self.sources
    }

    pub fn get(&self, index: usize) -> Option<&Path> {
        self.sources.get(index).map(|entry| entry.path.as_path())
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Sum of source sizes captured when each source was added.
    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    pub fn contains<P: AsRef<Path>>(&self, path: P) -> bool {
        self.position(path.as_ref()).is_some()
    }

    /// Append a source file or folder.
    ///
    /// Relative paths are resolved against the current directory. Adding a
    /// path that is already present does nothing.
    ///
    /// # Returns
    /// `true` if the path was appended, `false` if it was already present.
    ///
    /// # Errors
    /// `SpecError::InvalidPath` if the path does not exist or cannot be read.
    pub fn add_source<P: AsRef<Path>>(&mut self, path: P) -> Result<bool, SpecError> {
        let path = absolute(path.as_ref())?;
        if self.position(&path).is_some() {
            debug!(path = %path.display(), "Source already in backup");
            return Ok(false);
        }

        let invalid = |e: std::io::Error| SpecError::InvalidPath {
            path: path.clone(),
            reason: e.to_string(),
        };
        fs_ops::probe_readable(&path).map_err(invalid)?;
        let size = fs_ops::disk_size(&path).map_err(invalid)?;

        debug!(path = %path.display(), size, "Adding source");
        self.total_bytes += size;
        self.sources.push(SourceEntry { path, size });
        Ok(true)
    }

    /// Remove a source and subtract its cached size.
    ///
    /// # Errors
    /// `SpecError::NotFound` if the path is not in the spec.
    pub fn remove_source<P: AsRef<Path>>(&mut self, path: P) -> Result<SourceEntry, SpecError> {
        let path = absolute(path.as_ref())?;
        let index = self
            .position(&path)
            .ok_or_else(|| SpecError::NotFound { path: path.clone() })?;

        let entry = self.sources.remove(index);
        self.total_bytes = self.total_bytes.saturating_sub(entry.size);
        debug!(path = %entry.path.display(), size = entry.size, "Removed source");
        Ok(entry)
    }

    /// Index of `path` in insertion order, if present.
    pub fn index_of<P: AsRef<Path>>(&self, path: P) -> Option<usize> {
        self.position(path.as_ref())
    }

    fn position(&self, path: &Path) -> Option<usize> {
        let resolved = absolute(path).ok()?;
        self.sources.iter().position(|entry| entry.path == resolved)
    }
}

/// Resolve `path` against the current directory without touching the target.
fn absolute(path: &Path) -> Result<PathBuf, SpecError> {
    if path.as_os_str().is_empty() {
        return Err(SpecError::InvalidPath {
            path: path.to_path_buf(),
            reason: "Path is empty".to_string(),
        });
    }
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    env::current_dir()
        .map(|cwd| cwd.join(path))
        .map_err(|e| SpecError::InvalidPath {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
}

impl<'a> IntoIterator for &'a BackupSpec {
    type Item = &'a SourceEntry;
    type IntoIter = std::slice::Iter<'a, SourceEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.sources.iter()
    }
}

/// Current on-disk size of every source, for comparison with the cached total.
pub fn measure_sources(spec: &BackupSpec) -> u64 {
    spec.sources
        .iter()
        .filter_map(|entry| fs_ops::disk_size(&entry.path).ok())
        .sum()
}
