//! Error types for the backup engine.
//!
//! Errors are split by where they surface:
//! - `SpecError`: a setter or add/remove call on a `BackupSpec` was rejected
//! - `ValidationError`: a spec is incomplete; carries every violation at once
//! - `EngineError`: a run could not start or was aborted before copying
//! - `CopyError`: a single file failed mid-run (recorded, never propagated)
//! - `PersistError`: saving or loading a spec file failed

use std::fmt;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Rejections raised by `BackupSpec` mutators.
///
/// A rejected call leaves the spec exactly as it was.
#[derive(Debug, Error)]
pub enum SpecError {
    /// Backup name is empty or cannot exist as a file name on this host
    #[error("Invalid backup name '{name}': {reason}")]
    InvalidName { name: String, reason: String },

    /// Destination is missing, not a directory, or cannot be resolved
    #[error("Invalid destination {}: {reason}", path.display())]
    InvalidDestination { path: PathBuf, reason: String },

    /// Source path does not exist or cannot be read
    #[error("Invalid source path {}: {reason}", path.display())]
    InvalidPath { path: PathBuf, reason: String },

    /// Source path is not part of the spec
    #[error("Source path not found in backup: {}", path.display())]
    NotFound { path: PathBuf },
}

/// A single reason a spec is not ready to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Violation {
    MissingSpec,
    NoSources,
    MissingName,
    MissingDestination,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Violation::MissingSpec => write!(f, "Backup specification cannot be empty."),
            Violation::NoSources => {
                write!(f, "Backup contains no files. Aborting backup operation.")
            }
            Violation::MissingName => {
                write!(f, "Backup has no name. Aborting backup operation.")
            }
            Violation::MissingDestination => {
                write!(f, "No destination specified for backup. Aborting backup operation.")
            }
        }
    }
}

/// Every violation found in a spec, reported together.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{}", join_lines(.violations))]
pub struct ValidationError {
    pub violations: Vec<Violation>,
}

/// One message per line.
fn join_lines(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(Violation::to_string)
        .collect::<Vec<_>>()
        .join("\n")
}

/// Errors that stop a run before any bytes are copied.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("{0}")]
    Validation(#[from] ValidationError),

    /// The backup folder `destination/name` already exists
    #[error("Backup folder already exists: {}", path.display())]
    DestinationConflict { path: PathBuf },

    /// The destination directory does not accept new entries
    #[error("Destination is not writable: {}", path.display())]
    DestinationNotWritable {
        path: PathBuf,
        #[source]
        source: Option<io::Error>,
    },

    /// A source vanished or lost permissions since it was added
    #[error("Source is no longer readable: {}", path.display())]
    SourceUnreadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Creating the backup folder failed for a reason other than permissions
    #[error("Failed to create backup folder: {}", path.display())]
    TargetCreationFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// `start` was called on an engine that already ran
    #[error("Backup run already started")]
    AlreadyStarted,

    /// The background worker terminated without reporting a result
    #[error("Backup worker stopped unexpectedly")]
    WorkerPanicked,
}

impl EngineError {
    /// Extract the OS error code from this error, if available.
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            Self::DestinationNotWritable { source: Some(source), .. }
            | Self::SourceUnreadable { source, .. }
            | Self::TargetCreationFailed { source, .. } => source.raw_os_error(),
            _ => None,
        }
    }
}

/// Failure copying one file. The run records it and moves on.
#[derive(Debug, Error)]
pub enum CopyError {
    #[error("Failed to read file: {}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to write file: {}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to create directory: {}", path.display())]
    DirectoryCreationFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl CopyError {
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            Self::Read { source, .. }
            | Self::Write { source, .. }
            | Self::DirectoryCreationFailed { source, .. } => source.raw_os_error(),
        }
    }
}

/// Errors from saving or loading a spec file.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("Backup specification file not found: {}", path.display())]
    NotFound { path: PathBuf },

    /// File exists but could not be opened or parsed
    #[error("Backup specification file is unreadable: {} ({reason})", path.display())]
    Unreadable { path: PathBuf, reason: String },

    #[error("Backup specification file {} has unsupported format version {version}", path.display())]
    UnsupportedVersion { path: PathBuf, version: u32 },

    /// Parent directory or file could not be written
    #[error("Failed to write backup specification: {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}
