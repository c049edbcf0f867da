//! Saving and loading backup specifications.
//!
//! A spec is stored as a single JSON document tagged with a format version:
//!
//! ```json
//! {
//!   "format_version": 1,
//!   "name": "nightly",
//!   "destination": "/mnt/backups",
//!   "sources": [{ "path": "/home/u/docs", "size": 4096 }],
//!   "total_bytes": 4096
//! }
//! ```
//!
//! Loading does not re-check paths against the filesystem; a run does that.

use std::collections::HashSet;
use std::fs;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use crate::error::PersistError;
use crate::model::{BackupSpec, SourceEntry};
use crate::validate;

/// Version written by `save_spec`; `load_spec` accepts this and older.
pub const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct SpecRecord {
    format_version: u32,
    name: Option<String>,
    destination: Option<PathBuf>,
    #[serde(default)]
    sources: Vec<SourceEntry>,
    total_bytes: u64,
}

/// Write `spec` to `path`, replacing any file already there.
///
/// Missing parent directories are created. The file is written to a
/// temporary sibling first and renamed into place.
///
/// # Errors
/// `PersistError::Io` if the parent cannot be created or the file cannot be written.
pub fn save_spec<P: AsRef<Path>>(spec: &BackupSpec, path: P) -> Result<(), PersistError> {
    let path = path.as_ref();
    let io_error = |e: io::Error| PersistError::Io {
        path: path.to_path_buf(),
        source: e,
    };

    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent).map_err(io_error)?;

    let record = SpecRecord {
        format_version: FORMAT_VERSION,
        name: spec.name().map(str::to_string),
        destination: spec.destination().map(Path::to_path_buf),
        sources: spec.sources().to_vec(),
        total_bytes: spec.total_bytes(),
    };

    let staged = tempfile::NamedTempFile::new_in(parent).map_err(io_error)?;
    {
        let mut writer = BufWriter::new(staged.as_file());
        serde_json::to_writer_pretty(&mut writer, &record)
            .map_err(|e| io_error(io::Error::new(io::ErrorKind::Other, e)))?;
        writer.flush().map_err(io_error)?;
    }
    staged.persist(path).map_err(|e| io_error(e.error))?;

    info!(path = %path.display(), sources = record.sources.len(), "Saved backup specification");
    Ok(())
}

/// Read a spec previously written by `save_spec`.
///
/// # Errors
/// - `PersistError::NotFound` if no file exists at `path`
/// - `PersistError::Unreadable` if it cannot be opened or parsed, or holds a
///   name that is not a plain file name or paths that are not absolute
/// - `PersistError::UnsupportedVersion` if it was written by a newer format
pub fn load_spec<P: AsRef<Path>>(path: P) -> Result<BackupSpec, PersistError> {
    let path = path.as_ref();
    let unreadable = |reason: String| PersistError::Unreadable {
        path: path.to_path_buf(),
        reason,
    };

    let file = fs::File::open(path).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => PersistError::NotFound {
            path: path.to_path_buf(),
        },
        _ => unreadable(e.to_string()),
    })?;

    let record: SpecRecord = serde_json::from_reader(BufReader::new(file))
        .map_err(|e| unreadable(e.to_string()))?;

    if record.format_version > FORMAT_VERSION {
        return Err(PersistError::UnsupportedVersion {
            path: path.to_path_buf(),
            version: record.format_version,
        });
    }

    let mut seen = HashSet::new();
    if let Some(dup) = record.sources.iter().find(|entry| !seen.insert(&entry.path)) {
        return Err(unreadable(format!("Duplicate source {}", dup.path.display())));
    }

    let summed: u64 = record.sources.iter().map(|entry| entry.size).sum();
    if summed != record.total_bytes {
        return Err(unreadable(format!(
            "Total bytes {} does not match source sizes {}",
            record.total_bytes, summed
        )));
    }

    // Same rules the setters enforce, minus the filesystem lookups
    if let Some(name) = &record.name {
        validate::check_name(name).map_err(|e| unreadable(e.to_string()))?;
    }
    if let Some(destination) = record.destination.as_deref().filter(|d| !d.is_absolute()) {
        return Err(unreadable(format!(
            "Destination {} is not absolute",
            destination.display()
        )));
    }
    if let Some(entry) = record.sources.iter().find(|entry| !entry.path.is_absolute()) {
        return Err(unreadable(format!("Source {} is not absolute", entry.path.display())));
    }

    debug!(path = %path.display(), sources = record.sources.len(), "Loaded backup specification");
    Ok(BackupSpec::from_parts(
        record.name,
        record.destination,
        record.sources,
        record.total_bytes,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_spec(root: &Path) -> BackupSpec {
        let src = root.join("src");
        let dst = root.join("dst");
        fs::create_dir_all(src.join("folder")).expect("create src");
        fs::create_dir(&dst).expect("create dst");
        fs::write(src.join("b.txt"), b"bbbb").expect("write b");
        fs::write(src.join("a.txt"), b"a").expect("write a");
        fs::write(src.join("folder").join("c.txt"), b"cc").expect("write c");

        let mut spec = BackupSpec::with_name_and_destination("nightly", &dst).expect("spec");
        // Insertion order differs from name order on purpose
        spec.add_source(src.join("b.txt")).expect("add b");
        spec.add_source(src.join("folder")).expect("add folder");
        spec.add_source(src.join("a.txt")).expect("add a");
        spec
    }

    #[test]
    fn test_save_then_load_round_trips() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let spec = sample_spec(temp_dir.path());
        let path = temp_dir.path().join("specs").join("DefaultFileSet");

        save_spec(&spec, &path).expect("save");
        let loaded = load_spec(&path).expect("load");

        assert_eq!(loaded.name(), spec.name());
        assert_eq!(loaded.destination(), spec.destination());
        assert_eq!(loaded.sources(), spec.sources());
        assert_eq!(loaded.total_bytes(), 7);
        assert_eq!(loaded, spec);
    }

    #[test]
    fn test_empty_spec_round_trips() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = temp_dir.path().join("empty.json");

        save_spec(&BackupSpec::new(), &path).expect("save");
        assert_eq!(load_spec(&path).expect("load"), BackupSpec::new());
    }

    #[test]
    fn test_save_overwrites_existing_file() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = temp_dir.path().join("spec.json");
        fs::write(&path, b"old contents").expect("write old");

        let spec = sample_spec(temp_dir.path());
        save_spec(&spec, &path).expect("save");
        assert_eq!(load_spec(&path).expect("load"), spec);
    }

    #[test]
    fn test_save_fails_when_parent_is_a_file() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let blocker = temp_dir.path().join("blocker");
        fs::write(&blocker, b"x").expect("write blocker");

        let result = save_spec(&BackupSpec::new(), blocker.join("spec.json"));
        assert!(matches!(result, Err(PersistError::Io { .. })));
    }

    #[test]
    fn test_load_missing_file() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let result = load_spec(temp_dir.path().join("missing"));
        assert!(matches!(result, Err(PersistError::NotFound { .. })));
    }

    #[test]
    fn test_load_garbage_is_unreadable() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = temp_dir.path().join("garbage");
        fs::write(&path, b"\x00\x01not json").expect("write garbage");

        assert!(matches!(load_spec(&path), Err(PersistError::Unreadable { .. })));
    }

    #[test]
    fn test_load_directory_is_unreadable() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let result = load_spec(temp_dir.path());
        assert!(matches!(result, Err(PersistError::Unreadable { .. })));
    }

    #[test]
    fn test_load_rejects_newer_format() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = temp_dir.path().join("future.json");
        fs::write(
            &path,
            br#"{"format_version": 99, "name": null, "destination": null, "sources": [], "total_bytes": 0}"#,
        )
        .expect("write");

        assert!(matches!(
            load_spec(&path),
            Err(PersistError::UnsupportedVersion { version: 99, .. })
        ));
    }

    #[test]
    fn test_load_rejects_names_and_paths_outside_destination() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let dst = temp_dir.path().join("dst");
        let source = temp_dir.path().join("a.txt");
        let path = temp_dir.path().join("spec.json");

        let write_record = |name: &str, destination: &Path, source: &Path| {
            let record = serde_json::json!({
                "format_version": 1,
                "name": name,
                "destination": destination,
                "sources": [{ "path": source, "size": 1 }],
                "total_bytes": 1,
            });
            fs::write(&path, record.to_string()).expect("write");
        };

        write_record("nightly", &dst, &source);
        assert!(load_spec(&path).is_ok());

        for name in ["../outside", "a/b", "..", ""] {
            write_record(name, &dst, &source);
            assert!(
                matches!(load_spec(&path), Err(PersistError::Unreadable { .. })),
                "expected name '{}' to be rejected",
                name
            );
        }
        let absolute_name = dst.join("elsewhere");
        write_record(&absolute_name.to_string_lossy(), &dst, &source);
        assert!(matches!(load_spec(&path), Err(PersistError::Unreadable { .. })));

        write_record("nightly", Path::new("relative/dst"), &source);
        assert!(matches!(load_spec(&path), Err(PersistError::Unreadable { .. })));

        write_record("nightly", &dst, Path::new("relative.txt"));
        assert!(matches!(load_spec(&path), Err(PersistError::Unreadable { .. })));
    }

    #[test]
    fn test_load_rejects_inconsistent_records() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let duplicated = temp_dir.path().join("dup.json");
        fs::write(
            &duplicated,
            br#"{"format_version": 1, "name": "n", "destination": "/d",
                "sources": [{"path": "/a", "size": 1}, {"path": "/a", "size": 1}],
                "total_bytes": 2}"#,
        )
        .expect("write");
        assert!(matches!(load_spec(&duplicated), Err(PersistError::Unreadable { .. })));

        let mismatched = temp_dir.path().join("sum.json");
        fs::write(
            &mismatched,
            br#"{"format_version": 1, "name": "n", "destination": "/d",
                "sources": [{"path": "/a", "size": 1}],
                "total_bytes": 5}"#,
        )
        .expect("write");
        assert!(matches!(load_spec(&mismatched), Err(PersistError::Unreadable { .. })));
    }
}
