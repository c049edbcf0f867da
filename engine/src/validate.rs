//! Pre-run checks for backup specifications.
//!
//! `validate` reports every problem with a spec in one error instead of
//! stopping at the first, so a front end can show them in a single prompt.
//! The name and destination checks used by the `BackupSpec` setters live
//! here as well.

use std::fs;
use std::path::{Component, Path, PathBuf};
use crate::error::{SpecError, ValidationError, Violation};
use crate::model::BackupSpec;

/// Collect every violation in `spec` without failing.
pub fn violations(spec: Option<&BackupSpec>) -> Vec<Violation> {
    let Some(spec) = spec else {
        return vec![Violation::MissingSpec];
    };

    let mut found = Vec::new();
    if spec.is_empty() {
        found.push(Violation::NoSources);
    }
    if spec.name().map_or(true, str::is_empty) {
        found.push(Violation::MissingName);
    }
    if spec.destination().map_or(true, |d| d.as_os_str().is_empty()) {
        found.push(Violation::MissingDestination);
    }
    found
}

/// Check that a spec is complete enough to run.
///
/// # Errors
/// One `ValidationError` carrying every violation found.
pub fn validate(spec: Option<&BackupSpec>) -> Result<(), ValidationError> {
    let violations = violations(spec);
    if violations.is_empty() {
        Ok(())
    } else {
        Err(ValidationError { violations })
    }
}

/// Check that `name` can be used as the backup folder name on this host.
///
/// The name must be a single plain path component, and a zero-byte file
/// with that name must be creatable in a scratch directory.
pub fn check_name(name: &str) -> Result<(), SpecError> {
    let invalid = |reason: String| SpecError::InvalidName {
        name: name.to_string(),
        reason,
    };

    if name.trim().is_empty() {
        return Err(invalid("Name is empty".to_string()));
    }

    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(part)), None) if part == name => {}
        _ => return Err(invalid("Name must be a single file name".to_string())),
    }

    let scratch = tempfile::Builder::new()
        .prefix("mirror-name-check")
        .tempdir()
        .map_err(|e| invalid(format!("Cannot create scratch directory: {}", e)))?;
    let probe = scratch.path().join(name);
    fs::File::create(&probe).map_err(|e| invalid(e.to_string()))?;
    fs::remove_file(&probe).map_err(|e| invalid(e.to_string()))?;
    Ok(())
}

/// Resolve `path` to the canonical form of an existing directory.
pub fn check_destination(path: &Path) -> Result<PathBuf, SpecError> {
    let invalid = |reason: String| SpecError::InvalidDestination {
        path: path.to_path_buf(),
        reason,
    };

    if path.as_os_str().is_empty() {
        return Err(invalid("Destination is empty".to_string()));
    }

    let canonical = fs::canonicalize(path).map_err(|e| invalid(e.to_string()))?;
    let metadata = fs::metadata(&canonical).map_err(|e| invalid(e.to_string()))?;
    if !metadata.is_dir() {
        return Err(invalid("Destination is not a directory".to_string()));
    }
    Ok(canonical)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_spec_reports_single_violation() {
        let err = validate(None).expect_err("missing spec must fail");
        assert_eq!(err.violations, vec![Violation::MissingSpec]);
    }

    #[test]
    fn test_empty_spec_reports_all_violations() {
        let spec = BackupSpec::new();
        let err = validate(Some(&spec)).expect_err("empty spec must fail");

        assert_eq!(
            err.violations,
            vec![
                Violation::NoSources,
                Violation::MissingName,
                Violation::MissingDestination
            ]
        );
        // Every violation appears in the consolidated message
        let message = err.to_string();
        assert_eq!(message.lines().count(), 3);
        assert!(message.contains("no files"));
        assert!(message.contains("no name"));
        assert!(message.contains("destination"));
    }

    #[test]
    fn test_partial_spec_reports_remaining_violations() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let mut spec = BackupSpec::new();
        spec.set_destination(temp_dir.path()).expect("valid destination");

        let found = violations(Some(&spec));
        assert_eq!(found, vec![Violation::NoSources, Violation::MissingName]);
    }

    #[test]
    fn test_complete_spec_passes() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let file = temp_dir.path().join("a.txt");
        fs::write(&file, b"a").expect("Failed to write file");

        let mut spec = BackupSpec::with_name_and_destination("backup", temp_dir.path())
            .expect("valid spec");
        spec.add_source(&file).expect("add source");

        assert!(validate(Some(&spec)).is_ok());
    }

    #[test]
    fn test_check_name_accepts_plain_names() {
        assert!(check_name("backup").is_ok());
        assert!(check_name("Backup 2024-01-01").is_ok());
    }

    #[test]
    fn test_check_name_rejects_paths_and_empty() {
        for name in ["", "   ", "/..\\...//*", "a/b", "..", ".", "/abs"] {
            assert!(
                matches!(check_name(name), Err(SpecError::InvalidName { .. })),
                "expected '{}' to be rejected",
                name
            );
        }
    }

    #[test]
    fn test_check_destination_canonicalizes() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let nested = temp_dir.path().join("nested");
        fs::create_dir(&nested).expect("create nested");

        let resolved = check_destination(&nested.join("..").join("nested")).expect("valid");
        assert_eq!(resolved, fs::canonicalize(&nested).expect("canonicalize"));
    }
}
