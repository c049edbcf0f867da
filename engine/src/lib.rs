//! # Mirror Engine - One-Shot Backup Library
//!
//! A headless backup engine: copy a named list of files and folders into a
//! fresh backup folder, replicating each source's full directory hierarchy.
//! Designed as the foundation for any front end (CLI, GUI, automation).
//!
//! ## Overview
//!
//! - `BackupSpec` describes a backup: name, destination, ordered sources
//! - `validate` reports every problem with a spec in one error
//! - `CopyEngine` runs a spec on a background thread with cooperative
//!   cancellation and batched progress reporting
//! - `save_spec` / `load_spec` persist a spec as versioned JSON
//! - Per-file failures are logged and skipped, never fatal to the run
//!
//! ## Basic Usage
//!
//! ```no_run
//! use engine::{BackupSpec, CopyEngine, ProgressSink, ProgressSnapshot, RunOutcome};
//!
//! struct Printer;
//!
//! impl ProgressSink for Printer {
//!     fn on_progress(&mut self, batch: &[ProgressSnapshot]) {
//!         for snapshot in batch {
//!             println!("{}", snapshot);
//!         }
//!     }
//!
//!     fn on_completion(&mut self, outcome: &RunOutcome) {
//!         println!("Finished: {:?}", outcome.state());
//!     }
//! }
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut spec = BackupSpec::with_name_and_destination("nightly", "/mnt/backups")?;
//! spec.add_source("/home/u/documents")?;
//!
//! let mut engine = CopyEngine::new(&spec)?;
//! let outcome = engine.run(&mut Printer);
//!
//! if let Some(report) = outcome.report() {
//!     println!("Copied {} files into {}", report.files_copied, report.target.display());
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - **model**: `BackupSpec` and its source entries
//! - **validate**: pre-run completeness checks, name and destination rules
//! - **error**: Error types and handling
//! - **fs_ops**: Low-level filesystem operations
//! - **job**: Run orchestration (prepare, copy, cancel)
//! - **progress**: Progress snapshots, sink trait, batched delivery
//! - **persist**: Saving and loading specs
//! - **observed**: Change notifications for list-style front ends

pub mod model;
pub mod error;
pub mod validate;
pub mod fs_ops;
pub mod job;
pub mod progress;
pub mod persist;
pub mod observed;

// Re-export main types and functions
pub use model::{BackupSpec, SourceEntry};
pub use error::{CopyError, EngineError, PersistError, SpecError, ValidationError, Violation};
pub use validate::validate;
pub use job::{
    check_target, CancelHandle, CopyEngine, EngineOptions, FileFailure, RunOutcome, RunReport,
    RunState,
};
pub use progress::{deliver, EngineEvent, ProgressSink, ProgressSnapshot, ProgressStatus};
pub use persist::{load_spec, save_spec};
pub use observed::{ObservedSpec, SpecChange};
