//! Backup execution.
//!
//! A `CopyEngine` takes a snapshot of a `BackupSpec` and copies every source
//! into a fresh backup folder on a background thread:
//!
//! `Idle -> Preparing -> Copying -> Completed | Failed | Cancelled`
//!
//! - Preparing: the backup folder `destination/name` must not exist and the
//!   destination must be writable. Any failure here aborts the run before a
//!   single byte is copied.
//! - Copying: every source is re-resolved and expanded, then files are
//!   streamed in chunks to their re-rooted place under the backup folder.
//!   A file that fails is logged, recorded in the `RunReport`, and skipped.
//!
//! Cancellation is checked before each file starts, never in the middle of
//! one.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime};
use crossbeam_channel::{bounded, Receiver, Sender};
use tracing::{debug, error, info, info_span, warn};
use uuid::Uuid;
use crate::error::{CopyError, EngineError, ValidationError};
use crate::fs_ops::{self, PlannedItem};
use crate::model::BackupSpec;
use crate::progress::{deliver, EngineEvent, ProgressSink, ProgressSnapshot};
use crate::validate;

/// Tuning knobs for a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineOptions {
    /// Bytes read and written per chunk; one progress snapshot per chunk
    pub chunk_size: usize,

    /// Snapshots the progress channel holds before the worker waits
    pub channel_capacity: usize,
}

impl Default for EngineOptions {
    fn default() -> Self {
        EngineOptions {
            chunk_size: 64 * 1024,
            channel_capacity: 256,
        }
    }
}

/// Lifecycle of a single run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Preparing,
    Copying,
    Completed,
    Failed,
    Cancelled,
}

impl RunState {
    /// Returns true if this state is terminal (no further changes expected).
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Completed | RunState::Failed | RunState::Cancelled)
    }
}

/// A file or directory the run skipped because of an I/O error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileFailure {
    pub path: PathBuf,
    pub message: String,
    pub error_code: Option<i32>,
}

impl FileFailure {
    fn from_copy_error(path: &Path, err: &CopyError) -> Self {
        FileFailure {
            path: path.to_path_buf(),
            message: err.to_string(),
            error_code: err.raw_os_error(),
        }
    }
}

/// Summary of a run that got past preparation.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: Uuid,

    /// Backup folder the run created
    pub target: PathBuf,

    pub files_copied: usize,
    pub bytes_copied: u64,

    /// Files and directories skipped after an error, in the order they failed
    pub failures: Vec<FileFailure>,

    pub start_time: SystemTime,
    pub end_time: Option<SystemTime>,
}

impl RunReport {
    pub(crate) fn empty(target: PathBuf) -> Self {
        RunReport {
            run_id: Uuid::new_v4(),
            target,
            files_copied: 0,
            bytes_copied: 0,
            failures: Vec::new(),
            start_time: SystemTime::now(),
            end_time: None,
        }
    }

    /// True if every planned file was copied.
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn elapsed(&self) -> Option<Duration> {
        self.end_time?.duration_since(self.start_time).ok()
    }
}

/// How a run ended.
#[derive(Debug)]
pub enum RunOutcome {
    /// Every source was visited; check `RunReport::is_clean` for skipped files
    Completed(RunReport),
    /// Stopped between files at the caller's request
    Cancelled(RunReport),
    /// Aborted before copying
    Failed(EngineError),
}

impl RunOutcome {
    pub fn state(&self) -> RunState {
        match self {
            RunOutcome::Completed(_) => RunState::Completed,
            RunOutcome::Cancelled(_) => RunState::Cancelled,
            RunOutcome::Failed(_) => RunState::Failed,
        }
    }

    pub fn report(&self) -> Option<&RunReport> {
        match self {
            RunOutcome::Completed(report) | RunOutcome::Cancelled(report) => Some(report),
            RunOutcome::Failed(_) => None,
        }
    }
}

/// Cooperative cancellation flag shared with a running engine.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Runs one backup on a background thread.
///
/// The spec is cloned when the engine is created, so later edits to the
/// caller's spec do not affect a run in progress. An engine runs at most once.
#[derive(Debug)]
pub struct CopyEngine {
    spec: BackupSpec,
    options: EngineOptions,
    state: Arc<Mutex<RunState>>,
    cancel: CancelHandle,
    worker: Option<JoinHandle<()>>,
}

impl CopyEngine {
    /// Create an engine for `spec` with default options.
    ///
    /// # Errors
    /// `EngineError::Validation` listing every problem with the spec.
    pub fn new(spec: &BackupSpec) -> Result<Self, EngineError> {
        Self::with_options(spec, EngineOptions::default())
    }

    pub fn with_options(spec: &BackupSpec, options: EngineOptions) -> Result<Self, EngineError> {
        validate::validate(Some(spec))?;
        Ok(CopyEngine {
            spec: spec.clone(),
            options,
            state: Arc::new(Mutex::new(RunState::Idle)),
            cancel: CancelHandle::default(),
            worker: None,
        })
    }

    /// Use `cancel` instead of a fresh flag, so a token created before the
    /// engine (a signal handler's, say) can stop this run.
    pub fn with_cancel_handle(mut self, cancel: CancelHandle) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn spec(&self) -> &BackupSpec {
        &self.spec
    }

    pub fn state(&self) -> RunState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start the run on a background thread.
    ///
    /// # Returns
    /// The event stream for this run. Drain it (for example with
    /// `progress::deliver`); the worker waits when the channel is full.
    ///
    /// # Errors
    /// `EngineError::AlreadyStarted` if this engine has already been started.
    pub fn start(&mut self) -> Result<Receiver<EngineEvent>, EngineError> {
        {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            if *state != RunState::Idle || self.worker.is_some() {
                return Err(EngineError::AlreadyStarted);
            }
            *state = RunState::Preparing;
        }

        let (tx, rx) = bounded(self.options.channel_capacity.max(1));
        let spec = self.spec.clone();
        let options = self.options;
        let state = Arc::clone(&self.state);
        let cancel = self.cancel.clone();

        self.worker = Some(thread::spawn(move || {
            let outcome = execute(&spec, &options, &cancel, &state, &tx);
            set_state(&state, outcome.state());
            let _ = tx.send(EngineEvent::Finished(outcome));
        }));
        Ok(rx)
    }

    /// Ask the run to stop before its next file.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// A handle that can cancel this run from another thread.
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Wait for the worker thread to exit.
    ///
    /// # Errors
    /// `EngineError::WorkerPanicked` if the worker thread panicked.
    pub fn join(&mut self) -> Result<(), EngineError> {
        match self.worker.take() {
            Some(handle) => handle.join().map_err(|_| {
                set_state(&self.state, RunState::Failed);
                EngineError::WorkerPanicked
            }),
            None => Ok(()),
        }
    }

    /// Start the run, feed every event to `sink`, and wait for the worker.
    pub fn run<S: ProgressSink + ?Sized>(&mut self, sink: &mut S) -> RunOutcome {
        let events = match self.start() {
            Ok(events) => events,
            Err(e) => {
                let outcome = RunOutcome::Failed(e);
                sink.on_completion(&outcome);
                return outcome;
            }
        };
        let outcome = deliver(&events, sink);
        // The outcome already reflects a panicked worker
        let _ = self.join();
        outcome
    }
}

fn set_state(state: &Mutex<RunState>, next: RunState) {
    *state.lock().unwrap_or_else(PoisonError::into_inner) = next;
}

/// Check that a run could create the backup folder, without creating it.
///
/// # Returns
/// The backup folder path `destination/name`.
///
/// # Errors
/// `DestinationConflict` if the folder already exists,
/// `DestinationNotWritable` if the destination rejects new entries.
pub fn check_target(spec: &BackupSpec) -> Result<PathBuf, EngineError> {
    validate::validate(Some(spec))?;
    let (Some(destination), Some(target)) = (spec.destination(), spec.target()) else {
        return Err(EngineError::Validation(ValidationError {
            violations: validate::violations(Some(spec)),
        }));
    };

    if fs::symlink_metadata(&target).is_ok() {
        return Err(EngineError::DestinationConflict { path: target });
    }

    fs_ops::probe_writable(destination).map_err(|e| EngineError::DestinationNotWritable {
        path: destination.to_path_buf(),
        source: Some(e),
    })?;
    Ok(target)
}

/// Create the backup folder.
fn prepare_target(spec: &BackupSpec) -> Result<PathBuf, EngineError> {
    let target = check_target(spec)?;
    fs::create_dir_all(&target).map_err(|e| match e.kind() {
        io::ErrorKind::AlreadyExists => EngineError::DestinationConflict {
            path: target.clone(),
        },
        io::ErrorKind::PermissionDenied => EngineError::DestinationNotWritable {
            path: target.clone(),
            source: Some(e),
        },
        _ => EngineError::TargetCreationFailed {
            path: target.clone(),
            source: e,
        },
    })?;
    Ok(target)
}

/// Re-resolve every source and expand folders into the items to copy.
fn plan_sources(spec: &BackupSpec, target: &Path) -> Result<Vec<PlannedItem>, EngineError> {
    let mut plan = Vec::new();
    for entry in spec {
        let unreadable = |e: io::Error| EngineError::SourceUnreadable {
            path: entry.path.clone(),
            source: e,
        };
        let real_path = fs::canonicalize(&entry.path).map_err(unreadable)?;
        let items = fs_ops::enumerate_source(&real_path, target).map_err(unreadable)?;
        debug!(source = %real_path.display(), items = items.len(), "Planned source");
        plan.extend(items);
    }
    Ok(plan)
}

/// Drive one run to a terminal outcome on the current thread.
fn execute(
    spec: &BackupSpec,
    options: &EngineOptions,
    cancel: &CancelHandle,
    state: &Mutex<RunState>,
    events: &Sender<EngineEvent>,
) -> RunOutcome {
    run_backup(spec, options, cancel, state, &mut |snapshot| {
        // A consumer that hung up does not stop the backup
        let _ = events.send(EngineEvent::Progress(snapshot));
    })
}

fn run_backup(
    spec: &BackupSpec,
    options: &EngineOptions,
    cancel: &CancelHandle,
    state: &Mutex<RunState>,
    emit: &mut dyn FnMut(ProgressSnapshot),
) -> RunOutcome {
    let run_id = Uuid::new_v4();
    let span = info_span!("backup_run", %run_id);
    let _guard = span.enter();

    set_state(state, RunState::Preparing);
    let target = match prepare_target(spec) {
        Ok(target) => target,
        Err(e) => {
            error!(error = %e, "Backup preparation failed");
            return RunOutcome::Failed(e);
        }
    };
    info!(target = %target.display(), sources = spec.len(), "Starting backup");

    set_state(state, RunState::Copying);
    let plan = match plan_sources(spec, &target) {
        Ok(plan) => plan,
        Err(e) => {
            error!(error = %e, "Backup aborted before copying");
            // Leave no empty backup folder behind so the name can be reused
            if let Err(remove_err) = fs::remove_dir(&target) {
                warn!(target = %target.display(), error = %remove_err, "Could not remove backup folder");
            }
            return RunOutcome::Failed(e);
        }
    };

    let total_bytes: u64 = plan.iter().filter(|i| !i.is_dir).map(|i| i.file_size).sum();
    let total_files = plan.iter().filter(|i| !i.is_dir).count();
    let mut snapshot = ProgressSnapshot::starting(total_bytes, total_files);
    emit(snapshot.clone());

    let mut report = RunReport::empty(target);
    report.run_id = run_id;
    let mut cancelled = false;

    for item in &plan {
        if cancel.is_cancelled() {
            info!(
                completed_files = snapshot.completed_files,
                total_files, "Backup cancelled"
            );
            cancelled = true;
            break;
        }

        if item.is_dir {
            if let Err(e) = fs_ops::ensure_dir_exists(&item.destination_path) {
                warn!(path = %item.source_path.display(), error = %e, "Skipping directory");
                report.failures.push(FileFailure::from_copy_error(&item.source_path, &e));
            }
            if let Some(e) = &item.enumeration_error {
                warn!(path = %item.source_path.display(), error = %e, "Could not list directory");
                report.failures.push(FileFailure {
                    path: item.source_path.clone(),
                    message: format!("Failed to enumerate directory: {}", e),
                    error_code: e.raw_os_error(),
                });
            }
            continue;
        }

        debug!(source = %item.source_path.display(), dest = %item.destination_path.display(), "Copying file");
        let result = fs_ops::copy_file_chunked(
            &item.source_path,
            &item.destination_path,
            options.chunk_size,
            &mut |length| {
                snapshot.completed_bytes += length;
                snapshot.source_copied = None;
                emit(snapshot.clone());
            },
        );

        match result {
            Ok(_) => {
                snapshot.completed_files += 1;
                snapshot.source_copied = Some(item.source_path.clone());
                emit(snapshot.clone());
            }
            Err(e) => {
                warn!(path = %item.source_path.display(), error = %e, "Skipping file after copy error");
                report.failures.push(FileFailure::from_copy_error(&item.source_path, &e));
            }
        }
    }

    report.files_copied = snapshot.completed_files;
    report.bytes_copied = snapshot.completed_bytes;
    report.end_time = Some(SystemTime::now());

    if cancelled {
        RunOutcome::Cancelled(report)
    } else {
        info!(
            files = report.files_copied,
            bytes = report.bytes_copied,
            failures = report.failures.len(),
            "Backup completed"
        );
        RunOutcome::Completed(report)
    }
}
