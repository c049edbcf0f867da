//! Progress reporting.
//!
//! The engine pushes `EngineEvent`s into a bounded channel from its worker
//! thread. The consuming side drains that channel with `deliver`, which hands
//! snapshots to a `ProgressSink` in batches: every snapshot already queued
//! when the sink is called arrives in the same slice. Sinks must iterate the
//! batch rather than assume one snapshot per call.

use std::fmt;
use std::path::PathBuf;
use crossbeam_channel::Receiver;
use serde::Serialize;
use crate::job::RunOutcome;
use crate::error::EngineError;

/// A point-in-time record of a backup run.
///
/// `completed_bytes == 0 && completed_files == 0` means the run is about to
/// start. `completed_files == total_files` means it finished; prefer that
/// over comparing bytes, since reported file sizes can drift.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgressSnapshot {
    /// Source file that just finished copying, if this snapshot marks one
    pub source_copied: Option<PathBuf>,
    pub total_bytes: u64,
    pub completed_bytes: u64,
    pub total_files: usize,
    pub completed_files: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressStatus {
    NotStarted,
    InProgress,
    Finished,
}

impl ProgressSnapshot {
    /// The snapshot emitted before the first byte is copied.
    pub fn starting(total_bytes: u64, total_files: usize) -> Self {
        ProgressSnapshot {
            source_copied: None,
            total_bytes,
            completed_bytes: 0,
            total_files,
            completed_files: 0,
        }
    }

    pub fn status(&self) -> ProgressStatus {
        if self.total_files > 0 && self.completed_files >= self.total_files {
            ProgressStatus::Finished
        } else if self.completed_bytes == 0 && self.completed_files == 0 {
            ProgressStatus::NotStarted
        } else {
            ProgressStatus::InProgress
        }
    }

    /// Percentage complete by bytes, 0.0 to 100.0.
    pub fn percent_by_bytes(&self) -> f64 {
        percent(self.completed_bytes as f64, self.total_bytes as f64)
    }

    /// Percentage complete by files, 0.0 to 100.0.
    pub fn percent_by_files(&self) -> f64 {
        percent(self.completed_files as f64, self.total_files as f64)
    }
}

fn percent(done: f64, total: f64) -> f64 {
    if total <= 0.0 {
        return 0.0;
    }
    (done / total * 100.0).min(100.0)
}

impl fmt::Display for ProgressSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Total Bytes: {}; Completed Bytes: {}; Total Files: {}; Completed Files: {}",
            self.total_bytes, self.completed_bytes, self.total_files, self.completed_files
        )
    }
}

/// Messages sent from the engine's worker thread.
#[derive(Debug)]
pub enum EngineEvent {
    Progress(ProgressSnapshot),
    /// Always the last event of a run
    Finished(RunOutcome),
}

/// Receives progress from a backup run.
///
/// Implement this trait to render progress in a front end. Methods are
/// called on the thread that runs `deliver`, never on the engine's worker.
pub trait ProgressSink {
    /// Called with every snapshot queued since the previous call, oldest first.
    fn on_progress(&mut self, batch: &[ProgressSnapshot]);

    /// Called exactly once, after the run reaches a terminal state.
    fn on_completion(&mut self, outcome: &RunOutcome);
}

/// Drain `events` into `sink` until the run finishes.
///
/// Blocks until the engine sends its final event. If the worker goes away
/// without one, the sink is completed with `EngineError::WorkerPanicked`.
///
/// # Returns
/// The outcome that was passed to `on_completion`.
pub fn deliver<S: ProgressSink + ?Sized>(events: &Receiver<EngineEvent>, sink: &mut S) -> RunOutcome {
    let mut batch = Vec::new();
    loop {
        let first = match events.recv() {
            Ok(event) => event,
            Err(_) => {
                let outcome = RunOutcome::Failed(EngineError::WorkerPanicked);
                sink.on_completion(&outcome);
                return outcome;
            }
        };

        let mut finished = None;
        for event in std::iter::once(first).chain(events.try_iter()) {
            match event {
                EngineEvent::Progress(snapshot) => batch.push(snapshot),
                EngineEvent::Finished(outcome) => {
                    finished = Some(outcome);
                    break;
                }
            }
        }

        if !batch.is_empty() {
            sink.on_progress(&batch);
            batch.clear();
        }

        if let Some(outcome) = finished {
            sink.on_completion(&outcome);
            return outcome;
        }
    }
}
