//! Change notifications for front ends that display a spec as a list.
//!
//! `ObservedSpec` owns a `BackupSpec` and forwards every mutation to it.
//! Successful mutations are announced to each subscriber as a `SpecChange`;
//! rejected ones change nothing and announce nothing.

use std::path::{Path, PathBuf};
use crossbeam_channel::{unbounded, Receiver, Sender};
use crate::error::SpecError;
use crate::model::BackupSpec;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpecChange {
    SourceAdded { index: usize, path: PathBuf },
    SourceRemoved { index: usize, path: PathBuf },
    NameChanged(String),
    DestinationChanged(PathBuf),
    /// The whole spec was swapped out
    Replaced,
}

#[derive(Debug, Default)]
pub struct ObservedSpec {
    spec: BackupSpec,
    subscribers: Vec<Sender<SpecChange>>,
}

impl ObservedSpec {
    pub fn new(spec: BackupSpec) -> Self {
        ObservedSpec {
            spec,
            subscribers: Vec::new(),
        }
    }

    /// Receive every change made from now on.
    pub fn subscribe(&mut self) -> Receiver<SpecChange> {
        let (tx, rx) = unbounded();
        self.subscribers.push(tx);
        rx
    }

    pub fn spec(&self) -> &BackupSpec {
        &self.spec
    }

    pub fn into_inner(self) -> BackupSpec {
        self.spec
    }

    pub fn replace(&mut self, spec: BackupSpec) {
        self.spec = spec;
        self.notify(SpecChange::Replaced);
    }

    pub fn add_source<P: AsRef<Path>>(&mut self, path: P) -> Result<bool, SpecError> {
        let added = self.spec.add_source(path)?;
        if added {
            let index = self.spec.len() - 1;
            if let Some(path) = self.spec.get(index) {
                let path = path.to_path_buf();
                self.notify(SpecChange::SourceAdded { index, path });
            }
        }
        Ok(added)
    }

    pub fn remove_source<P: AsRef<Path>>(&mut self, path: P) -> Result<(), SpecError> {
        let index = self.spec.index_of(&path);
        let removed = self.spec.remove_source(path)?;
        if let Some(index) = index {
            self.notify(SpecChange::SourceRemoved {
                index,
                path: removed.path,
            });
        }
        Ok(())
    }

    pub fn set_name(&mut self, name: &str) -> Result<(), SpecError> {
        self.spec.set_name(name)?;
        self.notify(SpecChange::NameChanged(name.to_string()));
        Ok(())
    }

    pub fn set_destination<P: AsRef<Path>>(&mut self, destination: P) -> Result<(), SpecError> {
        self.spec.set_destination(destination)?;
        if let Some(canonical) = self.spec.destination() {
            let canonical = canonical.to_path_buf();
            self.notify(SpecChange::DestinationChanged(canonical));
        }
        Ok(())
    }

    fn notify(&mut self, change: SpecChange) {
        // Subscribers that dropped their receiver are forgotten
        self.subscribers.retain(|tx| tx.send(change.clone()).is_ok());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_mutations_are_announced_in_order() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let root = fs::canonicalize(temp_dir.path()).expect("canonicalize");
        let a = root.join("a.txt");
        let b = root.join("b.txt");
        fs::write(&a, b"a").expect("write a");
        fs::write(&b, b"b").expect("write b");

        let mut observed = ObservedSpec::default();
        let changes = observed.subscribe();

        observed.set_name("backup").expect("name");
        observed.set_destination(&root).expect("destination");
        observed.add_source(&a).expect("add a");
        observed.add_source(&b).expect("add b");
        observed.remove_source(&a).expect("remove a");

        let received: Vec<_> = changes.try_iter().collect();
        assert_eq!(
            received,
            vec![
                SpecChange::NameChanged("backup".to_string()),
                SpecChange::DestinationChanged(root.clone()),
                SpecChange::SourceAdded { index: 0, path: a.clone() },
                SpecChange::SourceAdded { index: 1, path: b.clone() },
                SpecChange::SourceRemoved { index: 0, path: a.clone() },
            ]
        );
        assert_eq!(observed.spec().len(), 1);
    }

    #[test]
    fn test_rejected_and_duplicate_mutations_are_silent() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let a = temp_dir.path().join("a.txt");
        fs::write(&a, b"a").expect("write a");

        let mut observed = ObservedSpec::default();
        observed.add_source(&a).expect("add a");
        let changes = observed.subscribe();

        assert!(!observed.add_source(&a).expect("duplicate add"));
        assert!(observed.set_name("").is_err());
        assert!(observed.remove_source(temp_dir.path().join("missing")).is_err());

        assert_eq!(changes.try_iter().count(), 0);
    }

    #[test]
    fn test_dropped_subscribers_are_pruned() {
        let mut observed = ObservedSpec::default();
        let kept = observed.subscribe();
        drop(observed.subscribe());

        observed.replace(BackupSpec::new());
        assert_eq!(kept.try_iter().collect::<Vec<_>>(), vec![SpecChange::Replaced]);
        assert_eq!(observed.subscribers.len(), 1);
    }
}
