//! Shared State for a single run
//!
//! The record every component of a run reads from: the file-set the agent has
//! written so far and, once the task is done, the completion summary.
//!
//! There is exactly one writer at a time. The network loop owns the state and
//! lends it out by `&mut` to the tool executor and the lifecycle hook, so no
//! locking is involved.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Map from sandbox path to file content
pub type FileSet = BTreeMap<String, String>;

/// Mutable state shared by the tools, the completion detector and the router
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SharedState {
    /// Opaque identifier of the run this state belongs to
    pub run_id: String,
    /// Files written by `createOrUpdateFiles`, last write wins
    files: FileSet,
    /// Completion summary, set at most once
    summary: Option<String>,
}

impl SharedState {
    /// Create the initial state: no files, no summary
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            files: FileSet::new(),
            summary: None,
        }
    }

    pub fn files(&self) -> &FileSet {
        &self.files
    }

    pub fn summary(&self) -> Option<&str> {
        self.summary.as_deref()
    }

    /// True once a non-empty summary has been recorded
    pub fn is_complete(&self) -> bool {
        self.summary.as_deref().is_some_and(|s| !s.is_empty())
    }

    /// Replace the file-set with the result of a completed write batch
    pub fn replace_files(&mut self, files: FileSet) {
        self.files = files;
    }

    /// Record the completion summary.
    ///
    /// Returns `false` and leaves the state untouched if a summary is already
    /// present.
    pub fn set_summary(&mut self, summary: impl Into<String>) -> bool {
        if self.summary.is_some() {
            return false;
        }
        self.summary = Some(summary.into());
        true
    }

    /// Immutable view handed to the router
    pub fn snapshot(&self) -> StateSnapshot<'_> {
        StateSnapshot { state: self }
    }

    /// Consume the state, yielding its files and summary
    pub fn into_parts(self) -> (FileSet, Option<String>) {
        (self.files, self.summary)
    }
}

/// Read-only borrow of [`SharedState`] given to routing decisions
#[derive(Debug, Clone, Copy)]
pub struct StateSnapshot<'a> {
    state: &'a SharedState,
}

impl<'a> StateSnapshot<'a> {
    pub fn files(&self) -> &'a FileSet {
        &self.state.files
    }

    pub fn summary(&self) -> Option<&'a str> {
        self.state.summary.as_deref()
    }

    pub fn is_complete(&self) -> bool {
        self.state.is_complete()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state_is_empty() {
        let state = SharedState::new("run-1");
        assert_eq!(state.run_id, "run-1");
        assert!(state.files().is_empty());
        assert!(state.summary().is_none());
        assert!(!state.is_complete());
    }

    #[test]
    fn test_summary_is_set_once() {
        let mut state = SharedState::new("run-1");
        assert!(state.set_summary("<task_summary>first</task_summary>"));
        assert!(!state.set_summary("<task_summary>second</task_summary>"));
        assert_eq!(state.summary(), Some("<task_summary>first</task_summary>"));
    }

    #[test]
    fn test_empty_summary_is_not_complete() {
        let mut state = SharedState::new("run-1");
        state.set_summary("");
        assert!(!state.is_complete());
        assert!(!state.snapshot().is_complete());
    }

    #[test]
    fn test_snapshot_reads_through() {
        let mut state = SharedState::new("run-1");
        let mut files = FileSet::new();
        files.insert("index.html".to_string(), "<h1>Hello</h1>".to_string());
        state.replace_files(files);

        let snapshot = state.snapshot();
        assert_eq!(snapshot.files().len(), 1);
        assert!(snapshot.summary().is_none());
    }
}
