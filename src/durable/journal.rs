//! Step journals: where memoized step outputs live
//!
//! A journal only ever grows. Entries are written once, after the step body
//! succeeded, and are never rewritten.

use std::collections::HashMap;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Stable identity of one step invocation within a run
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StepKey {
    pub run_id: String,
    pub name: String,
    /// How many steps with the same name ran before this one in the run
    pub ordinal: u32,
}

impl StepKey {
    pub fn new(run_id: impl Into<String>, name: impl Into<String>, ordinal: u32) -> Self {
        Self {
            run_id: run_id.into(),
            name: name.into(),
            ordinal,
        }
    }
}

impl fmt::Display for StepKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}#{}", self.run_id, self.name, self.ordinal)
    }
}

/// Storage for memoized step outputs
pub trait JournalStore: Send {
    /// Output recorded for this step, if it already completed
    fn lookup(&self, key: &StepKey) -> Option<serde_json::Value>;

    /// Record the output of a completed step
    fn record(&mut self, key: &StepKey, output: &serde_json::Value) -> std::io::Result<()>;

    /// Number of completed steps in the journal
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Journal kept in memory, lost when the process exits
#[derive(Debug, Default, Clone)]
pub struct MemoryJournal {
    entries: HashMap<StepKey, serde_json::Value>,
}

impl MemoryJournal {
    pub fn new() -> Self {
        Self::default()
    }
}

impl JournalStore for MemoryJournal {
    fn lookup(&self, key: &StepKey) -> Option<serde_json::Value> {
        self.entries.get(key).cloned()
    }

    fn record(&mut self, key: &StepKey, output: &serde_json::Value) -> std::io::Result<()> {
        self.entries.insert(key.clone(), output.clone());
        Ok(())
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

/// One line of a journal file
#[derive(Debug, Serialize, Deserialize)]
struct JournalLine {
    key: StepKey,
    output: serde_json::Value,
}

/// Journal persisted as JSON lines, one file per run (`{dir}/{run_id}.jsonl`)
///
/// Opening an existing file loads every completed step, which is what makes a
/// re-executed run resume instead of starting over.
pub struct FileJournal {
    path: PathBuf,
    file: File,
    entries: HashMap<StepKey, serde_json::Value>,
}

impl FileJournal {
    /// Open (or create) the journal for a run
    pub fn open(dir: impl AsRef<Path>, run_id: &str) -> std::io::Result<Self> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;
        let path = dir.join(format!("{}.jsonl", run_id));

        let existing = if path.exists() {
            std::fs::read_to_string(&path)?
        } else {
            String::new()
        };

        let mut entries = HashMap::new();
        for line in existing.lines() {
            if line.trim().is_empty() {
                continue;
            }
            // A torn final line means the step never finished recording
            match serde_json::from_str::<JournalLine>(line) {
                Ok(entry) => {
                    entries.insert(entry.key, entry.output);
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Skipping unreadable journal line");
                }
            }
        }

        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        if !existing.is_empty() && !existing.ends_with('\n') {
            writeln!(file)?;
        }

        Ok(Self {
            path,
            file,
            entries,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl JournalStore for FileJournal {
    fn lookup(&self, key: &StepKey) -> Option<serde_json::Value> {
        self.entries.get(key).cloned()
    }

    fn record(&mut self, key: &StepKey, output: &serde_json::Value) -> std::io::Result<()> {
        let line = serde_json::to_string(&JournalLine {
            key: key.clone(),
            output: output.clone(),
        })
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

        writeln!(self.file, "{}", line)?;
        self.file.flush()?;
        self.entries.insert(key.clone(), output.clone());
        Ok(())
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}
