use crate::errors::ControlError;
use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Persisted set of content identifiers that have already been attempted.
///
/// Storage is a line-delimited flat file, read fully at open and appended to
/// incrementally. `record` is durable before it returns: a crash immediately
/// afterwards never loses the fact that an item was attempted. The contract
/// is at-most-once-attempt, not at-most-once-success.
pub struct DedupLedger {
    path: PathBuf,
    file: File,
    seen: HashSet<String>,
}

impl DedupLedger {
    /// Open (or create) the ledger at `path`. A missing file is an empty
    /// set, not an error.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ControlError> {
        let path = path.as_ref().to_path_buf();
        // One identifier per line, kept symmetric with `record`: whatever
        // was written (a blank line included) reloads as the same id.
        let seen: HashSet<String> = match std::fs::read_to_string(&path) {
            Ok(contents) => contents.lines().map(|line| line.trim().to_string()).collect(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashSet::new(),
            Err(e) => return Err(e.into()),
        };
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        info!(path = %path.display(), entries = seen.len(), "opened dedup ledger");
        Ok(Self { path, file, seen })
    }

    pub fn seen(&self, id: &str) -> bool {
        self.seen.contains(id)
    }

    /// Record `id` as attempted. Flushed to storage before returning.
    pub fn record(&mut self, id: &str) -> Result<(), ControlError> {
        if !self.seen.insert(id.to_string()) {
            return Ok(());
        }
        writeln!(self.file, "{id}")?;
        self.file.sync_all()?;
        debug!(id, path = %self.path.display(), "recorded attempt");
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}
