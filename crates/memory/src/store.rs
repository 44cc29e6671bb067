//! JSON-lines persistence for task memory.
//!
//! Each line is one JSON-encoded [`TaskMemoryEntry`]. The file is small
//! (bounded by memory capacity) so every mutation rewrites it whole.

use codeloop_core::Error;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::PathBuf;
use tracing::{debug, warn};

/// A JSONL file holding a list of records.
#[derive(Debug, Clone)]
pub struct JsonlStore {
    path: PathBuf,
}

impl JsonlStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Load all records. A missing file is an empty store; corrupt lines
    /// are skipped.
    pub fn load<T: DeserializeOwned>(&self) -> Vec<T> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(_) => return Vec::new(),
        };

        let records: Vec<T> = content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| match serde_json::from_str::<T>(line) {
                Ok(record) => Some(record),
                Err(e) => {
                    let path = self.path.display();
                    warn!(error = %e, path = %path, "Skipping corrupted memory entry");
                    None
                }
            })
            .collect();
        debug!(path = %self.path.display(), count = records.len(), "Task memory loaded");
        records
    }

    /// Replace the file's contents with `records`.
    pub fn flush<'a, T, I>(&self, records: I) -> Result<(), Error>
    where
        T: Serialize + 'a,
        I: IntoIterator<Item = &'a T>,
    {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::Storage(format!("Failed to create memory directory: {e}")))?;
        }

        let mut content = String::new();
        for record in records {
            let line = serde_json::to_string(record)
                .map_err(|e| Error::Storage(format!("Failed to serialize memory entry: {e}")))?;
            content.push_str(&line);
            content.push('\n');
        }

        std::fs::write(&self.path, &content)
            .map_err(|e| Error::Storage(format!("Failed to write memory file: {e}")))?;
        Ok(())
    }
}
