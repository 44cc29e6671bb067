//! Bounded cross-task memory used to resolve references like "that file".
//!
//! Holds the last [`TaskMemory::CAPACITY`] finished tasks, oldest evicted
//! first. Relevance is a best-effort heuristic:
//!
//! - a goal containing a back-reference ("that", "it", "again", ...) makes
//!   every remembered task relevant;
//! - otherwise a task is relevant when it shares a keyword with the goal
//!   (words from its goal, summary and file names).
//!
//! Results are always most recent first. "That file" resolves to the most
//! recently touched file of the first entry that touched any file.

use chrono::{DateTime, Utc};
use codeloop_core::{Error, TaskStatus};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, VecDeque};
use std::path::PathBuf;
use tracing::debug;
use uuid::Uuid;

use crate::store::JsonlStore;

/// One remembered task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskMemoryEntry {
    pub id: String,
    /// The user's goal, as typed
    pub goal: String,
    /// Files in the order they were last touched; the last one is the most recent
    #[serde(default)]
    pub files_touched: Vec<String>,
    /// Subset of `files_touched` that the task created
    #[serde(default)]
    pub files_created: Vec<String>,
    pub outcome_summary: String,
    pub status: TaskStatus,
    pub iterations: u32,
    pub timestamp: DateTime<Utc>,
}

impl TaskMemoryEntry {
    pub fn new(
        goal: impl Into<String>,
        outcome_summary: impl Into<String>,
        status: TaskStatus,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            goal: goal.into(),
            files_touched: Vec::new(),
            files_created: Vec::new(),
            outcome_summary: outcome_summary.into(),
            status,
            iterations: 0,
            timestamp: Utc::now(),
        }
    }

    pub fn with_files<I, S>(mut self, files: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for file in files {
            touch(&mut self.files_touched, file.into());
        }
        self
    }

    pub fn with_created<I, S>(mut self, files: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.files_created = files.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_iterations(mut self, iterations: u32) -> Self {
        self.iterations = iterations;
        self
    }

    pub fn most_recent_file(&self) -> Option<&str> {
        self.files_touched.last().map(String::as_str)
    }

    fn keywords(&self) -> BTreeSet<String> {
        let mut words = keywords(&self.goal);
        words.extend(keywords(&self.outcome_summary));
        for file in &self.files_touched {
            words.extend(keywords(file));
            words.insert(file.to_lowercase());
        }
        words
    }
}

/// Move `file` to the end of `files`, inserting it if absent.
fn touch(files: &mut Vec<String>, file: String) {
    files.retain(|f| f != &file);
    files.push(file);
}

/// The cross-task store owned by the agent host.
#[derive(Debug)]
pub struct TaskMemory {
    entries: VecDeque<TaskMemoryEntry>,
    capacity: usize,
    store: Option<JsonlStore>,
}

impl TaskMemory {
    pub const CAPACITY: usize = 10;

    /// In-process memory; forgotten on exit.
    pub fn new() -> Self {
        Self::with_capacity(Self::CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
            store: None,
        }
    }

    /// Memory backed by a JSONL file. Existing entries are loaded, keeping
    /// the newest `CAPACITY` of them.
    pub fn persistent(path: impl Into<PathBuf>) -> Self {
        let store = JsonlStore::new(path);
        let mut entries = VecDeque::from(store.load::<TaskMemoryEntry>());
        while entries.len() > Self::CAPACITY {
            entries.pop_front();
        }
        Self {
            entries,
            capacity: Self::CAPACITY,
            store: Some(store),
        }
    }

    /// Append an entry, evicting the oldest beyond capacity.
    pub fn remember(&mut self, entry: TaskMemoryEntry) -> Result<(), Error> {
        debug!(goal = %entry.goal, files = entry.files_touched.len(), "Remembering task");
        self.entries.push_back(entry);
        while self.entries.len() > self.capacity {
            if let Some(evicted) = self.entries.pop_front() {
                debug!(goal = %evicted.goal, "Evicted oldest task from memory");
            }
        }
        if let Some(store) = &self.store {
            store.flush(&self.entries)?;
        }
        Ok(())
    }

    /// Entries relevant to `goal`, most recent first, at most `limit`.
    pub fn relevant(&self, goal: &str, limit: usize) -> Vec<&TaskMemoryEntry> {
        let all = has_back_reference(goal);
        let goal_words = keywords(goal);
        self.entries
            .iter()
            .rev()
            .filter(|e| all || !e.keywords().is_disjoint(&goal_words))
            .take(limit)
            .collect()
    }

    /// Oldest first.
    pub fn entries(&self) -> impl DoubleEndedIterator<Item = &TaskMemoryEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) -> Result<(), Error> {
        self.entries.clear();
        if let Some(store) = &self.store {
            store.flush(&self.entries)?;
        }
        Ok(())
    }

    /// Every file touched this session, sorted.
    pub fn all_files(&self) -> BTreeSet<&str> {
        self.entries
            .iter()
            .flat_map(|e| e.files_touched.iter().map(String::as_str))
            .collect()
    }
}

impl Default for TaskMemory {
    fn default() -> Self {
        Self::new()
    }
}

/// The file "that file" most likely means, given entries ordered most recent first.
pub fn resolve_file_reference<'a>(entries: &[&'a TaskMemoryEntry]) -> Option<&'a str> {
    entries.iter().find_map(|e| e.most_recent_file())
}

/// Render recalled tasks for the system prompt.
pub fn render_recall(entries: &[&TaskMemoryEntry]) -> String {
    if entries.is_empty() {
        return String::new();
    }
    let mut lines = vec!["## Previous tasks (most recent first)".to_string()];
    for (i, entry) in entries.iter().enumerate() {
        lines.push(format!("{}. [{}] {}", i + 1, entry.status, entry.goal));
        let modified: Vec<&str> = entry
            .files_touched
            .iter()
            .filter(|f| !entry.files_created.contains(f))
            .map(String::as_str)
            .collect();
        if !entry.files_created.is_empty() {
            lines.push(format!("   - Created: {}", entry.files_created.join(", ")));
        }
        if !modified.is_empty() {
            lines.push(format!("   - Touched: {}", modified.join(", ")));
        }
        if !entry.outcome_summary.is_empty() {
            lines.push(format!("   - Result: {}", entry.outcome_summary));
        }
    }
    lines.join("\n")
}

const BACK_REFERENCES: &[&str] = &[
    "that", "it", "its", "this", "those", "them", "same", "previous", "again", "above", "earlier",
    "last",
];

const STOPWORDS: &[&str] = &[
    "the", "and", "for", "with", "from", "into", "then", "than", "please", "can", "you", "file",
    "files", "make", "add", "new", "all", "use", "now", "was", "were", "are", "has", "have",
];

/// Whether the goal refers back to earlier work ("that file", "again").
pub fn has_back_reference(goal: &str) -> bool {
    words(goal).any(|w| BACK_REFERENCES.contains(&w.as_str()))
}

fn words(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
}

fn keywords(text: &str) -> BTreeSet<String> {
    let mut set: BTreeSet<String> = words(text)
        .filter(|w| w.len() >= 3 && !STOPWORDS.contains(&w.as_str()))
        .collect();
    // Whole file-like tokens, e.g. "main.rs".
    set.extend(
        text.split_whitespace()
            .map(|t| t.trim_matches(|c: char| ",;:!?'\"()".contains(c)).to_lowercase())
            .filter(|t| t.contains('.') && t.len() > 2 && !t.ends_with('.')),
    );
    set
}
