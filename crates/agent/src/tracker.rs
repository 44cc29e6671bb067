//! Per-tool success and failure accounting.
//!
//! Per-task records reset when a task starts; lifetime totals accumulate
//! across tasks. Once a tool fails enough times in a row, `hint` returns
//! advice that the request assembler injects into the next request.

use std::collections::BTreeMap;

use serde::Serialize;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ToolRecord {
    pub attempts: u32,
    pub successes: u32,
    pub failures: u32,
    pub consecutive_failures: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_failure: Option<String>,
}

impl ToolRecord {
    fn record(&mut self, outcome: &UsageOutcome) {
        self.attempts += 1;
        match outcome {
            UsageOutcome::Success => {
                self.successes += 1;
                self.consecutive_failures = 0;
            }
            UsageOutcome::Failure(reason) => {
                self.failures += 1;
                self.consecutive_failures += 1;
                self.last_failure = Some(reason.clone());
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UsageOutcome {
    Success,
    Failure(String),
}

#[derive(Debug)]
pub struct ToolUsageTracker {
    task: BTreeMap<String, ToolRecord>,
    lifetime: BTreeMap<String, ToolRecord>,
    threshold: u32,
}

impl ToolUsageTracker {
    pub fn new(threshold: u32) -> Self {
        Self {
            task: BTreeMap::new(),
            lifetime: BTreeMap::new(),
            threshold: threshold.max(1),
        }
    }

    /// Reset per-task records. Lifetime totals are kept.
    pub fn begin_task(&mut self) {
        self.task.clear();
    }

    pub fn record(&mut self, tool: &str, outcome: &UsageOutcome) {
        self.task.entry(tool.to_string()).or_default().record(outcome);
        self.lifetime.entry(tool.to_string()).or_default().record(outcome);
    }

    pub fn task_record(&self, tool: &str) -> Option<&ToolRecord> {
        self.task.get(tool)
    }

    pub fn lifetime_record(&self, tool: &str) -> Option<&ToolRecord> {
        self.lifetime.get(tool)
    }

    pub fn lifetime(&self) -> &BTreeMap<String, ToolRecord> {
        &self.lifetime
    }

    /// Advice for `tool` once it has failed `threshold` times in a row
    /// during the current task.
    pub fn hint(&self, tool: &str) -> Option<String> {
        let record = self.task.get(tool)?;
        if record.consecutive_failures < self.threshold {
            return None;
        }
        let mut hint = format!(
            "{tool} has failed {} times in a row",
            record.consecutive_failures
        );
        if let Some(reason) = &record.last_failure {
            hint.push_str(&format!(" (last error: {reason})"));
        }
        hint.push_str(". ");
        hint.push_str(alternative(tool));
        Some(hint)
    }

    /// Hints for every tool currently over the threshold, by tool name.
    pub fn hints(&self) -> Vec<String> {
        self.task.keys().filter_map(|tool| self.hint(tool)).collect()
    }
}

fn alternative(tool: &str) -> &'static str {
    match tool {
        "read_file" => "Check the path with find_files or list_files before reading again.",
        "edit_file" | "multi_edit" => {
            "Re-read the file to copy the exact text, \
             or rewrite it with write_file and overwrite=true."
        }
        "write_file" => "Use edit_file for existing files, or pass overwrite=true.",
        "grep" => "Simplify the pattern or use find_files to locate candidates first.",
        "find_files" | "list_files" => "List the parent directory to see what actually exists.",
        "run_command" => "Inspect the command output, or use the dedicated file tools instead.",
        "fetch_url" => "Try search_web to find a working URL.",
        "search_web" => "Rephrase the query with fewer, more specific terms.",
        _ => "Try a different approach.",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fail(reason: &str) -> UsageOutcome {
        UsageOutcome::Failure(reason.into())
    }

    #[test]
    fn attempts_equal_successes_plus_failures() {
        let mut tracker = ToolUsageTracker::new(2);
        let outcomes = [
            UsageOutcome::Success,
            fail("x"),
            fail("y"),
            UsageOutcome::Success,
            fail("z"),
        ];
        for outcome in &outcomes {
            tracker.record("grep", outcome);
            let r = tracker.task_record("grep").unwrap();
            assert_eq!(r.attempts, r.successes + r.failures);
        }
        let r = tracker.task_record("grep").unwrap();
        assert_eq!((r.attempts, r.successes, r.failures), (5, 2, 3));
        assert_eq!(r.consecutive_failures, 1);
    }

    #[test]
    fn hint_appears_at_threshold() {
        let mut tracker = ToolUsageTracker::new(2);
        tracker.record("read_file", &fail("file not found: a.py"));
        assert!(tracker.hint("read_file").is_none());

        tracker.record("read_file", &fail("file not found: b.py"));
        let hint = tracker.hint("read_file").unwrap();
        assert!(hint.contains("2 times"));
        assert!(hint.contains("b.py"));
        assert!(hint.contains("find_files"));
        assert_eq!(tracker.hints().len(), 1);
    }

    #[test]
    fn success_clears_the_streak() {
        let mut tracker = ToolUsageTracker::new(2);
        tracker.record("grep", &fail("a"));
        tracker.record("grep", &fail("b"));
        tracker.record("grep", &UsageOutcome::Success);
        assert!(tracker.hint("grep").is_none());
    }

    #[test]
    fn task_reset_keeps_lifetime() {
        let mut tracker = ToolUsageTracker::new(1);
        tracker.record("grep", &fail("a"));
        tracker.begin_task();
        assert!(tracker.task_record("grep").is_none());
        assert!(tracker.hint("grep").is_none());
        assert_eq!(tracker.lifetime_record("grep").unwrap().failures, 1);
    }
}
