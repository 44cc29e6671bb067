//! grep: regex search through file contents.

use async_trait::async_trait;
use codeloop_core::{FieldType, ResolvedPath, Schema, Tool, ToolError, ValidatedInput};
use glob::Pattern;
use regex::{Regex, RegexBuilder};
use serde::Serialize;
use serde_json::{Value, json};

use crate::walk;

const MAX_LINE_CHARS: usize = 300;
const MAX_FILE_BYTES: u64 = 2 * 1024 * 1024;

pub struct GrepTool {
    max_results: usize,
}

impl GrepTool {
    pub fn new(max_results: usize) -> Self {
        Self { max_results }
    }
}

#[derive(Debug, Serialize)]
struct GrepMatch {
    file: String,
    line_number: usize,
    line: String,
}

struct Search {
    base: ResolvedPath,
    regex: Regex,
    include: Option<Pattern>,
    limit: usize,
}

impl Search {
    /// Returns the matches and whether the limit cut the search short.
    fn run(&self) -> (Vec<GrepMatch>, bool) {
        let mut found = Vec::new();
        if self.base.absolute.is_file() {
            let truncated = self.scan(&self.base.absolute, self.base.relative.clone(), &mut found);
            return (found, truncated);
        }

        for entry in walk::entries(&self.base.absolute, usize::MAX) {
            if !entry.file_type().is_file() {
                continue;
            }
            if let Some(include) = &self.include
                && !include.matches(&entry.file_name().to_string_lossy())
                && !include.matches(&walk::relative_to_base(&self.base.absolute, entry.path()))
            {
                continue;
            }
            let rel = walk::relative_to_workspace(&self.base, entry.path());
            if self.scan(entry.path(), rel, &mut found) {
                return (found, true);
            }
        }
        (found, false)
    }

    /// Scan one file; true once the limit has been exceeded.
    fn scan(&self, path: &std::path::Path, rel: String, found: &mut Vec<GrepMatch>) -> bool {
        if std::fs::metadata(path).map(|m| m.len() > MAX_FILE_BYTES).unwrap_or(true) {
            return false;
        }
        let Ok(bytes) = std::fs::read(path) else {
            return false;
        };
        if bytes.iter().take(8192).any(|b| *b == 0) {
            return false;
        }
        let text = String::from_utf8_lossy(&bytes);
        for (i, line) in text.lines().enumerate() {
            if !self.regex.is_match(line) {
                continue;
            }
            if found.len() >= self.limit {
                return true;
            }
            let line = if line.chars().count() > MAX_LINE_CHARS {
                format!("{}...", line.chars().take(MAX_LINE_CHARS).collect::<String>())
            } else {
                line.to_string()
            };
            found.push(GrepMatch {
                file: rel.clone(),
                line_number: i + 1,
                line,
            });
        }
        false
    }
}

#[async_trait]
impl Tool for GrepTool {
    fn name(&self) -> &str {
        "grep"
    }

    fn description(&self) -> &str {
        "Search file contents with a regular expression. \
         Returns matching lines with file and line number. \
         Use glob (e.g. '*.rs') to restrict which files are searched."
    }

    fn input_schema(&self) -> Schema {
        Schema::new()
            .required("pattern", FieldType::String, "Regular expression to search for")
            .defaulted("path", FieldType::String, json!("."), "File or directory to search")
            .optional("glob", FieldType::String, "Only search files matching this glob")
            .defaulted("case_insensitive", FieldType::Boolean, json!(false), "Ignore case")
            .optional("max_results", FieldType::Integer, "Maximum matches to return")
    }

    fn output_schema(&self) -> Schema {
        Schema::new()
            .required("matches", FieldType::Array, "Matches as {file, line_number, line}")
            .required("count", FieldType::Integer, "Number of matches returned")
            .required("truncated", FieldType::Boolean, "Whether more matches exist")
    }

    fn path_params(&self) -> &'static [&'static str] {
        &["path"]
    }

    async fn execute(&self, input: ValidatedInput) -> Result<Value, ToolError> {
        let base = input.path("path")?.clone();
        let regex = RegexBuilder::new(input.require_str("pattern")?)
            .case_insensitive(input.bool_or("case_insensitive", false))
            .build()
            .map_err(|e| input.invalid("pattern", &format!("is not a valid regex: {e}")))?;
        let include = input
            .str_opt("glob")
            .filter(|g| !g.trim().is_empty())
            .map(|g| Pattern::new(g.trim()))
            .transpose()
            .map_err(|e| input.invalid("glob", &format!("is not a valid glob: {e}")))?;
        let limit = input
            .u64_opt("max_results")
            .map(|n| (n as usize).clamp(1, self.max_results))
            .unwrap_or(self.max_results);

        if !base.absolute.exists() {
            return Err(ToolError::execution(
                self.name(),
                format!("path not found: {}", base.relative),
            )
            .with_suggestion("grep with path '.' to search the whole workspace"));
        }

        let search = Search {
            base,
            regex,
            include,
            limit,
        };
        let (matches, truncated) = tokio::task::spawn_blocking(move || search.run())
            .await
            .map_err(|e| ToolError::execution(self.name(), format!("search aborted: {e}")))?;

        Ok(json!({
            "count": matches.len(),
            "matches": matches,
            "truncated": truncated,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{input, workspace};

    fn fixture(dir: &std::path::Path) {
        std::fs::create_dir_all(dir.join("src")).unwrap();
        std::fs::write(dir.join("src/lib.rs"), "pub fn alpha() {}\npub fn beta() {}\n").unwrap();
        std::fs::write(dir.join("src/notes.txt"), "alpha notes\n").unwrap();
        std::fs::write(dir.join("blob.bin"), [0u8, 1, 2, b'a', b'l']).unwrap();
    }

    #[tokio::test]
    async fn finds_matching_lines() {
        let (dir, ws) = workspace();
        fixture(dir.path());
        let tool = GrepTool::new(50);

        let out = tool.execute(input(&tool, &ws, json!({"pattern": "alpha"}))).await.unwrap();
        assert_eq!(out["count"], 2);
        assert_eq!(
            out["matches"][0],
            json!({"file": "src/lib.rs", "line_number": 1, "line": "pub fn alpha() {}"})
        );
        assert_eq!(out["truncated"], false);
    }

    #[tokio::test]
    async fn glob_and_case_filters() {
        let (dir, ws) = workspace();
        fixture(dir.path());
        let tool = GrepTool::new(50);

        let args = json!({"pattern": "ALPHA", "glob": "*.rs", "case_insensitive": true});
        let out = tool.execute(input(&tool, &ws, args)).await.unwrap();
        assert_eq!(out["count"], 1);
        assert_eq!(out["matches"][0]["file"], "src/lib.rs");
    }

    #[tokio::test]
    async fn limit_sets_truncated() {
        let (dir, ws) = workspace();
        fixture(dir.path());
        let tool = GrepTool::new(50);

        let out = tool
            .execute(input(&tool, &ws, json!({"pattern": "pub fn", "max_results": 1})))
            .await
            .unwrap();
        assert_eq!(out["count"], 1);
        assert_eq!(out["truncated"], true);
    }

    #[tokio::test]
    async fn single_file_path() {
        let (dir, ws) = workspace();
        fixture(dir.path());
        let tool = GrepTool::new(50);

        let out = tool
            .execute(input(&tool, &ws, json!({"pattern": "beta", "path": "src/lib.rs"})))
            .await
            .unwrap();
        assert_eq!(out["matches"][0]["line_number"], 2);
    }

    #[tokio::test]
    async fn bad_regex_names_the_field() {
        let (_dir, ws) = workspace();
        let tool = GrepTool::new(50);
        let err = tool.execute(input(&tool, &ws, json!({"pattern": "("}))).await.unwrap_err();
        assert_eq!(err.kind(), codeloop_core::ErrorKind::InvalidArguments);
    }
}
