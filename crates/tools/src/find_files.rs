//! find_files: glob search over workspace-relative paths.

use async_trait::async_trait;
use codeloop_core::{FieldType, Schema, Tool, ToolError, ValidatedInput};
use glob::{MatchOptions, Pattern};
use serde_json::{Value, json};

use crate::walk;

pub struct FindFilesTool {
    max_results: usize,
}

impl FindFilesTool {
    pub fn new(max_results: usize) -> Self {
        Self { max_results }
    }
}

#[async_trait]
impl Tool for FindFilesTool {
    fn name(&self) -> &str {
        "find_files"
    }

    fn description(&self) -> &str {
        "Find files whose path matches a glob pattern such as '**/*.rs' or 'src/*config*'. \
         A pattern without '/' matches file names at any depth."
    }

    fn input_schema(&self) -> Schema {
        Schema::new()
            .required("pattern", FieldType::String, "Glob pattern")
            .defaulted("path", FieldType::String, json!("."), "Directory to search under")
    }

    fn output_schema(&self) -> Schema {
        Schema::new()
            .required("matches", FieldType::Array, "Matching workspace-relative paths")
            .required("count", FieldType::Integer, "Number of matches returned")
            .required("search_path", FieldType::String, "Directory searched")
    }

    fn path_params(&self) -> &'static [&'static str] {
        &["path"]
    }

    async fn execute(&self, input: ValidatedInput) -> Result<Value, ToolError> {
        let base = input.path("path")?;
        let raw = input.require_str("pattern")?.trim();
        let pattern = Pattern::new(raw)
            .map_err(|e| input.invalid("pattern", &format!("is not a valid glob: {e}")))?;
        if !base.absolute.is_dir() {
            return Err(ToolError::execution(
                self.name(),
                format!("directory not found: {}", base.relative),
            ));
        }

        let options = MatchOptions {
            case_sensitive: true,
            require_literal_separator: raw.contains('/'),
            require_literal_leading_dot: false,
        };
        let name_only = !raw.contains('/');

        let matches: Vec<String> = walk::entries(&base.absolute, usize::MAX)
            .filter(|e| e.file_type().is_file())
            .filter(|e| {
                if name_only {
                    pattern.matches_with(&e.file_name().to_string_lossy(), options)
                } else {
                    pattern.matches_with(&walk::relative_to_base(&base.absolute, e.path()), options)
                }
            })
            .take(self.max_results)
            .map(|e| walk::relative_to_workspace(base, e.path()))
            .collect();

        Ok(json!({
            "count": matches.len(),
            "matches": matches,
            "search_path": base.relative,
        }))
    }
}
