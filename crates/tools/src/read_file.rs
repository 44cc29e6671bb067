//! read_file: read a text file from the workspace, optionally a line slice.

use async_trait::async_trait;
use codeloop_core::{FieldType, Schema, Tool, ToolError, ValidatedInput};
use serde_json::{Value, json};
use std::path::PathBuf;
use tracing::debug;

use crate::walk;

pub struct ReadFileTool {
    root: PathBuf,
    max_bytes: usize,
}

impl ReadFileTool {
    pub fn new(root: impl Into<PathBuf>, max_bytes: usize) -> Self {
        Self {
            root: root.into(),
            max_bytes,
        }
    }

    /// Look for files with the same name elsewhere in the workspace.
    fn similar_files(&self, missing: &str) -> Vec<String> {
        let Some(name) = missing.rsplit('/').next().filter(|n| !n.is_empty()) else {
            return Vec::new();
        };
        walk::entries(&self.root, 12)
            .filter(|e| e.file_type().is_file() && e.file_name().to_string_lossy() == name)
            .map(|e| walk::relative_to_base(&self.root, e.path()))
            .take(3)
            .collect()
    }
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read the contents of a text file in the workspace. \
         Use offset and limit to read a slice of a large file."
    }

    fn input_schema(&self) -> Schema {
        Schema::new()
            .required("path", FieldType::String, "Path to the file, relative to the workspace root")
            .optional("offset", FieldType::Integer, "0-based line to start reading from")
            .optional("limit", FieldType::Integer, "Maximum number of lines to return")
    }

    fn output_schema(&self) -> Schema {
        Schema::new()
            .required("content", FieldType::String, "File content")
            .required("total_lines", FieldType::Integer, "Lines in the whole file")
            .required("lines_returned", FieldType::Integer, "Lines included in content")
    }

    fn path_params(&self) -> &'static [&'static str] {
        &["path"]
    }

    async fn execute(&self, input: ValidatedInput) -> Result<Value, ToolError> {
        let path = input.path("path")?;

        if path.absolute.is_dir() {
            return Err(ToolError::execution(
                self.name(),
                format!("{} is a directory", path.relative),
            )
            .with_suggestion(format!("list_files with path '{}'", path.relative)));
        }

        let bytes = match tokio::fs::read(&path.absolute).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let similar = self.similar_files(&path.relative);
                let suggestion = if similar.is_empty() {
                    "find_files to locate the file, then read it by its exact path".to_string()
                } else {
                    format!("read_file with one of: {}", similar.join(", "))
                };
                return Err(ToolError::execution(
                    self.name(),
                    format!("file not found: {}", path.relative),
                )
                .with_suggestion(suggestion));
            }
            Err(e) => {
                return Err(ToolError::execution(
                    self.name(),
                    format!("cannot read {}: {e}", path.relative),
                ));
            }
        };

        if bytes.iter().take(8192).any(|b| *b == 0) {
            return Err(ToolError::execution(
                self.name(),
                format!("{} looks like a binary file", path.relative),
            ));
        }

        let text = String::from_utf8_lossy(&bytes);
        let lines: Vec<&str> = text.split_inclusive('\n').collect();
        let total = lines.len();
        let offset = input.u64_opt("offset").unwrap_or(0) as usize;
        let limit = input.u64_opt("limit").map(|l| l as usize).unwrap_or(total);

        let slice: Vec<&str> = lines.iter().skip(offset).take(limit).copied().collect();
        let content = slice.concat();
        if content.len() > self.max_bytes {
            return Err(ToolError::execution(
                self.name(),
                format!(
                    "{} is too large to return at once ({} bytes, limit {})",
                    path.relative,
                    content.len(),
                    self.max_bytes
                ),
            )
            .with_suggestion("read_file with offset and limit to read it in slices"));
        }

        debug!(path = %path.relative, total_lines = total, returned = slice.len(), "File read");
        Ok(json!({
            "content": content,
            "total_lines": total,
            "lines_returned": slice.len(),
        }))
    }
}
