//! write_file: create a file, or overwrite one when asked to explicitly.

use async_trait::async_trait;
use codeloop_core::{FieldType, Schema, Tool, ToolEffect, ToolError, ValidatedInput};
use serde_json::{Value, json};
use tracing::debug;

pub struct WriteFileTool;

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Create a new file with the given content. Parent directories are created. \
         Refuses to replace an existing file unless overwrite is true; \
         prefer edit_file for changes."
    }

    fn input_schema(&self) -> Schema {
        Schema::new()
            .required("path", FieldType::String, "Path of the file to write")
            .required("content", FieldType::String, "Full file content")
            .defaulted(
                "overwrite",
                FieldType::Boolean,
                json!(false),
                "Replace the file if it exists",
            )
    }

    fn output_schema(&self) -> Schema {
        Schema::new()
            .required("message", FieldType::String, "Human-readable summary")
            .required("bytes_written", FieldType::Integer, "Bytes written")
            .required("path", FieldType::String, "Workspace-relative path written")
    }

    fn effect(&self) -> ToolEffect {
        ToolEffect::Mutating
    }

    fn path_params(&self) -> &'static [&'static str] {
        &["path"]
    }

    async fn execute(&self, input: ValidatedInput) -> Result<Value, ToolError> {
        let path = input.path("path")?;
        let content = input.require_str("content")?;
        let overwrite = input.bool_or("overwrite", false);

        if path.absolute.is_dir() {
            return Err(ToolError::execution(
                self.name(),
                format!("{} is a directory", path.relative),
            ));
        }
        let existed = path.absolute.exists();
        if existed && !overwrite {
            return Err(ToolError::execution(
                self.name(),
                format!("{} already exists", path.relative),
            )
            .with_suggestion(format!(
                "edit_file to change {} in place, or write_file with overwrite=true",
                path.relative
            )));
        }

        if let Some(parent) = path.absolute.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                let reason = format!("cannot create {}: {e}", parent.display());
                ToolError::execution(self.name(), reason)
            })?;
        }
        tokio::fs::write(&path.absolute, content).await.map_err(|e| {
            ToolError::execution(self.name(), format!("cannot write {}: {e}", path.relative))
        })?;

        debug!(path = %path.relative, bytes = content.len(), existed, "File written");
        let verb = if existed { "Overwrote" } else { "Created" };
        Ok(json!({
            "message": format!("{verb} {} ({} bytes)", path.relative, content.len()),
            "bytes_written": content.len(),
            "path": path.relative,
        }))
    }
}
