//! multi_edit: several replacements in one file, all or nothing.

use async_trait::async_trait;
use codeloop_core::{FieldType, Schema, Tool, ToolEffect, ToolError, ValidatedInput};
use serde_json::{Value, json};
use tracing::debug;

use crate::edit_file::{apply_edit, describe_failure};

pub struct MultiEditTool;

fn edit_schema() -> Schema {
    Schema::new()
        .required("old_string", FieldType::String, "Exact text to replace")
        .required("new_string", FieldType::String, "Replacement text")
        .defaulted("replace_all", FieldType::Boolean, json!(false), "Replace every occurrence")
}

#[async_trait]
impl Tool for MultiEditTool {
    fn name(&self) -> &str {
        "multi_edit"
    }

    fn description(&self) -> &str {
        "Apply a sequence of replacements to one file. Edits run in order on the result of the \
         previous edit; if any edit fails nothing is written."
    }

    fn input_schema(&self) -> Schema {
        Schema::new()
            .required("path", FieldType::String, "Path of the file to edit")
            .array_of("edits", edit_schema(), true, "Edits to apply in order")
    }

    fn output_schema(&self) -> Schema {
        Schema::new()
            .required("message", FieldType::String, "Human-readable summary")
            .required("edits_applied", FieldType::Integer, "Number of edits applied")
            .required("path", FieldType::String, "Workspace-relative path edited")
    }

    fn effect(&self) -> ToolEffect {
        ToolEffect::Mutating
    }

    fn path_params(&self) -> &'static [&'static str] {
        &["path"]
    }

    async fn execute(&self, input: ValidatedInput) -> Result<Value, ToolError> {
        let path = input.path("path")?;
        let edits = input.array("edits").ok_or_else(|| input.invalid("edits", "is required"))?;
        if edits.is_empty() {
            return Err(input.invalid("edits", "must contain at least one edit"));
        }

        let creates = edits[0]
            .get("old_string")
            .and_then(Value::as_str)
            .is_some_and(str::is_empty);
        let mut content = match tokio::fs::read_to_string(&path.absolute).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound && creates => String::new(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ToolError::execution(
                    self.name(),
                    format!("file not found: {}", path.relative),
                )
                .with_suggestion(format!("write_file to create {}", path.relative)));
            }
            Err(e) => {
                return Err(ToolError::execution(
                    self.name(),
                    format!("cannot read {}: {e}", path.relative),
                ));
            }
        };

        for (i, edit) in edits.iter().enumerate() {
            let old = edit.get("old_string").and_then(Value::as_str).unwrap_or_default();
            let new = edit.get("new_string").and_then(Value::as_str).unwrap_or_default();
            let replace_all = edit.get("replace_all").and_then(Value::as_bool).unwrap_or(false);
            match apply_edit(&content, old, new, replace_all) {
                Ok((updated, _)) => content = updated,
                Err(failure) => {
                    return Err(ToolError::execution(
                        self.name(),
                        format!(
                            "edit {} of {}: {}; no changes were written",
                            i + 1,
                            edits.len(),
                            describe_failure(&failure, &path.relative)
                        ),
                    )
                    .with_suggestion(format!(
                        "read_file {} again and resend all edits against its current text",
                        path.relative
                    )));
                }
            }
        }

        if let Some(parent) = path.absolute.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                let reason = format!("cannot create {}: {e}", parent.display());
                ToolError::execution(self.name(), reason)
            })?;
        }
        tokio::fs::write(&path.absolute, &content).await.map_err(|e| {
            ToolError::execution(self.name(), format!("cannot write {}: {e}", path.relative))
        })?;

        debug!(path = %path.relative, edits = edits.len(), "Multi-edit applied");
        Ok(json!({
            "message": format!("Applied {} edit(s) to {}", edits.len(), path.relative),
            "edits_applied": edits.len(),
            "path": path.relative,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{input, workspace};

    #[tokio::test]
    async fn applies_edits_in_sequence() {
        let (dir, ws) = workspace();
        std::fs::write(dir.path().join("a.py"), "x = 1\ny = 2\n").unwrap();

        let out = MultiEditTool
            .execute(input(
                &MultiEditTool,
                &ws,
                json!({"path": "a.py", "edits": [
                    {"old_string": "x = 1", "new_string": "x = 10"},
                    {"old_string": "x = 10", "new_string": "x = 100"},
                    {"old_string": "y", "new_string": "z", "replace_all": true}
                ]}),
            ))
            .await
            .unwrap();
        assert_eq!(out["edits_applied"], 3);
        assert_eq!(std::fs::read_to_string(dir.path().join("a.py")).unwrap(), "x = 100\nz = 2\n");
    }

    #[tokio::test]
    async fn failing_edit_leaves_file_untouched() {
        let (dir, ws) = workspace();
        std::fs::write(dir.path().join("a.py"), "x = 1\n").unwrap();

        let err = MultiEditTool
            .execute(input(
                &MultiEditTool,
                &ws,
                json!({"path": "a.py", "edits": [
                    {"old_string": "x = 1", "new_string": "x = 2"},
                    {"old_string": "missing", "new_string": "y"}
                ]}),
            ))
            .await
            .unwrap_err();
        assert!(err.reason().starts_with("edit 2 of 2"));
        assert_eq!(std::fs::read_to_string(dir.path().join("a.py")).unwrap(), "x = 1\n");
    }

    #[tokio::test]
    async fn empty_first_edit_creates_file() {
        let (dir, ws) = workspace();
        MultiEditTool
            .execute(input(
                &MultiEditTool,
                &ws,
                json!({"path": "new.txt", "edits": [
                    {"old_string": "", "new_string": "hello world"},
                    {"old_string": "world", "new_string": "there"}
                ]}),
            ))
            .await
            .unwrap();
        assert_eq!(std::fs::read_to_string(dir.path().join("new.txt")).unwrap(), "hello there");
    }
}
