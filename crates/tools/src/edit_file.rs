//! edit_file: exact string replacement inside one file.
//!
//! When the exact text is not present, a whitespace-tolerant match is tried
//! (runs of whitespace in `old_string` match any run of whitespace in the
//! file), which covers the common case of a model re-indenting a snippet.

use async_trait::async_trait;
use codeloop_core::{FieldType, Schema, Tool, ToolEffect, ToolError, ValidatedInput};
use regex::{NoExpand, Regex};
use serde_json::{Value, json};
use tracing::debug;

/// Why a single replacement could not be applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum EditFailure {
    NotFound,
    NoChange,
}

/// Apply one replacement to `content`, returning the new text and the number
/// of replacements made. An empty `old` replaces the whole content.
pub(crate) fn apply_edit(
    content: &str,
    old: &str,
    new: &str,
    replace_all: bool,
) -> Result<(String, usize), EditFailure> {
    if old.is_empty() {
        return Ok((new.to_string(), 1));
    }
    if old == new {
        return Err(EditFailure::NoChange);
    }

    let exact = content.matches(old).count();
    if exact > 0 {
        return Ok(if replace_all {
            (content.replace(old, new), exact)
        } else {
            (content.replacen(old, new, 1), 1)
        });
    }

    let words: Vec<&str> = old.split_whitespace().collect();
    if words.is_empty() {
        return Err(EditFailure::NotFound);
    }
    let pattern = words
        .iter()
        .map(|w| regex::escape(w))
        .collect::<Vec<_>>()
        .join(r"\s+");
    let Ok(re) = Regex::new(&pattern) else {
        return Err(EditFailure::NotFound);
    };
    let found = re.find_iter(content).count();
    if found == 0 {
        return Err(EditFailure::NotFound);
    }
    let limit = if replace_all { 0 } else { 1 };
    let replaced = re.replacen(content, limit, NoExpand(new)).into_owned();
    Ok((replaced, if replace_all { found } else { 1 }))
}

pub(crate) fn describe_failure(failure: &EditFailure, relative: &str) -> String {
    match failure {
        EditFailure::NotFound => format!("old_string not found in {relative}"),
        EditFailure::NoChange => "old_string and new_string are identical".to_string(),
    }
}

pub struct EditFileTool;

#[async_trait]
impl Tool for EditFileTool {
    fn name(&self) -> &str {
        "edit_file"
    }

    fn description(&self) -> &str {
        "Edit an existing file by replacing old_string with new_string. Read the file first so \
         old_string matches exactly. An empty old_string replaces the whole file."
    }

    fn input_schema(&self) -> Schema {
        Schema::new()
            .required("path", FieldType::String, "Path of the file to edit")
            .required("old_string", FieldType::String, "Exact text to replace")
            .required("new_string", FieldType::String, "Replacement text")
            .defaulted("replace_all", FieldType::Boolean, json!(false), "Replace every occurrence")
    }

    fn output_schema(&self) -> Schema {
        Schema::new()
            .required("message", FieldType::String, "Human-readable summary")
            .required("replacements", FieldType::Integer, "Number of replacements made")
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
        let old = input.require_str("old_string")?;
        let new = input.require_str("new_string")?;
        let replace_all = input.bool_or("replace_all", false);

        let content = match tokio::fs::read_to_string(&path.absolute).await {
            Ok(content) => content,
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

        let (updated, replacements) = apply_edit(&content, old, new, replace_all).map_err(|f| {
            ToolError::execution(self.name(), describe_failure(&f, &path.relative)).with_suggestion(
                format!("read_file {} again and copy the exact text to replace", path.relative),
            )
        })?;

        tokio::fs::write(&path.absolute, &updated).await.map_err(|e| {
            ToolError::execution(self.name(), format!("cannot write {}: {e}", path.relative))
        })?;

        debug!(path = %path.relative, replacements, "File edited");
        Ok(json!({
            "message": format!("Edited {} ({replacements} replacement(s))", path.relative),
            "replacements": replacements,
            "path": path.relative,
        }))
    }
}
