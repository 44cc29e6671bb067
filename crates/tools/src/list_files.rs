//! list_files: directory listing.

use async_trait::async_trait;
use codeloop_core::{FieldType, Schema, Tool, ToolError, ValidatedInput};
use serde_json::{Value, json};

use crate::walk;

const MAX_DEPTH: usize = 10;
const MAX_ENTRIES: usize = 500;

pub struct ListFilesTool;

#[async_trait]
impl Tool for ListFilesTool {
    fn name(&self) -> &str {
        "list_files"
    }

    fn description(&self) -> &str {
        "List files and directories under a path. Directories end with '/'. \
         VCS, dependency and build directories are skipped."
    }

    fn input_schema(&self) -> Schema {
        Schema::new()
            .defaulted("path", FieldType::String, json!("."), "Directory to list")
            .defaulted(
                "depth",
                FieldType::Integer,
                json!(1),
                "How many levels to descend (1 = direct children)",
            )
    }

    fn output_schema(&self) -> Schema {
        Schema::new()
            .required("entries", FieldType::Array, "Workspace-relative paths")
            .required("count", FieldType::Integer, "Number of entries")
            .required("path", FieldType::String, "Directory listed")
    }

    fn path_params(&self) -> &'static [&'static str] {
        &["path"]
    }

    async fn execute(&self, input: ValidatedInput) -> Result<Value, ToolError> {
        let base = input.path("path")?;
        if !base.absolute.is_dir() {
            let reason = if base.absolute.exists() {
                format!("{} is not a directory", base.relative)
            } else {
                format!("directory not found: {}", base.relative)
            };
            return Err(ToolError::execution(self.name(), reason)
                .with_suggestion("list_files with path '.' to see the workspace root"));
        }

        let depth = (input.u64_opt("depth").unwrap_or(1) as usize).clamp(1, MAX_DEPTH);
        let entries: Vec<String> = walk::entries(&base.absolute, depth)
            .take(MAX_ENTRIES)
            .map(|e| {
                let rel = walk::relative_to_workspace(base, e.path());
                if e.file_type().is_dir() { format!("{rel}/") } else { rel }
            })
            .collect();

        Ok(json!({
            "count": entries.len(),
            "entries": entries,
            "path": base.relative,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{input, workspace};

    #[tokio::test]
    async fn lists_direct_children_by_default() {
        let (dir, ws) = workspace();
        std::fs::create_dir_all(dir.path().join("src/bin")).unwrap();
        std::fs::write(dir.path().join("src/bin/x.rs"), "").unwrap();
        std::fs::write(dir.path().join("Cargo.toml"), "").unwrap();
        std::fs::create_dir_all(dir.path().join("target/debug")).unwrap();

        let out = ListFilesTool.execute(input(&ListFilesTool, &ws, json!({}))).await.unwrap();
        assert_eq!(out["entries"], json!(["Cargo.toml", "src/"]));
        assert_eq!(out["path"], ".");
    }

    #[tokio::test]
    async fn depth_descends_into_subdirectories() {
        let (dir, ws) = workspace();
        std::fs::create_dir_all(dir.path().join("src/bin")).unwrap();
        std::fs::write(dir.path().join("src/bin/x.rs"), "").unwrap();

        let out = ListFilesTool
            .execute(input(&ListFilesTool, &ws, json!({"path": "src", "depth": 2})))
            .await
            .unwrap();
        assert_eq!(out["entries"], json!(["src/bin/", "src/bin/x.rs"]));
        assert_eq!(out["count"], 2);
    }

    #[tokio::test]
    async fn missing_directory_is_recoverable() {
        let (_dir, ws) = workspace();
        let err = ListFilesTool
            .execute(input(&ListFilesTool, &ws, json!({"path": "nope"})))
            .await
            .unwrap_err();
        assert_eq!(err.reason(), "directory not found: nope");
    }
}
