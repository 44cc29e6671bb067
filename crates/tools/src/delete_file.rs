//! delete_file: remove a file or a directory tree.

use async_trait::async_trait;
use codeloop_core::{FieldType, Schema, Tool, ToolEffect, ToolError, ValidatedInput};
use serde_json::{Value, json};
use tracing::info;

pub struct DeleteFileTool;

#[async_trait]
impl Tool for DeleteFileTool {
    fn name(&self) -> &str {
        "delete_file"
    }

    fn description(&self) -> &str {
        "Delete a file, or a directory and everything in it. Cannot be undone."
    }

    fn input_schema(&self) -> Schema {
        Schema::new().required("path", FieldType::String, "Path of the file or directory to delete")
    }

    fn output_schema(&self) -> Schema {
        Schema::new()
            .required("message", FieldType::String, "Human-readable summary")
            .required("deleted", FieldType::String, "Workspace-relative path deleted")
            .required("is_dir", FieldType::Boolean, "Whether a directory was removed")
    }

    fn effect(&self) -> ToolEffect {
        ToolEffect::Destructive
    }

    fn path_params(&self) -> &'static [&'static str] {
        &["path"]
    }

    async fn execute(&self, input: ValidatedInput) -> Result<Value, ToolError> {
        let path = input.path("path")?;
        if path.relative == "." {
            return Err(ToolError::boundary(self.name(), "refusing to delete the workspace root"));
        }

        let metadata = match tokio::fs::symlink_metadata(&path.absolute).await {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ToolError::execution(
                    self.name(),
                    format!("path does not exist: {}", path.relative),
                )
                .with_suggestion("list_files to check what exists"));
            }
            Err(e) => {
                return Err(ToolError::execution(
                    self.name(),
                    format!("cannot inspect {}: {e}", path.relative),
                ));
            }
        };

        let is_dir = metadata.is_dir();
        let removed = if is_dir {
            tokio::fs::remove_dir_all(&path.absolute).await
        } else {
            tokio::fs::remove_file(&path.absolute).await
        };
        removed.map_err(|e| {
            ToolError::execution(self.name(), format!("cannot delete {}: {e}", path.relative))
        })?;

        info!(path = %path.relative, is_dir, "Deleted");
        let kind = if is_dir { "directory" } else { "file" };
        Ok(json!({
            "message": format!("Deleted {kind} {}", path.relative),
            "deleted": path.relative,
            "is_dir": is_dir,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{input, workspace};

    #[tokio::test]
    async fn deletes_file_and_directory() {
        let (dir, ws) = workspace();
        std::fs::write(dir.path().join("a.txt"), "").unwrap();
        std::fs::create_dir_all(dir.path().join("out/nested")).unwrap();
        std::fs::write(dir.path().join("out/nested/b.txt"), "").unwrap();

        let out = DeleteFileTool
            .execute(input(&DeleteFileTool, &ws, json!({"path": "a.txt"})))
            .await
            .unwrap();
        assert_eq!(out["is_dir"], false);
        assert!(!dir.path().join("a.txt").exists());

        let out = DeleteFileTool
            .execute(input(&DeleteFileTool, &ws, json!({"path": "out"})))
            .await
            .unwrap();
        assert_eq!(out["is_dir"], true);
        assert!(!dir.path().join("out").exists());
    }

    #[tokio::test]
    async fn missing_path_is_recoverable() {
        let (_dir, ws) = workspace();
        let err = DeleteFileTool
            .execute(input(&DeleteFileTool, &ws, json!({"path": "ghost.txt"})))
            .await
            .unwrap_err();
        assert!(!err.is_fatal());
    }

    #[tokio::test]
    async fn workspace_root_is_protected() {
        let (_dir, ws) = workspace();
        let err = DeleteFileTool
            .execute(input(&DeleteFileTool, &ws, json!({"path": "."})))
            .await
            .unwrap_err();
        assert!(err.is_fatal());
    }
}
