//! Directory traversal shared by the listing and search tools.

use std::path::Path;
use walkdir::{DirEntry, WalkDir};

use codeloop_core::ResolvedPath;

/// Directory names never descended into.
pub const SKIPPED_DIRS: &[&str] = &[
    ".git",
    "node_modules",
    "target",
    "__pycache__",
    ".venv",
    "dist",
    "build",
];

fn is_skipped(entry: &DirEntry) -> bool {
    entry.depth() > 0
        && entry.file_type().is_dir()
        && entry
            .file_name()
            .to_str()
            .is_some_and(|name| SKIPPED_DIRS.contains(&name))
}

/// Walk `base` up to `max_depth` levels, skipping build and VCS directories.
/// The base itself is not yielded.
pub fn entries(base: &Path, max_depth: usize) -> impl Iterator<Item = DirEntry> {
    WalkDir::new(base)
        .max_depth(max_depth)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !is_skipped(e))
        .filter_map(|e| e.ok())
        .filter(|e| e.depth() > 0)
}

/// Workspace-relative form of a path found under `base`.
pub fn relative_to_workspace(base: &ResolvedPath, found: &Path) -> String {
    let suffix = found
        .strip_prefix(&base.absolute)
        .map(|p| {
            p.components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join("/")
        })
        .unwrap_or_else(|_| found.display().to_string());
    match (base.relative.as_str(), suffix.is_empty()) {
        (_, true) => base.relative.clone(),
        (".", false) => suffix,
        (prefix, false) => format!("{prefix}/{suffix}"),
    }
}

/// Path of `found` relative to `base` itself, used for pattern matching.
pub fn relative_to_base(base: &Path, found: &Path) -> String {
    found
        .strip_prefix(base)
        .map(|p| {
            p.components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join("/")
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn skips_vendor_directories() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::create_dir_all(dir.path().join("node_modules/pkg")).unwrap();
        std::fs::write(dir.path().join("src/lib.rs"), "").unwrap();
        std::fs::write(dir.path().join("node_modules/pkg/index.js"), "").unwrap();

        let names: Vec<String> = entries(dir.path(), 10)
            .map(|e| relative_to_base(dir.path(), e.path()))
            .collect();
        assert_eq!(names, vec!["src", "src/lib.rs"]);
    }

    #[test]
    fn relative_paths_include_base_prefix() {
        let base = ResolvedPath {
            absolute: PathBuf::from("/ws/src"),
            relative: "src".into(),
        };
        assert_eq!(relative_to_workspace(&base, Path::new("/ws/src/a/b.rs")), "src/a/b.rs");

        let root = ResolvedPath {
            absolute: PathBuf::from("/ws"),
            relative: ".".into(),
        };
        assert_eq!(relative_to_workspace(&root, Path::new("/ws/main.rs")), "main.rs");
    }
}
