//! Workspace path resolution: filesystem sandboxing to the workspace root.
//!
//! Every path argument a tool receives is resolved here first: joined onto
//! the workspace root, normalized, symlinks in the existing prefix resolved,
//! then checked to still lie under the root and outside forbidden prefixes.

use codeloop_core::ResolvedPath;
use std::path::{Component, Path, PathBuf};

/// Error returned when path validation fails.
#[derive(Debug, thiserror::Error)]
pub enum PathValidationError {
    #[error("Path '{path}' resolves outside the workspace")]
    OutsideWorkspace { path: String },

    #[error("Path '{path}' matches forbidden pattern '{pattern}'")]
    ForbiddenPath { path: String, pattern: String },

    #[error("Workspace root '{path}' is unusable: {reason}")]
    InvalidRoot { path: String, reason: String },
}

/// The directory tree tools are confined to.
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
    forbidden: Vec<String>,
}

impl Workspace {
    /// Open a workspace rooted at an existing directory.
    ///
    /// `forbidden` holds workspace-relative prefixes (e.g. `.git`) that no
    /// tool may touch.
    pub fn new(
        root: impl AsRef<Path>,
        forbidden: Vec<String>,
    ) -> Result<Self, PathValidationError> {
        let root = root.as_ref();
        let canonical = root.canonicalize().map_err(|e| PathValidationError::InvalidRoot {
            path: root.display().to_string(),
            reason: e.to_string(),
        })?;
        if !canonical.is_dir() {
            return Err(PathValidationError::InvalidRoot {
                path: root.display().to_string(),
                reason: "not a directory".into(),
            });
        }
        let forbidden = forbidden
            .into_iter()
            .map(|p| p.replace('\\', "/").trim_matches('/').to_string())
            .filter(|p| !p.is_empty())
            .collect();
        Ok(Self {
            root: canonical,
            forbidden,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a user-supplied path against the workspace.
    ///
    /// Relative paths are taken from the root; absolute paths are accepted
    /// only if they land inside it. Non-existent paths (for writes) are
    /// fine as long as their location is inside.
    pub fn resolve(&self, raw: &str) -> Result<ResolvedPath, PathValidationError> {
        let trimmed = raw.trim();
        let expanded = expand_tilde(if trimmed.is_empty() { "." } else { trimmed });
        let candidate = Path::new(&expanded);
        let joined = if candidate.is_absolute() {
            candidate.to_path_buf()
        } else {
            self.root.join(candidate)
        };

        let outside = || PathValidationError::OutsideWorkspace { path: raw.to_string() };
        let normalized = normalize(&joined).ok_or_else(outside)?;
        let absolute = canonicalize_existing_prefix(&normalized).ok_or_else(outside)?;
        if !absolute.starts_with(&self.root) {
            return Err(outside());
        }

        let relative = self.relative(&absolute).ok_or_else(outside)?;
        if let Some(pattern) = self.forbidden.iter().find(|f| {
            relative == **f || relative.starts_with(&format!("{f}/"))
        }) {
            return Err(PathValidationError::ForbiddenPath {
                path: raw.to_string(),
                pattern: pattern.clone(),
            });
        }

        Ok(ResolvedPath { absolute, relative })
    }

    /// `/`-separated path of `absolute` relative to the root, `.` for the root itself.
    pub fn relative(&self, absolute: &Path) -> Option<String> {
        let rest = absolute.strip_prefix(&self.root).ok()?;
        let parts: Vec<String> = rest
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        if parts.is_empty() {
            Some(".".to_string())
        } else {
            Some(parts.join("/"))
        }
    }
}

/// Lexically remove `.` and `..`. Returns `None` if `..` climbs past the
/// filesystem root.
fn normalize(path: &Path) -> Option<PathBuf> {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    return None;
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    Some(out)
}

/// Symlink hops followed before a chain is treated as a loop.
const MAX_LINK_HOPS: usize = 40;

/// Canonicalize the longest existing ancestor (resolving symlinks) and
/// re-attach the components that do not exist yet.
///
/// A dangling symlink counts as existing: its target is followed hop by hop
/// so a link to a missing file outside the root still resolves outside.
/// Returns `None` for link loops or unreadable links.
fn canonicalize_existing_prefix(path: &Path) -> Option<PathBuf> {
    let mut current = path.to_path_buf();
    for _ in 0..MAX_LINK_HOPS {
        let mut existing = current.clone();
        let mut pending = Vec::new();
        while std::fs::symlink_metadata(&existing).is_err() {
            match (existing.file_name().map(|n| n.to_os_string()), existing.parent()) {
                (Some(name), Some(parent)) => {
                    pending.push(name);
                    existing = parent.to_path_buf();
                }
                _ => return Some(current),
            }
        }

        if let Ok(mut resolved) = existing.canonicalize() {
            for name in pending.into_iter().rev() {
                resolved.push(name);
            }
            return Some(resolved);
        }

        // Dangling link: follow one hop, relative targets from the link's directory.
        let target = std::fs::read_link(&existing).ok()?;
        let mut next = normalize(&existing.parent()?.join(target))?;
        for name in pending.into_iter().rev() {
            next.push(name);
        }
        current = next;
    }
    None
}

/// Expand ~ to the user's home directory.
fn expand_tilde(path: &str) -> String {
    if (path.starts_with("~/") || path == "~")
        && let Ok(home) = home_dir()
    {
        return path.replacen('~', &home, 1);
    }
    path.to_string()
}

fn home_dir() -> Result<String, std::env::VarError> {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn workspace() -> (tempfile::TempDir, Workspace) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("src/main.rs"), "fn main() {}").unwrap();
        let ws = Workspace::new(dir.path(), vec![".git".into()]).unwrap();
        (dir, ws)
    }

    #[test]
    fn relative_path_resolves_inside() {
        let (_dir, ws) = workspace();
        let resolved = ws.resolve("src/main.rs").unwrap();
        assert_eq!(resolved.relative, "src/main.rs");
        assert!(resolved.absolute.starts_with(ws.root()));
    }

    #[test]
    fn dot_and_empty_resolve_to_root() {
        let (_dir, ws) = workspace();
        assert_eq!(ws.resolve(".").unwrap().relative, ".");
        assert_eq!(ws.resolve("").unwrap().relative, ".");
        assert_eq!(ws.resolve("./src/../src").unwrap().relative, "src");
    }

    #[test]
    fn new_file_in_new_dir_is_allowed() {
        let (_dir, ws) = workspace();
        let resolved = ws.resolve("docs/guide/intro.md").unwrap();
        assert_eq!(resolved.relative, "docs/guide/intro.md");
    }

    #[test]
    fn traversal_outside_is_rejected() {
        let (_dir, ws) = workspace();
        let err = ws.resolve("../../../etc/passwd").unwrap_err();
        assert!(matches!(err, PathValidationError::OutsideWorkspace { .. }));
        assert!(ws.resolve("src/../../secret").is_err());
    }

    #[test]
    fn absolute_paths_must_be_inside() {
        let (_dir, ws) = workspace();
        let inside = ws.root().join("src/main.rs");
        assert!(ws.resolve(&inside.to_string_lossy()).is_ok());
        assert!(ws.resolve("/etc/passwd").is_err());
    }

    #[test]
    fn forbidden_prefix_is_rejected() {
        let (_dir, ws) = workspace();
        let err = ws.resolve(".git/config").unwrap_err();
        match err {
            PathValidationError::ForbiddenPath { pattern, .. } => assert_eq!(pattern, ".git"),
            other => panic!("Expected ForbiddenPath, got: {other}"),
        }
        // Only whole components match.
        assert!(ws.resolve(".gitignore").is_ok());
    }

    #[cfg(unix)]
    #[test]
    fn symlink_escape_is_rejected() {
        let (dir, ws) = workspace();
        let outside = tempfile::tempdir().unwrap();
        std::os::unix::fs::symlink(outside.path(), dir.path().join("link")).unwrap();
        assert!(ws.resolve("link/file.txt").is_err());
    }

    #[cfg(unix)]
    #[test]
    fn dangling_link_to_outside_is_rejected() {
        let (dir, ws) = workspace();
        let outside = tempfile::tempdir().unwrap();
        let target = outside.path().join("planted.txt");
        std::os::unix::fs::symlink(&target, dir.path().join("drop")).unwrap();

        let err = ws.resolve("drop").unwrap_err();
        assert!(matches!(err, PathValidationError::OutsideWorkspace { .. }));
        assert!(!target.exists());
    }

    #[cfg(unix)]
    #[test]
    fn dangling_link_chain_is_followed() {
        let (dir, ws) = workspace();
        let outside = tempfile::tempdir().unwrap();
        std::os::unix::fs::symlink(outside.path().join("gone"), dir.path().join("far")).unwrap();
        std::os::unix::fs::symlink("far", dir.path().join("near")).unwrap();
        assert!(ws.resolve("near").is_err());
        assert!(ws.resolve("near/deeper.txt").is_err());
    }

    #[cfg(unix)]
    #[test]
    fn dangling_link_inside_resolves_to_target() {
        let (dir, ws) = workspace();
        std::os::unix::fs::symlink("src/new.rs", dir.path().join("alias")).unwrap();
        let resolved = ws.resolve("alias").unwrap();
        assert_eq!(resolved.relative, "src/new.rs");
    }

    #[cfg(unix)]
    #[test]
    fn link_loop_is_rejected() {
        let (dir, ws) = workspace();
        std::os::unix::fs::symlink("ping", dir.path().join("pong")).unwrap();
        std::os::unix::fs::symlink("pong", dir.path().join("ping")).unwrap();
        assert!(ws.resolve("ping").is_err());
    }

    #[test]
    fn missing_root_is_invalid() {
        let err = Workspace::new("/definitely/not/here", vec![]).unwrap_err();
        assert!(matches!(err, PathValidationError::InvalidRoot { .. }));
    }
}
