//! Workspace project detection for the system prompt.

use std::collections::HashMap;
use std::path::Path;

use walkdir::WalkDir;

/// Marker files per language, checked in order.
const MARKERS: &[(&str, &[&str])] = &[
    ("python", &["requirements.txt", "pyproject.toml", "setup.py", "Pipfile"]),
    ("javascript", &["package.json", "yarn.lock", "package-lock.json"]),
    ("go", &["go.mod"]),
    ("rust", &["Cargo.toml"]),
    ("java", &["pom.xml", "build.gradle", "build.gradle.kts"]),
];

const EXTENSIONS: &[(&str, &str)] = &[
    ("py", "python"),
    ("js", "javascript"),
    ("jsx", "javascript"),
    ("ts", "typescript"),
    ("tsx", "typescript"),
    ("go", "go"),
    ("rs", "rust"),
    ("java", "java"),
    ("rb", "ruby"),
    ("c", "c"),
    ("cpp", "c++"),
];

const IGNORED: &[&str] = &[
    "node_modules",
    "__pycache__",
    "venv",
    ".venv",
    "target",
    "build",
    "dist",
];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProjectInfo {
    pub language: Option<String>,
    pub framework: Option<String>,
    pub package_manager: Option<String>,
}

impl ProjectInfo {
    /// One line for the system prompt, or `None` when nothing was detected.
    pub fn describe(&self) -> Option<String> {
        let language = self.language.as_deref()?;
        let mut out = format!("Detected a {language} project");
        if let Some(framework) = &self.framework {
            out.push_str(&format!(" using {framework}"));
        }
        if let Some(pm) = &self.package_manager {
            out.push_str(&format!(" (package manager: {pm})"));
        }
        out.push('.');
        Some(out)
    }
}

/// Inspect marker files at the root and one level down, then fall back to
/// counting source file extensions.
pub fn detect(root: &Path) -> ProjectInfo {
    let mut info = ProjectInfo::default();

    for (language, files) in MARKERS {
        if files.iter().any(|f| find_marker(root, f).is_some()) {
            info.language = Some((*language).to_string());
            break;
        }
    }

    match info.language.clone().as_deref() {
        Some("javascript") => {
            if find_marker(root, "tsconfig.json").is_some() {
                info.language = Some("typescript".into());
            }
            info.framework = find_marker(root, "package.json").and_then(|p| js_framework(&p));
            info.package_manager = Some(
                if find_marker(root, "yarn.lock").is_some() {
                    "yarn"
                } else if find_marker(root, "pnpm-lock.yaml").is_some() {
                    "pnpm"
                } else {
                    "npm"
                }
                .into(),
            );
        }
        Some("python") => {
            info.package_manager = if find_marker(root, "requirements.txt").is_some() {
                Some("pip".into())
            } else if find_marker(root, "pyproject.toml").is_some() {
                Some("poetry".into())
            } else if find_marker(root, "Pipfile").is_some() {
                Some("pipenv".into())
            } else {
                None
            };
        }
        Some("rust") => info.package_manager = Some("cargo".into()),
        Some(_) => {}
        None => info.language = dominant_extension(root),
    }

    info
}

fn find_marker(root: &Path, name: &str) -> Option<std::path::PathBuf> {
    let direct = root.join(name);
    if direct.is_file() {
        return Some(direct);
    }
    std::fs::read_dir(root)
        .ok()?
        .flatten()
        .filter(|e| e.path().is_dir() && !e.file_name().to_string_lossy().starts_with('.'))
        .map(|e| e.path().join(name))
        .find(|p| p.is_file())
}

fn js_framework(package_json: &Path) -> Option<String> {
    let text = std::fs::read_to_string(package_json).ok()?;
    let pkg: serde_json::Value = serde_json::from_str(&text).ok()?;
    let has = |dep: &str| {
        ["dependencies", "devDependencies"]
            .iter()
            .any(|section| pkg.get(section).and_then(|s| s.get(dep)).is_some())
    };
    ["next", "react", "vue", "@angular/core", "svelte"]
        .into_iter()
        .find(|dep| has(*dep))
        .map(|dep| match dep {
            "next" => "next.js".to_string(),
            "@angular/core" => "angular".to_string(),
            other => other.to_string(),
        })
}

fn dominant_extension(root: &Path) -> Option<String> {
    let mut counts: HashMap<&'static str, usize> = HashMap::new();
    let walker = WalkDir::new(root).max_depth(4).into_iter().filter_entry(|e| {
        let name = e.file_name().to_string_lossy();
        e.depth() == 0 || !(name.starts_with('.') || IGNORED.contains(&name.as_ref()))
    });
    for entry in walker.flatten().filter(|e| e.file_type().is_file()) {
        let ext = entry.path().extension().and_then(|e| e.to_str()).unwrap_or_default();
        if let Some((_, language)) = EXTENSIONS.iter().find(|(e, _)| *e == ext) {
            *counts.entry(*language).or_default() += 1;
        }
    }
    counts
        .into_iter()
        .max_by(|a, b| a.1.cmp(&b.1).then(b.0.cmp(a.0)))
        .map(|(language, _)| language.to_string())
}
