//! Gitignore-style pruning and the bounded project walk

use std::path::{Path, PathBuf};

use walkdir::WalkDir;

/// Hard-coded defaults: VCS metadata, build outputs, dependency and cache
/// directories, binary/media extensions.
const DEFAULT_PATTERNS: &[&str] = &[
    ".git",
    ".svn",
    ".hg",
    "node_modules",
    "vendor",
    "target",
    "dist",
    "build",
    "out",
    "__pycache__",
    ".venv",
    ".idea",
    ".vscode",
    ".cache",
    ".DS_Store",
    "*.exe",
    "*.dll",
    "*.so",
    "*.dylib",
    "*.a",
    "*.o",
    "*.bin",
    "*.class",
    "*.pyc",
    "*.png",
    "*.jpg",
    "*.jpeg",
    "*.gif",
    "*.ico",
    "*.pdf",
    "*.zip",
    "*.tar",
    "*.gz",
    "*.lock",
];

/// Pattern matcher for paths that should stay out of the project context.
///
/// Seeded with [`DEFAULT_PATTERNS`] and augmented from a `.gitignore` at the
/// project root when present (comments and negations are skipped).
#[derive(Debug, Clone)]
pub struct IgnoreMatcher {
    root: PathBuf,
    patterns: Vec<String>,
}

impl IgnoreMatcher {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let mut patterns: Vec<String> = DEFAULT_PATTERNS.iter().map(|s| s.to_string()).collect();

        if let Ok(gitignore) = std::fs::read_to_string(root.join(".gitignore")) {
            for line in gitignore.lines() {
                let line = line.trim();
                if line.is_empty() || line.starts_with('#') || line.starts_with('!') {
                    continue;
                }
                patterns.push(line.trim_end_matches('/').to_string());
            }
        }

        Self { root, patterns }
    }

    /// True iff any pattern matches: basename equality, then `*ext` suffix,
    /// then substring of the root-relative path.
    pub fn should_ignore(&self, path: &Path) -> bool {
        let basename = match path.file_name().and_then(|n| n.to_str()) {
            Some(name) => name,
            None => return false,
        };
        let relative = path
            .strip_prefix(&self.root)
            .unwrap_or(path)
            .to_string_lossy();

        for pattern in &self.patterns {
            if basename == pattern {
                return true;
            }
            if let Some(suffix) = pattern.strip_prefix('*') {
                if basename.ends_with(suffix) {
                    return true;
                }
            }
            if relative.contains(pattern.as_str()) {
                return true;
            }
        }
        false
    }

    pub fn pattern_count(&self) -> usize {
        self.patterns.len()
    }
}

/// Walk the project tree up to `max_depth`, pruning ignored directories
/// wholesale and stopping after `max_files` files.
pub fn walk_project(
    root: &Path,
    matcher: &IgnoreMatcher,
    max_depth: usize,
    max_files: usize,
) -> Vec<PathBuf> {
    let mut files = Vec::new();
    let walker = WalkDir::new(root)
        .max_depth(max_depth)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| entry.path() == root || !matcher.should_ignore(entry.path()));

    for entry in walker.flatten() {
        if files.len() >= max_files {
            break;
        }
        if entry.file_type().is_file() {
            files.push(entry.into_path());
        }
    }
    files
}
