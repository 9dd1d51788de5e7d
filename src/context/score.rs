//! File priority scoring for proactive focus selection

use std::path::{Path, PathBuf};

/// Top-level directories that usually hold the interesting code
const IMPORTANT_DIRS: &[&str] = &["src", "cmd", "internal", "pkg", "api", "lib"];

const SOURCE_EXTENSIONS: &[&str] = &[
    "rs", "go", "py", "js", "ts", "tsx", "jsx", "java", "kt", "c", "h", "cpp", "hpp", "rb", "ex",
];
const DOC_EXTENSIONS: &[&str] = &["md", "rst", "txt", "adoc"];
const CONFIG_EXTENSIONS: &[&str] = &["yaml", "yml", "json", "ini", "env"];
const MANIFEST_NAMES: &[&str] = &[
    "cargo.toml",
    "go.mod",
    "package.json",
    "pyproject.toml",
    "build.gradle",
    "pom.xml",
    "gemfile",
    "makefile",
];

/// Score a file's priority for inclusion in the focus set, clamped to
/// [0, 100]. Higher means more likely to matter to a fresh agent.
pub fn score_file(root: &Path, path: &Path) -> u32 {
    let relative = path.strip_prefix(root).unwrap_or(path);
    let basename = relative
        .file_name()
        .map(|n| n.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    let stem = relative
        .file_stem()
        .map(|n| n.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    let extension = relative
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();

    let mut score: i32 = 0;

    score += match stem.as_str() {
        "readme" => 90,
        "license" | "licence" => 70,
        "contributing" => 60,
        "changelog" => 50,
        _ => 0,
    };

    if let Some(top) = relative.components().next() {
        let top = top.as_os_str().to_string_lossy().to_lowercase();
        if IMPORTANT_DIRS.contains(&top.as_str()) {
            score += 30;
        }
    }

    if MANIFEST_NAMES.contains(&basename.as_str()) {
        score += 45;
    } else if SOURCE_EXTENSIONS.contains(&extension.as_str()) {
        score += 50;
    } else if DOC_EXTENSIONS.contains(&extension.as_str()) {
        score += 40;
    } else if CONFIG_EXTENSIONS.contains(&extension.as_str()) {
        score += 30;
    }

    if is_test_file(relative, &stem) {
        score -= 20;
    }

    score.clamp(0, 100) as u32
}

/// Rank candidates by score (descending, path order on ties) and return
/// the top `n`.
pub fn rank_files(root: &Path, files: &[PathBuf], n: usize) -> Vec<PathBuf> {
    let mut scored: Vec<(u32, &PathBuf)> = files.iter().map(|p| (score_file(root, p), p)).collect();
    scored.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(b.1)));
    scored.into_iter().take(n).map(|(_, p)| p.clone()).collect()
}

fn is_test_file(relative: &Path, stem: &str) -> bool {
    if stem.ends_with("_test") || stem.starts_with("test_") || stem.ends_with(".test") || stem.ends_with("_spec") {
        return true;
    }
    relative
        .components()
        .any(|c| matches!(c.as_os_str().to_str(), Some("tests") | Some("test") | Some("__tests__")))
}
