//! Context manager - assembles the project portion of the system prompt
//! under a token budget

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::config::ContextSettings;
use crate::error::{CoreError, Result};
use crate::tokens::estimate_tokens;

use super::focus::FocusSet;
use super::ignore::{walk_project, IgnoreMatcher};
use super::score::rank_files;

/// Flat listing cap; the remainder is summarized
const TREE_LISTING_CAP: usize = 1000;

/// A focused file with its full content attached
#[derive(Debug, Clone)]
pub struct FocusedFile {
    pub path: PathBuf,
    pub content: String,
    pub tokens: usize,
}

/// Project context assembled for one prompt build
#[derive(Debug, Clone)]
pub struct ProjectContext {
    /// Rendered file-tree summary
    pub file_tree: String,
    /// Focus-set files with contents
    pub focused_files: Vec<FocusedFile>,
    /// Heuristic token estimate over the whole context
    pub total_tokens: usize,
}

impl ProjectContext {
    /// Markdown rendering for inclusion in the system prompt
    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str(&self.file_tree);
        for file in &self.focused_files {
            out.push_str(&format!(
                "\n## File: {}\n```\n{}\n```\n",
                file.path.display(),
                file.content
            ));
        }
        out
    }
}

/// Owns the project root, ignore rules, and the focus set; produces
/// [`ProjectContext`] values within the configured token budget.
pub struct ContextManager {
    root: PathBuf,
    ignore: IgnoreMatcher,
    focus: Mutex<FocusSet>,
    token_budget: usize,
    max_walk_depth: usize,
    max_walk_files: usize,
}

impl ContextManager {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        Self::with_settings(root, &ContextSettings::default())
    }

    pub fn with_settings(root: impl Into<PathBuf>, settings: &ContextSettings) -> Result<Self> {
        let root = root.into().canonicalize()?;
        let ignore = IgnoreMatcher::new(&root);
        Ok(Self {
            ignore,
            focus: Mutex::new(FocusSet::new(settings.focus_capacity)),
            token_budget: settings.token_budget,
            max_walk_depth: settings.max_walk_depth,
            max_walk_files: settings.max_walk_files,
            root,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn token_budget(&self) -> usize {
        self.token_budget
    }

    /// Assemble a fresh project context: file-tree summary, focused file
    /// contents, and the total token estimate.
    pub async fn build_context(&self) -> Result<ProjectContext> {
        let files = self.walk().await?;
        let file_tree = render_file_tree(&self.root, &files);

        let mut focused_files = Vec::new();
        for path in self.focused_paths() {
            match tokio::fs::read_to_string(&path).await {
                Ok(content) => {
                    let tokens = estimate_tokens(&content);
                    focused_files.push(FocusedFile {
                        path,
                        content,
                        tokens,
                    });
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping unreadable focused file");
                }
            }
        }

        let total_tokens =
            estimate_tokens(&file_tree) + focused_files.iter().map(|f| f.tokens).sum::<usize>();

        Ok(ProjectContext {
            file_tree,
            focused_files,
            total_tokens,
        })
    }

    /// Validate that `path` resolves strictly inside the project root.
    pub fn validate_path(&self, path: &Path) -> Result<PathBuf> {
        let joined = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        };
        let resolved = joined
            .canonicalize()
            .map_err(|_| CoreError::PathEscape { path: joined.clone() })?;
        if resolved.starts_with(&self.root) {
            Ok(resolved)
        } else {
            Err(CoreError::PathEscape { path: resolved })
        }
    }

    /// Focus a file, evicting oldest entries until the focus-set estimate
    /// fits the budget again.
    pub async fn add_focus(&self, path: &Path) -> Result<()> {
        let resolved = self.validate_path(path)?;
        let content = tokio::fs::read_to_string(&resolved).await?;
        self.insert_focus(resolved, &content);
        Ok(())
    }

    /// Read a file through normal I/O and focus it.
    pub async fn read_file(&self, path: &Path) -> Result<String> {
        let resolved = self.validate_path(path)?;
        let content = tokio::fs::read_to_string(&resolved).await?;
        self.insert_focus(resolved, &content);
        Ok(content)
    }

    /// Score the project files and focus the top `n`; returns the selected
    /// paths in rank order.
    pub async fn auto_select(&self, n: usize) -> Result<Vec<PathBuf>> {
        let files = self.walk().await?;
        let selected = rank_files(&self.root, &files, n);
        for path in &selected {
            if let Ok(content) = tokio::fs::read_to_string(path).await {
                self.insert_focus(path.clone(), &content);
            }
        }
        Ok(selected)
    }

    pub fn focused_paths(&self) -> Vec<PathBuf> {
        self.lock_focus().paths()
    }

    pub fn focus_len(&self) -> usize {
        self.lock_focus().len()
    }

    fn insert_focus(&self, path: PathBuf, content: &str) {
        let tokens = estimate_tokens(content);
        let mut focus = self.lock_focus();
        if let Some(evicted) = focus.add(path, tokens) {
            tracing::debug!(path = %evicted.display(), "focus capacity eviction");
        }
        // Shrink back under budget, keeping at least the newest entry
        while focus.total_tokens() > self.token_budget && focus.len() > 1 {
            if let Some((evicted, _)) = focus.pop_oldest() {
                tracing::debug!(path = %evicted.display(), "focus budget eviction");
            }
        }
    }

    async fn walk(&self) -> Result<Vec<PathBuf>> {
        let root = self.root.clone();
        let ignore = self.ignore.clone();
        let depth = self.max_walk_depth;
        let ceiling = self.max_walk_files;
        tokio::task::spawn_blocking(move || walk_project(&root, &ignore, depth, ceiling))
            .await
            .map_err(|e| CoreError::Invariant(format!("walk task failed: {}", e)))
    }

    fn lock_focus(&self) -> std::sync::MutexGuard<'_, FocusSet> {
        self.focus.lock().unwrap_or_else(|p| p.into_inner())
    }
}

/// Render extension counts per directory, then a flat grouped-by-directory
/// listing capped at [`TREE_LISTING_CAP`] entries.
fn render_file_tree(root: &Path, files: &[PathBuf]) -> String {
    let mut by_dir: BTreeMap<String, Vec<String>> = BTreeMap::new();
    let mut ext_counts: BTreeMap<String, BTreeMap<String, usize>> = BTreeMap::new();

    for path in files {
        let relative = path.strip_prefix(root).unwrap_or(path);
        let dir = relative
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(|p| p.to_string_lossy().to_string())
            .unwrap_or_else(|| ".".to_string());
        let name = relative
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let ext = relative
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_else(|| "(none)".to_string());

        *ext_counts.entry(dir.clone()).or_default().entry(ext).or_insert(0) += 1;
        by_dir.entry(dir).or_default().push(name);
    }

    let mut out = String::from("## Project structure\n");
    for (dir, counts) in &ext_counts {
        let summary: Vec<String> = counts.iter().map(|(ext, n)| format!("{} {}", n, ext)).collect();
        out.push_str(&format!("- {}: {}\n", dir, summary.join(", ")));
    }

    out.push_str("\n## Files\n");
    let mut listed = 0usize;
    let total: usize = by_dir.values().map(|v| v.len()).sum();
    'outer: for (dir, names) in &by_dir {
        out.push_str(&format!("{}/\n", dir));
        for name in names {
            if listed >= TREE_LISTING_CAP {
                break 'outer;
            }
            out.push_str(&format!("  {}\n", name));
            listed += 1;
        }
    }
    if total > listed {
        out.push_str(&format!("({} more files not shown)\n", total - listed));
    }
    out
}
