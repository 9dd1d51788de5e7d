//! Core configuration - defaults with optional TOML overrides
//!
//! Configuration is stored in `~/.config/lathe/lathe.toml`

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

const CONFIG_FILE: &str = "lathe.toml";

/// Aggregate configuration for the core runtime
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    pub agent: AgentSettings,
    pub bus: BusSettings,
    pub context: ContextSettings,
    pub session: SessionSettings,
}

impl CoreConfig {
    /// Load configuration from a TOML file; a missing file yields defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .map_err(|e| CoreError::Config(format!("Failed to read {}: {}", path.display(), e)))?;
        toml::from_str(&content)
            .map_err(|e| CoreError::Config(format!("Failed to parse {}: {}", path.display(), e)))
    }

    /// Default config file location (`~/.config/lathe/lathe.toml`)
    pub fn default_path() -> PathBuf {
        directories::ProjectDirs::from("com", "ridgetopai", "lathe")
            .map(|dirs| dirs.config_dir().join(CONFIG_FILE))
            .unwrap_or_else(|| PathBuf::from(CONFIG_FILE))
    }
}

/// Agent loop parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentSettings {
    /// Maximum tokens requested per completion
    pub max_tokens: u32,
    /// Sampling temperature (0.0 - 2.0)
    pub temperature: f32,
    /// Execute tool batches concurrently instead of sequentially
    pub parallel_tools: bool,
    /// Model context window used for compression checks
    pub model_max_tokens: usize,
    /// Token that ends the outer loop (matched case-insensitively)
    pub terminal_token: String,
    /// Outer-loop iteration cap
    pub max_iterations: usize,
    /// Messages digested into the synthesized follow-up turn
    pub recent_tail: usize,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            max_tokens: 4096,
            temperature: 0.7,
            parallel_tools: false,
            model_max_tokens: 200_000,
            terminal_token: "DONE".to_string(),
            max_iterations: 10,
            recent_tail: 5,
        }
    }
}

/// Event bus parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BusSettings {
    /// Queue capacity; publishes beyond this return back-pressure
    pub capacity: usize,
    /// Per-event handler deadline in milliseconds
    pub handler_timeout_ms: u64,
    /// Retries after a failed handler delivery
    pub max_retries: u32,
    /// Base delay for linear retry back-off in milliseconds
    pub retry_delay_ms: u64,
}

impl Default for BusSettings {
    fn default() -> Self {
        Self {
            capacity: 1000,
            handler_timeout_ms: 5000,
            max_retries: 3,
            retry_delay_ms: 100,
        }
    }
}

impl BusSettings {
    pub fn handler_timeout(&self) -> Duration {
        Duration::from_millis(self.handler_timeout_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

/// Context manager parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextSettings {
    /// Token budget for the assembled project context
    pub token_budget: usize,
    /// Focus-set capacity
    pub focus_capacity: usize,
    /// Directory walk depth ceiling
    pub max_walk_depth: usize,
    /// Directory walk file-count ceiling
    pub max_walk_files: usize,
    /// Usage fraction that triggers a warning
    pub warn_threshold: f32,
    /// Usage fraction that triggers compression
    pub compress_threshold: f32,
}

impl Default for ContextSettings {
    fn default() -> Self {
        Self {
            token_budget: 8000,
            focus_capacity: 20,
            max_walk_depth: 12,
            max_walk_files: 10_000,
            warn_threshold: 0.70,
            compress_threshold: 0.85,
        }
    }
}

/// Session manager parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// Live session cap
    pub max_sessions: usize,
    /// Auto-save interval in seconds
    pub autosave_interval_secs: u64,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            max_sessions: 16,
            autosave_interval_secs: 30,
        }
    }
}

impl SessionSettings {
    pub fn autosave_interval(&self) -> Duration {
        Duration::from_secs(self.autosave_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn test_defaults() {
        let config = CoreConfig::default();
        assert_eq!(config.bus.capacity, 1000);
        assert_eq!(config.bus.max_retries, 3);
        assert_eq!(config.context.token_budget, 8000);
        assert_eq!(config.context.focus_capacity, 20);
        assert_eq!(config.agent.terminal_token, "DONE");
        assert_eq!(config.session.autosave_interval_secs, 30);
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let config = CoreConfig::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.bus.capacity, 1000);
    }

    #[test]
    fn test_partial_override() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(
            &path,
            "[agent]\nparallel_tools = true\nmax_tokens = 2048\n\n[bus]\ncapacity = 2\n",
        )
        .unwrap();

        let config = CoreConfig::load(&path).unwrap();
        assert!(config.agent.parallel_tools);
        assert_eq!(config.agent.max_tokens, 2048);
        assert_eq!(config.bus.capacity, 2);
        // Untouched sections keep defaults
        assert_eq!(config.context.token_budget, 8000);
    }

    #[test]
    fn test_malformed_file_errors() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(&path, "[agent\nbroken").unwrap();
        assert!(matches!(CoreConfig::load(&path), Err(CoreError::Config(_))));
    }
}
