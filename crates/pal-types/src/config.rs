use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::{Error, Result};

/// Core configuration. Every field has a default; a missing file or a
/// missing environment variable is never fatal.
///
/// Resolution order per field: explicit file value, then environment
/// variable, then built-in default.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PalConfig {
    /// Per-session context token budget (TOKEN_BUDGET).
    pub token_budget: u64,
    /// Usage ratio that flips attention to warning (WARN_THRESHOLD).
    pub warn_threshold: f64,
    /// Usage ratio that flips attention to critical (CRITICAL_THRESHOLD).
    pub critical_threshold: f64,
    /// Usage ratio that fires the auto-checkpoint (CHECKPOINT_THRESHOLD).
    pub checkpoint_threshold: f64,
    /// Drift added when an observe touches a file outside the loaded set.
    pub drift_increment: f64,
    /// Drift removed on each observe that does not broaden scope.
    pub drift_decay_per_event: f64,
    /// Weight of unseen files in the drift update.
    pub files_weight: f64,
    /// Weight of unseen conventions in the drift update.
    pub conventions_weight: f64,
    /// Running sessions older than this are swept (ZOMBIE_MAX_AGE_HOURS).
    pub zombie_max_age_hours: u64,
    /// Default handoff budget in tokens (HANDOFF_MAX_TOKENS).
    pub handoff_max_tokens: u32,
    /// Orchestrator worker pool size (WORKER_POOL_SIZE); 0 = number of CPUs.
    pub worker_pool_size: usize,
    /// How many trailing decision/port_end events feed an auto checkpoint.
    pub checkpoint_event_window: usize,
    /// Database location (DB_PATH); resolved against project root if unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub db_path: Option<PathBuf>,
    /// Project root (PROJECT_ROOT); defaults to the working directory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_root: Option<PathBuf>,
}

impl Default for PalConfig {
    fn default() -> Self {
        Self {
            token_budget: 40_000,
            warn_threshold: 0.80,
            critical_threshold: 0.95,
            checkpoint_threshold: 0.80,
            drift_increment: 0.15,
            drift_decay_per_event: 0.05,
            files_weight: 1.0,
            conventions_weight: 0.5,
            zombie_max_age_hours: 12,
            handoff_max_tokens: 2000,
            worker_pool_size: 0,
            checkpoint_event_window: 20,
            db_path: None,
            project_root: None,
        }
    }
}

impl PalConfig {
    /// Load from the default config file (if present) and apply environment
    /// overrides on top.
    pub fn load() -> Self {
        let mut config = Self::default_path()
            .and_then(|path| Self::load_from(&path).ok())
            .unwrap_or_default();
        config.apply_env();
        config
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::internal(format!("cannot read {}: {}", path.display(), e)))?;
        toml::from_str(&content)
            .map_err(|e| Error::invalid_argument(format!("bad config {}: {}", path.display(), e)))
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::internal(format!("cannot create {}: {}", parent.display(), e)))?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::internal(format!("cannot serialize config: {}", e)))?;
        std::fs::write(path, content)
            .map_err(|e| Error::internal(format!("cannot write {}: {}", path.display(), e)))?;
        Ok(())
    }

    pub fn default_path() -> Option<PathBuf> {
        Some(pal_home()?.join("config.toml"))
    }

    /// Overlay documented environment variables. Unparseable values are
    /// ignored, not fatal.
    pub fn apply_env(&mut self) {
        env_parse("TOKEN_BUDGET", &mut self.token_budget);
        env_parse("WARN_THRESHOLD", &mut self.warn_threshold);
        env_parse("CRITICAL_THRESHOLD", &mut self.critical_threshold);
        env_parse("CHECKPOINT_THRESHOLD", &mut self.checkpoint_threshold);
        env_parse("ZOMBIE_MAX_AGE_HOURS", &mut self.zombie_max_age_hours);
        env_parse("HANDOFF_MAX_TOKENS", &mut self.handoff_max_tokens);
        env_parse("WORKER_POOL_SIZE", &mut self.worker_pool_size);

        if let Ok(path) = std::env::var("DB_PATH") {
            self.db_path = Some(expand_tilde(&path));
        }
        if let Ok(root) = std::env::var("PROJECT_ROOT") {
            self.project_root = Some(expand_tilde(&root));
        }
    }

    /// Where the database lives: explicit DB_PATH, else
    /// `<project_root>/.pal/pal.db`, else `~/.pal/pal.db`.
    pub fn resolve_db_path(&self) -> PathBuf {
        if let Some(path) = &self.db_path {
            return path.clone();
        }
        if let Some(root) = &self.project_root {
            return root.join(".pal").join("pal.db");
        }
        pal_home()
            .unwrap_or_else(|| PathBuf::from(".pal"))
            .join("pal.db")
    }

    pub fn effective_worker_pool_size(&self) -> usize {
        if self.worker_pool_size > 0 {
            self.worker_pool_size
        } else {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4)
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str, slot: &mut T) {
    if let Ok(raw) = std::env::var(name) {
        if let Ok(value) = raw.parse() {
            *slot = value;
        }
    }
}

fn pal_home() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".pal"))
}

/// Expand a leading `~/` to the user's home directory.
fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = std::env::var_os("HOME") {
            return PathBuf::from(home).join(stripped);
        }
    }
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = PalConfig::default();
        assert_eq!(config.token_budget, 40_000);
        assert_eq!(config.warn_threshold, 0.80);
        assert_eq!(config.critical_threshold, 0.95);
        assert_eq!(config.handoff_max_tokens, 2000);
        assert_eq!(config.zombie_max_age_hours, 12);
    }

    #[test]
    fn test_save_and_load() -> Result<()> {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");

        let mut config = PalConfig::default();
        config.token_budget = 60_000;
        config.project_root = Some(PathBuf::from("/work/proj"));
        config.save_to(&config_path)?;

        let loaded = PalConfig::load_from(&config_path)?;
        assert_eq!(loaded.token_budget, 60_000);
        assert_eq!(loaded.project_root, Some(PathBuf::from("/work/proj")));
        Ok(())
    }

    #[test]
    fn test_load_nonexistent_returns_default() -> Result<()> {
        let temp_dir = TempDir::new().unwrap();
        let config = PalConfig::load_from(&temp_dir.path().join("missing.toml"))?;
        assert_eq!(config.token_budget, 40_000);
        Ok(())
    }

    #[test]
    fn test_db_path_resolution() {
        let mut config = PalConfig::default();
        config.project_root = Some(PathBuf::from("/work/proj"));
        assert_eq!(
            config.resolve_db_path(),
            PathBuf::from("/work/proj/.pal/pal.db")
        );

        config.db_path = Some(PathBuf::from("/tmp/alt.db"));
        assert_eq!(config.resolve_db_path(), PathBuf::from("/tmp/alt.db"));
    }
}
