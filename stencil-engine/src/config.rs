//! Engine tunables.
//!
//! Loaded from an optional YAML file, then overridden by `STENCIL_*`
//! environment variables. Every field has a default, so an empty file (or no
//! file at all) yields [`EngineConfig::default`].

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::hooks::condition::ConditionPolicy;

pub const DEFAULT_MAX_CACHE_SIZE: usize = 50;
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(2 * 60 * 60);
pub const DEFAULT_MAX_CONCURRENT_GENERATIONS: usize = 5;
pub const DEFAULT_TASK_TIMEOUT: Duration = Duration::from_secs(10 * 60);
pub const DEFAULT_HOOK_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_HISTORY_CAPACITY: usize = 1000;
pub const DEFAULT_PATTERN_WINDOW: Duration = Duration::from_secs(30 * 60);
pub const DEFAULT_SIMILARITY_THRESHOLD: f64 = 0.6;

/// Errors from loading [`EngineConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid value '{value}' for {var}")]
    InvalidEnv { var: &'static str, value: String },
}

/// Every engine knob, with the documented defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Template library root; the CLI falls back to `~/.stencil/templates`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template_root: Option<PathBuf>,
    pub max_cache_size: usize,
    pub cache_ttl_secs: u64,
    pub max_concurrent_generations: usize,
    pub task_timeout_secs: u64,
    /// Applied to declared script hooks that do not set `timeoutMs`.
    pub hook_timeout_ms: u64,
    pub history_capacity: usize,
    pub pattern_window_secs: u64,
    pub similarity_threshold: f64,
    /// Let the template-not-found strategy scaffold a bundle when the same
    /// missing name keeps coming back.
    pub auto_scaffold: bool,
    /// Retry a generation once when recovery produced an actionable fix.
    pub auto_retry: bool,
    pub unknown_condition: ConditionPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            template_root: None,
            max_cache_size: DEFAULT_MAX_CACHE_SIZE,
            cache_ttl_secs: DEFAULT_CACHE_TTL.as_secs(),
            max_concurrent_generations: DEFAULT_MAX_CONCURRENT_GENERATIONS,
            task_timeout_secs: DEFAULT_TASK_TIMEOUT.as_secs(),
            hook_timeout_ms: DEFAULT_HOOK_TIMEOUT.as_millis() as u64,
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            pattern_window_secs: DEFAULT_PATTERN_WINDOW.as_secs(),
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
            auto_scaffold: false,
            auto_retry: true,
            unknown_condition: ConditionPolicy::FailClosed,
        }
    }
}

impl EngineConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.task_timeout_secs)
    }

    pub fn hook_timeout(&self) -> Duration {
        Duration::from_millis(self.hook_timeout_ms)
    }

    pub fn pattern_window(&self) -> Duration {
        Duration::from_secs(self.pattern_window_secs)
    }

    /// Load from `path`; a missing file yields defaults.
    ///
    /// Returns `ConfigError::Parse` (with the file path) if the YAML is malformed.
    pub fn load_at(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Apply `STENCIL_*` overrides from the process environment.
    pub fn with_env_overrides(self) -> Result<Self, ConfigError> {
        self.with_overrides(|var| std::env::var(var).ok())
    }

    /// Apply overrides from an arbitrary lookup; tests pass a closure instead
    /// of mutating the process environment.
    pub fn with_overrides(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        fn parse<T: std::str::FromStr>(var: &'static str, value: String) -> Result<T, ConfigError> {
            value
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidEnv { var, value })
        }

        if let Some(v) = lookup("STENCIL_TEMPLATES") {
            self.template_root = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("STENCIL_MAX_CACHE_SIZE") {
            self.max_cache_size = parse("STENCIL_MAX_CACHE_SIZE", v)?;
        }
        if let Some(v) = lookup("STENCIL_MAX_CONCURRENT") {
            self.max_concurrent_generations = parse("STENCIL_MAX_CONCURRENT", v)?;
        }
        if let Some(v) = lookup("STENCIL_TASK_TIMEOUT_SECS") {
            self.task_timeout_secs = parse("STENCIL_TASK_TIMEOUT_SECS", v)?;
        }
        if let Some(v) = lookup("STENCIL_AUTO_SCAFFOLD") {
            self.auto_scaffold = parse("STENCIL_AUTO_SCAFFOLD", v)?;
        }
        Ok(self)
    }
}
