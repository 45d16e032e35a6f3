//! Configuration parsing and validation.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use crate::summary::{JsonSummaryExtractor, SummaryExtractor, SummaryFieldSpec};
use crate::{AppError, Result};

/// Where the file-backed configuration service keeps live documents.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct RemoteSection {
    /// Directory holding one `<target>.json` document per target.
    #[serde(default)]
    pub config_dir: Option<PathBuf>,
}

/// Top-level configuration loaded from TOML.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct AppConfig {
    /// Root directory of the snapshot blob store.
    pub store_dir: PathBuf,
    /// Restore history records kept per target.
    #[serde(default = "default_history_cap")]
    pub history_cap: usize,
    /// Snapshot retention window in days.
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
    /// Interval between passes of the periodic prune task.
    #[serde(default = "default_prune_interval_seconds")]
    pub prune_interval_seconds: u64,
    /// Bound on each remote fetch or apply call.
    #[serde(default = "default_remote_timeout_seconds")]
    pub remote_timeout_seconds: u64,
    /// Remote service location.
    #[serde(default)]
    pub remote: RemoteSection,
    /// Fields summarized for diff and validation; empty means every
    /// top-level member.
    #[serde(default)]
    pub summary_fields: Vec<SummaryFieldSpec>,
}

fn default_history_cap() -> usize {
    50
}

fn default_retention_days() -> u32 {
    30
}

fn default_prune_interval_seconds() -> u64 {
    3600
}

fn default_remote_timeout_seconds() -> u64 {
    30
}

impl AppConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// Relative directories are resolved against the file's parent.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read, contains
    /// invalid TOML, or fails validation.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        let mut config = Self::from_toml_str(&raw)?;
        if let Some(base) = path.parent() {
            config.resolve_relative_to(base);
        }
        Ok(config)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Remote call timeout as a [`Duration`].
    #[must_use]
    pub fn remote_timeout(&self) -> Duration {
        Duration::from_secs(self.remote_timeout_seconds)
    }

    /// Periodic prune interval as a [`Duration`].
    #[must_use]
    pub fn prune_interval(&self) -> Duration {
        Duration::from_secs(self.prune_interval_seconds)
    }

    /// Extractor built from `summary_fields`.
    #[must_use]
    pub fn summary_extractor(&self) -> Arc<dyn SummaryExtractor> {
        Arc::new(JsonSummaryExtractor::with_fields(self.summary_fields.clone()))
    }

    fn validate(&self) -> Result<()> {
        if self.store_dir.as_os_str().is_empty() {
            return Err(AppError::Config("store_dir must not be empty".into()));
        }
        if self.history_cap == 0 {
            return Err(AppError::Config(
                "history_cap must be greater than zero".into(),
            ));
        }
        if self.remote_timeout_seconds == 0 {
            return Err(AppError::Config(
                "remote_timeout_seconds must be greater than zero".into(),
            ));
        }
        if self.prune_interval_seconds == 0 {
            return Err(AppError::Config(
                "prune_interval_seconds must be greater than zero".into(),
            ));
        }

        let mut seen = std::collections::HashSet::new();
        for field in &self.summary_fields {
            if field.name.trim().is_empty() {
                return Err(AppError::Config("summary field name must not be empty".into()));
            }
            if !field.pointer.is_empty() && !field.pointer.starts_with('/') {
                return Err(AppError::Config(format!(
                    "summary field '{}' pointer must start with '/'",
                    field.name
                )));
            }
            if !seen.insert(field.name.as_str()) {
                return Err(AppError::Config(format!(
                    "summary field '{}' is declared twice",
                    field.name
                )));
            }
        }
        Ok(())
    }

    fn resolve_relative_to(&mut self, base: &Path) {
        if self.store_dir.is_relative() {
            self.store_dir = base.join(&self.store_dir);
        }
        if let Some(dir) = self.remote.config_dir.as_mut() {
            if dir.is_relative() {
                *dir = base.join(&*dir);
            }
        }
    }
}
