//! Runtime configuration for repository consumers.
//!
//! # Responsibility
//! - Describe database location, logging and paging defaults in one
//!   serde-deserializable struct.
//! - Build the storage backend and audit hook pipeline the settings imply.
//!
//! # Invariants
//! - Every field has a default; an empty JSON object is a valid config.
//! - `0 < default_page_size <= max_page_size` after `validate`.

use crate::logging::default_log_level;
use crate::repo::hooks::{FixedAuditor, HookPipeline, SystemClock};
use crate::storage::sqlite::SqliteBackend;
use crate::storage::StorageResult;
use serde::Deserialize;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(serde_json::Error),
    Invalid(String),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(err) => write!(f, "failed to read config: {err}"),
            Self::Parse(err) => write!(f, "failed to parse config: {err}"),
            Self::Invalid(message) => write!(f, "invalid config: {message}"),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            Self::Parse(err) => Some(err),
            Self::Invalid(_) => None,
        }
    }
}

impl From<std::io::Error> for ConfigError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(value: serde_json::Error) -> Self {
        Self::Parse(value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct RepoConfig {
    /// SQLite file. `None` opens an in-memory database.
    pub db_path: Option<PathBuf>,
    pub log_level: String,
    /// Absolute log directory. Logging stays off when unset.
    pub log_dir: Option<PathBuf>,
    /// Page size used when a caller does not ask for one.
    pub default_page_size: u32,
    /// Upper bound applied to caller-provided page sizes.
    pub max_page_size: u32,
    /// Clear the identity map after every bulk statement.
    pub clear_after_bulk: bool,
    /// Principal written to `created_by`/`updated_by`.
    pub auditor: String,
}

impl Default for RepoConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            log_level: default_log_level().to_string(),
            log_dir: None,
            default_page_size: 5,
            max_page_size: 2000,
            clear_after_bulk: false,
            auditor: "system".to_string(),
        }
    }
}

impl RepoConfig {
    pub fn from_json_str(raw: &str) -> ConfigResult<Self> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.default_page_size == 0 {
            return Err(ConfigError::Invalid(
                "default_page_size must be greater than zero".to_string(),
            ));
        }
        if self.default_page_size > self.max_page_size {
            return Err(ConfigError::Invalid(format!(
                "default_page_size {} exceeds max_page_size {}",
                self.default_page_size, self.max_page_size
            )));
        }
        if self.auditor.trim().is_empty() {
            return Err(ConfigError::Invalid("auditor cannot be empty".to_string()));
        }
        Ok(())
    }

    /// Opens the configured SQLite database with migrations applied.
    pub fn open_backend(&self) -> StorageResult<SqliteBackend> {
        match &self.db_path {
            Some(path) => SqliteBackend::open(path),
            None => SqliteBackend::open_in_memory(),
        }
    }

    /// Audit hooks stamping wall-clock times and the configured auditor.
    pub fn hook_pipeline(&self) -> HookPipeline {
        HookPipeline::with_auditing(SystemClock, FixedAuditor(self.auditor.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::{ConfigError, RepoConfig};
    use std::path::PathBuf;

    #[test]
    fn empty_object_yields_defaults() {
        let config = RepoConfig::from_json_str("{}").unwrap();
        assert_eq!(config, RepoConfig::default());
        assert_eq!(config.default_page_size, 5);
        assert_eq!(config.max_page_size, 2000);
        assert_eq!(config.auditor, "system");
    }

    #[test]
    fn partial_object_overrides_named_fields() {
        let config =
            RepoConfig::from_json_str(r#"{"db_path": "/tmp/repokit.db", "clear_after_bulk": true}"#)
                .unwrap();
        assert_eq!(config.db_path, Some(PathBuf::from("/tmp/repokit.db")));
        assert!(config.clear_after_bulk);
        assert_eq!(config.default_page_size, 5);
    }

    #[test]
    fn rejects_inconsistent_page_sizes() {
        let zero = RepoConfig::from_json_str(r#"{"default_page_size": 0}"#).unwrap_err();
        assert!(matches!(zero, ConfigError::Invalid(_)));

        let too_big =
            RepoConfig::from_json_str(r#"{"default_page_size": 50, "max_page_size": 10}"#)
                .unwrap_err();
        assert!(too_big.to_string().contains("exceeds max_page_size"));
    }

    #[test]
    fn rejects_unknown_fields() {
        let err = RepoConfig::from_json_str(r#"{"page_size": 3}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn reads_config_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("repokit.json");
        std::fs::write(&path, r#"{"auditor": "batch"}"#).unwrap();
        assert_eq!(RepoConfig::from_json_file(&path).unwrap().auditor, "batch");
    }
}
