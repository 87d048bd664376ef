//! Engine configuration structures.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::constants::{
    DEFAULT_CACHE_SIZE, DEFAULT_CHECKPOINT_SIZE, MAX_DOCUMENT_SIZE, MAX_TRANSACTION_SIZE,
};
use crate::error::{FolioError, FolioResult};

/// Main engine configuration.
///
/// # Example
///
/// ```rust
/// use folio_common::config::EngineConfig;
///
/// let config = EngineConfig::default();
/// assert_eq!(config.max_transaction_size, 10_000);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Path of the data file. `None` keeps both data and log in memory.
    /// The log lives next to it as `<stem>-log.<ext>`.
    pub filename: Option<PathBuf>,

    /// Number of page buffers held by the buffer pool.
    /// Default: 4096 (32 MB)
    pub cache_size: usize,

    /// Pages a transaction may hold in memory before a safepoint flushes
    /// them to the log.
    /// Default: 10000
    pub max_transaction_size: usize,

    /// Log size in pages that triggers an automatic checkpoint after a
    /// commit. 0 disables automatic checkpoints.
    /// Default: 1000
    pub checkpoint_size: usize,

    /// How long to wait for a lock before failing.
    /// Default: 60s
    #[serde(with = "humantime_serde")]
    pub lock_timeout: Duration,

    /// Largest encoded document accepted by inserts and updates.
    /// Default: 250 full data pages
    pub max_document_size: usize,

    /// Wait for the log writer to sync before a commit returns.
    /// Default: false
    pub sync_on_commit: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            filename: None,
            cache_size: DEFAULT_CACHE_SIZE,
            max_transaction_size: MAX_TRANSACTION_SIZE,
            checkpoint_size: DEFAULT_CHECKPOINT_SIZE,
            lock_timeout: Duration::from_secs(60),
            max_document_size: MAX_DOCUMENT_SIZE,
            sync_on_commit: false,
        }
    }
}

impl EngineConfig {
    /// Creates a configuration for the given data file.
    #[must_use]
    pub fn with_filename(filename: impl Into<PathBuf>) -> Self {
        Self {
            filename: Some(filename.into()),
            ..Default::default()
        }
    }

    /// Creates an in-memory configuration.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Creates a small configuration for testing.
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            cache_size: 256,
            lock_timeout: Duration::from_secs(5),
            ..Default::default()
        }
    }

    /// Sets the buffer pool size in pages.
    #[must_use]
    pub fn with_cache_size(mut self, pages: usize) -> Self {
        self.cache_size = pages;
        self
    }

    /// Sets the safepoint ceiling in pages.
    #[must_use]
    pub fn with_max_transaction_size(mut self, pages: usize) -> Self {
        self.max_transaction_size = pages;
        self
    }

    /// Sets the automatic checkpoint threshold in log pages.
    #[must_use]
    pub fn with_checkpoint_size(mut self, pages: usize) -> Self {
        self.checkpoint_size = pages;
        self
    }

    /// Sets the lock timeout.
    #[must_use]
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Sets the maximum document size.
    #[must_use]
    pub fn with_max_document_size(mut self, size: usize) -> Self {
        self.max_document_size = size;
        self
    }

    /// Sets whether commits wait for the log to sync.
    #[must_use]
    pub fn with_sync_on_commit(mut self, sync: bool) -> Self {
        self.sync_on_commit = sync;
        self
    }

    /// Path of the log file that belongs to `filename`.
    #[must_use]
    pub fn log_filename(&self) -> Option<PathBuf> {
        self.filename.as_deref().map(log_path_for)
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`FolioError::InvalidConfig`] describing the first problem.
    pub fn validate(&self) -> FolioResult<()> {
        let invalid = |message: &str| {
            Err(FolioError::InvalidConfig {
                message: message.to_string(),
            })
        };

        if self.cache_size < 16 {
            return invalid("cache_size must be at least 16 pages");
        }

        if self.max_transaction_size < 10 {
            return invalid("max_transaction_size must be at least 10 pages");
        }

        if self.max_document_size == 0 || self.max_document_size > MAX_DOCUMENT_SIZE {
            return invalid("max_document_size must be between 1 and 250 full pages");
        }

        if self.lock_timeout.is_zero() {
            return invalid("lock_timeout must be greater than zero");
        }

        Ok(())
    }
}

/// Builds `<stem>-log.<ext>` next to the data file.
fn log_path_for(path: &Path) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match path.extension() {
        Some(ext) => format!("{stem}-log.{}", ext.to_string_lossy()),
        None => format!("{stem}-log"),
    };
    path.with_file_name(name)
}

/// Serde helper for Duration using humantime format.
mod humantime_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let s = humantime::format_duration(*duration).to_string();
        s.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert!(config.filename.is_none());
        assert_eq!(config.checkpoint_size, 1000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let config = EngineConfig::default().with_cache_size(2);
        assert!(config.validate().is_err());

        let config = EngineConfig::default().with_max_document_size(MAX_DOCUMENT_SIZE + 1);
        assert!(config.validate().is_err());

        let config = EngineConfig::default().with_lock_timeout(Duration::ZERO);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_log_filename() {
        let config = EngineConfig::with_filename("/tmp/data/app.db");
        assert_eq!(
            config.log_filename(),
            Some(PathBuf::from("/tmp/data/app-log.db"))
        );

        let config = EngineConfig::with_filename("plain");
        assert_eq!(config.log_filename(), Some(PathBuf::from("plain-log")));
        assert!(EngineConfig::in_memory().log_filename().is_none());
    }

    #[test]
    fn test_serde_round_trip() {
        let config = EngineConfig::for_testing().with_checkpoint_size(0);
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("\"lock_timeout\":\"5s\""));

        let parsed: EngineConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.checkpoint_size, 0);
        assert_eq!(parsed.lock_timeout, Duration::from_secs(5));

        let partial: EngineConfig = serde_json::from_str(r#"{"cache_size": 64}"#).unwrap();
        assert_eq!(partial.cache_size, 64);
        assert_eq!(partial.max_transaction_size, MAX_TRANSACTION_SIZE);
    }
}
