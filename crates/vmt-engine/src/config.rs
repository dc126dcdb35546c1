//! Engine configuration
//!
//! Loaded from TOML; every field has a default so an empty file is valid.
//!
//! ```toml
//! reference_policy = "expand"
//! upgrade_workers = 8
//!
//! [queue]
//! base_delay_ms = 5
//! max_delay_ms = 60000
//!
//! [cache]
//! max_capacity = 10000
//! ttl_secs = 30
//! ```

use crate::error::{EngineError, EngineResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// What to do with template references once they are resolved
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ReferencePolicy {
    /// Keep the references
    #[default]
    Reference,
    /// Inline the spec when no revision has been captured yet
    Expand,
    /// Always inline the spec
    ExpandAll,
}

/// Work queue backoff settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 5,
            max_delay_ms: 60_000,
        }
    }
}

impl QueueConfig {
    #[inline]
    #[must_use]
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    #[inline]
    #[must_use]
    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

/// Read-through cache settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub max_capacity: u64,
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_capacity: 10_000,
            ttl_secs: 30,
        }
    }
}

impl CacheConfig {
    #[inline]
    #[must_use]
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub reference_policy: ReferencePolicy,
    pub upgrade_workers: usize,
    pub queue: QueueConfig,
    pub cache: CacheConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            reference_policy: ReferencePolicy::default(),
            upgrade_workers: 4,
            queue: QueueConfig::default(),
            cache: CacheConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Builder: set reference policy
    #[must_use]
    pub fn with_reference_policy(mut self, policy: ReferencePolicy) -> Self {
        self.reference_policy = policy;
        self
    }

    /// Builder: set number of upgrade workers
    #[must_use]
    pub fn with_upgrade_workers(mut self, workers: usize) -> Self {
        self.upgrade_workers = workers;
        self
    }

    /// Builder: set queue backoff bounds
    #[must_use]
    pub fn with_queue_delays(mut self, base: Duration, max: Duration) -> Self {
        self.queue.base_delay_ms = u64::try_from(base.as_millis()).unwrap_or(u64::MAX);
        self.queue.max_delay_ms = u64::try_from(max.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Builder: set cache bounds
    #[must_use]
    pub fn with_cache(mut self, max_capacity: u64, ttl: Duration) -> Self {
        self.cache = CacheConfig {
            max_capacity,
            ttl_secs: ttl.as_secs(),
        };
        self
    }

    /// Parse and validate TOML text
    ///
    /// # Errors
    /// Returns [`EngineError::Config`] on malformed TOML or invalid values.
    pub fn from_toml_str(text: &str) -> EngineResult<Self> {
        let config: Self = toml::from_str(text).map_err(|e| EngineError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file
    ///
    /// # Errors
    /// Returns [`EngineError::Config`] if the file cannot be read or is invalid.
    pub fn load(path: impl AsRef<Path>) -> EngineResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    /// Check value ranges
    ///
    /// # Errors
    /// Returns [`EngineError::Config`] describing the first invalid field.
    pub fn validate(&self) -> EngineResult<()> {
        if self.upgrade_workers == 0 {
            return Err(EngineError::Config(
                "upgrade_workers must be at least 1".to_string(),
            ));
        }
        if self.queue.base_delay_ms > self.queue.max_delay_ms {
            return Err(EngineError::Config(format!(
                "queue.base_delay_ms ({}) exceeds queue.max_delay_ms ({})",
                self.queue.base_delay_ms, self.queue.max_delay_ms
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[test]
    fn empty_document_yields_defaults() {
        let config = EngineConfig::from_toml_str("").unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.upgrade_workers, 4);
        assert_eq!(config.queue.base_delay(), Duration::from_millis(5));
        assert_eq!(config.cache.ttl(), Duration::from_secs(30));
    }

    #[test]
    fn policy_uses_camel_case() {
        let config = EngineConfig::from_toml_str("reference_policy = \"expandAll\"").unwrap();
        assert_eq!(config.reference_policy, ReferencePolicy::ExpandAll);
        assert!(EngineConfig::from_toml_str("reference_policy = \"inline\"").is_err());
    }

    #[test]
    fn validation_rejects_bad_ranges() {
        assert!(EngineConfig::default()
            .with_upgrade_workers(0)
            .validate()
            .is_err());
        assert!(EngineConfig::default()
            .with_queue_delays(Duration::from_secs(2), Duration::from_secs(1))
            .validate()
            .is_err());
    }

    #[test]
    fn load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "upgrade_workers = 2\n[queue]\nbase_delay_ms = 10\n[cache]\nttl_secs = 5"
        )
        .unwrap();

        let config = EngineConfig::load(file.path()).unwrap();
        assert_eq!(config.upgrade_workers, 2);
        assert_eq!(config.queue.base_delay_ms, 10);
        assert_eq!(config.queue.max_delay_ms, 60_000);
        assert_eq!(config.cache.ttl_secs, 5);
        assert_eq!(config.cache.max_capacity, 10_000);
    }

    #[test]
    fn missing_file_is_a_config_error() {
        let err = EngineConfig::load("/nonexistent/vmt.toml").unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));
    }
}
