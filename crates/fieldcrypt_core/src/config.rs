//! Global engine configuration.

use crate::error::{CoreError, CoreResult};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// Configuration shared by the processor, state manager and queue runner.
pub type SharedConfig = Arc<RwLock<Config>>;

/// Global fieldcrypt settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Profile used to seal every blob. Empty means not configured.
    pub encryption_profile: String,

    /// Maximum number of queue items processed per batch call.
    pub batch_size: usize,

    /// Exclude records of encrypted types from render and persistent caches.
    pub make_entities_uncacheable: bool,

    /// Properties pre-selected when a field of a given type is first
    /// marked encrypted, keyed by field type.
    pub default_properties: BTreeMap<String, Vec<String>>,

    /// Seconds a claimed queue item stays invisible to other workers.
    pub claim_lease_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            encryption_profile: String::new(),
            batch_size: 5,
            make_entities_uncacheable: true,
            default_properties: BTreeMap::new(),
            claim_lease_secs: 30,
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the default encryption profile.
    #[must_use]
    pub fn encryption_profile(mut self, profile: impl Into<String>) -> Self {
        self.encryption_profile = profile.into();
        self
    }

    /// Sets the reconciliation batch size.
    #[must_use]
    pub const fn batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    /// Sets whether encrypted record types are excluded from caches.
    #[must_use]
    pub const fn make_entities_uncacheable(mut self, value: bool) -> Self {
        self.make_entities_uncacheable = value;
        self
    }

    /// Sets the default encrypted properties for a field type.
    #[must_use]
    pub fn default_properties_for(
        mut self,
        field_type: impl Into<String>,
        properties: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.default_properties.insert(
            field_type.into(),
            properties.into_iter().map(Into::into).collect(),
        );
        self
    }

    /// Sets the claim lease in seconds.
    #[must_use]
    pub const fn claim_lease_secs(mut self, secs: u64) -> Self {
        self.claim_lease_secs = secs;
        self
    }

    /// The default profile id, if one is configured.
    #[must_use]
    pub fn default_profile(&self) -> Option<&str> {
        if self.encryption_profile.is_empty() {
            None
        } else {
            Some(&self.encryption_profile)
        }
    }

    /// The claim lease as a duration.
    #[must_use]
    pub const fn claim_lease(&self) -> Duration {
        Duration::from_secs(self.claim_lease_secs)
    }

    /// Checks values that do not depend on other components.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidConfig`] for a zero batch size or lease.
    pub fn validate(&self) -> CoreResult<()> {
        if self.batch_size == 0 {
            return Err(CoreError::invalid_config("batch_size must be greater than 0"));
        }
        if self.claim_lease_secs == 0 {
            return Err(CoreError::invalid_config(
                "claim_lease_secs must be greater than 0",
            ));
        }
        Ok(())
    }

    /// Wraps the configuration for sharing.
    #[must_use]
    pub fn shared(self) -> SharedConfig {
        Arc::new(RwLock::new(self))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = Config::default();
        assert_eq!(config.default_profile(), None);
        assert_eq!(config.batch_size, 5);
        assert!(config.make_entities_uncacheable);
        assert_eq!(config.claim_lease(), Duration::from_secs(30));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn builder_pattern() {
        let config = Config::new()
            .encryption_profile("p1")
            .batch_size(20)
            .make_entities_uncacheable(false)
            .default_properties_for("text_with_summary", ["value", "summary"]);

        assert_eq!(config.default_profile(), Some("p1"));
        assert_eq!(config.batch_size, 20);
        assert!(!config.make_entities_uncacheable);
        assert_eq!(
            config.default_properties["text_with_summary"],
            vec!["value".to_string(), "summary".to_string()]
        );
    }

    #[test]
    fn zero_batch_size_rejected() {
        let err = Config::new().batch_size(0).validate().unwrap_err();
        assert!(matches!(err, CoreError::InvalidConfig { .. }));
    }

    #[test]
    fn missing_fields_take_defaults() {
        let bytes = fieldcrypt_codec::to_cbor(&BTreeMap::from([("batch_size", 9u64)])).unwrap();
        let config: Config = fieldcrypt_codec::from_cbor(&bytes).unwrap();
        assert_eq!(config.batch_size, 9);
        assert!(config.make_entities_uncacheable);
    }
}
