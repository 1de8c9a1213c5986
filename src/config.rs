//! Provider configuration.
//!
//! Configuration arrives from the lifecycle layer as JSON:
//!
//! ```
//! use hemmer_provider_convergence::config::ProviderConfig;
//! use serde_json::json;
//! use std::time::Duration;
//!
//! let config = ProviderConfig::from_value(json!({
//!     "timeouts": { "create": 600 },
//!     "ignore_tag_key_prefixes": ["hemmer:"]
//! }))
//! .unwrap();
//!
//! assert_eq!(config.timeouts.create, Duration::from_secs(600));
//! assert_eq!(config.timeouts.delete, Duration::from_secs(300));
//! assert!(config.is_reserved_tag("hemmer:owner"));
//! assert!(config.is_reserved_tag("aws:cloudformation:stack-id"));
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ProviderError;
use crate::tags::{ReservedPrefixes, AWS_RESERVED_PREFIX};

/// Default time budget for each lifecycle wait.
pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Per-operation time budgets, given in seconds in JSON.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Timeouts {
    /// Budget for waiting after create.
    #[serde(with = "duration_secs")]
    pub create: Duration,
    /// Budget for waiting after update.
    #[serde(with = "duration_secs")]
    pub update: Duration,
    /// Budget for waiting after delete.
    #[serde(with = "duration_secs")]
    pub delete: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            create: DEFAULT_OPERATION_TIMEOUT,
            update: DEFAULT_OPERATION_TIMEOUT,
            delete: DEFAULT_OPERATION_TIMEOUT,
        }
    }
}

impl Timeouts {
    /// Create timeouts with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the create timeout.
    pub fn with_create(mut self, timeout: Duration) -> Self {
        self.create = timeout;
        self
    }

    /// Set the update timeout.
    pub fn with_update(mut self, timeout: Duration) -> Self {
        self.update = timeout;
        self
    }

    /// Set the delete timeout.
    pub fn with_delete(mut self, timeout: Duration) -> Self {
        self.delete = timeout;
        self
    }
}

/// Settings shared by every resource of the provider.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Wait budgets.
    pub timeouts: Timeouts,
    /// Extra tag key prefixes treated as reserved, on top of `aws:`.
    pub ignore_tag_key_prefixes: Vec<String>,
}

impl ProviderConfig {
    /// Decode the provider configuration. `null` yields the defaults.
    pub fn from_value(value: serde_json::Value) -> Result<Self, ProviderError> {
        if value.is_null() {
            return Ok(Self::default());
        }
        serde_json::from_value(value)
            .map_err(|e| ProviderError::Configuration(format!("invalid provider configuration: {}", e)))
    }

    /// The reserved-key predicate for tag reconciliation.
    pub fn reserved_prefixes(&self) -> ReservedPrefixes {
        ReservedPrefixes::new(
            std::iter::once(AWS_RESERVED_PREFIX.to_string())
                .chain(self.ignore_tag_key_prefixes.iter().cloned()),
        )
    }

    /// Returns true if `key` must be left out of tag diffs.
    pub fn is_reserved_tag(&self, key: &str) -> bool {
        self.reserved_prefixes().matches(key)
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}
