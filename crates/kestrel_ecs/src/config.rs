//! # Engine Configuration
//!
//! Tunables for [`Engine`](crate::Engine), loaded once at startup from TOML.
//!
//! ```toml
//! dispatch_priority = 1000000
//! entity_capacity = 4096
//! query_capacity = 64
//! ```
//!
//! Every field is optional; missing fields take their defaults.

use std::fs;
use std::path::Path;

use kestrel_signal::{Priority, DEFAULT_PRIORITY};
use serde::Deserialize;

use crate::error::{KestrelError, KestrelResult};

/// Priority the engine uses for its entity listeners unless configured.
pub const ENGINE_DISPATCH_PRIORITY: Priority = Priority::MAX;

/// Engine configuration.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Priority at which the engine listens to entity signals.
    ///
    /// Must be greater than [`DEFAULT_PRIORITY`] so listeners connected
    /// directly on an entity always observe a change before queries do.
    pub dispatch_priority: Priority,
    /// Initial capacity of the entity registry.
    pub entity_capacity: usize,
    /// Initial capacity of the query list.
    pub query_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            dispatch_priority: ENGINE_DISPATCH_PRIORITY,
            entity_capacity: 1024,
            query_capacity: 32,
        }
    }
}

impl EngineConfig {
    /// Parses and validates a configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`KestrelError::ConfigParse`] for malformed TOML or unknown
    /// keys, and [`KestrelError::InvalidConfig`] if validation fails.
    pub fn from_toml_str(text: &str) -> KestrelResult<Self> {
        let config: Self =
            toml::from_str(text).map_err(|e| KestrelError::ConfigParse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a configuration file.
    ///
    /// # Errors
    ///
    /// Returns [`KestrelError::ConfigRead`] if the file cannot be read, plus
    /// everything [`EngineConfig::from_toml_str`] can return.
    pub fn load(path: impl AsRef<Path>) -> KestrelResult<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| KestrelError::ConfigRead {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        let config = Self::from_toml_str(&text)?;
        tracing::info!(
            path = %path.display(),
            dispatch_priority = config.dispatch_priority,
            "loaded engine configuration"
        );
        Ok(config)
    }

    /// Checks that the configuration preserves listener ordering.
    ///
    /// # Errors
    ///
    /// Returns [`KestrelError::InvalidConfig`] if `dispatch_priority` would
    /// let the engine run before (or alongside) default-priority listeners.
    pub fn validate(&self) -> KestrelResult<()> {
        if self.dispatch_priority <= DEFAULT_PRIORITY {
            return Err(KestrelError::InvalidConfig(format!(
                "dispatch_priority must be greater than {DEFAULT_PRIORITY}, got {}",
                self.dispatch_priority
            )));
        }
        Ok(())
    }
}
