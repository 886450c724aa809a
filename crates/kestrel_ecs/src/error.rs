//! # ECS Error Types
//!
//! Component, tag and query operations never fail: lookups that miss return
//! `None` or `false`. Errors only come from the fallible edges of the crate,
//! which today means loading engine configuration.

use thiserror::Error;

/// Errors that can occur while setting up an engine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KestrelError {
    /// The configuration file could not be read.
    #[error("failed to read configuration {path}: {reason}")]
    ConfigRead {
        /// Path that was opened.
        path: String,
        /// Underlying I/O error message.
        reason: String,
    },

    /// The configuration text is not valid TOML for [`EngineConfig`](crate::EngineConfig).
    #[error("failed to parse configuration: {0}")]
    ConfigParse(String),

    /// The configuration parsed but holds values the engine cannot use.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Result type for fallible ECS operations.
pub type KestrelResult<T> = Result<T, KestrelError>;
