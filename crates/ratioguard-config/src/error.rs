//! Error types for configuration operations.

use thiserror::Error;

/// Primary error type for `ConfigStore` operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A field failed validation before any write was attempted.
    #[error("invalid configuration field `{field}`: {reason}")]
    Validation {
        /// Name of the offending field.
        field: &'static str,
        /// Human-readable reason the value was rejected.
        reason: String,
    },
    /// The referenced row does not exist.
    #[error("{entity} `{id}` not found")]
    NotFound {
        /// Kind of entity that was looked up (`site`, `downloader`, ...).
        entity: &'static str,
        /// Identifier that was searched for.
        id: String,
    },
    /// The write would violate a uniqueness constraint visible to the caller
    /// (duplicate site id, duplicate RSS URL within a site, ...).
    #[error("conflict: {0}")]
    Conflict(String),
    /// The underlying data access layer failed.
    #[error("data access failed")]
    DataAccess(#[from] ratioguard_data::DataError),
}

/// Convenience alias for configuration results.
pub type ConfigResult<T> = Result<T, ConfigError>;
