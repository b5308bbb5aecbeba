//! # Design
//!
//! - Centralize application-level errors for bootstrap and orchestration.
//! - Keep error messages constant while carrying context fields for debugging.
//! - Preserve source errors without re-logging at call sites.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Result alias for application operations.
pub type AppResult<T> = Result<T, AppError>;

/// Application-level error type.
#[derive(Debug, Error)]
pub enum AppError {
    /// Environment configuration was missing.
    #[error("missing environment configuration")]
    MissingEnv {
        /// Name of the missing environment variable.
        name: &'static str,
    },
    /// Configuration operations failed.
    #[error("configuration operation failed")]
    Config {
        /// Operation identifier.
        operation: &'static str,
        /// Source configuration error.
        source: ratioguard_config::ConfigError,
    },
    /// Low-level data access operations failed.
    #[error("data access operation failed")]
    Data {
        /// Operation identifier.
        operation: &'static str,
        /// Source data error.
        source: ratioguard_data::DataError,
    },
    /// Telemetry operations failed.
    #[error("telemetry operation failed")]
    Telemetry {
        /// Operation identifier.
        operation: &'static str,
        /// Source telemetry error.
        source: ratioguard_telemetry::TelemetryError,
    },
    /// A pipeline or scheduling operation failed.
    #[error("pipeline operation failed")]
    Pipeline {
        /// Operation identifier.
        operation: &'static str,
        /// Source pipeline error.
        source: crate::pipeline::PipelineError,
    },
    /// IO operations failed.
    #[error("io operation failed")]
    Io {
        /// Operation identifier.
        operation: &'static str,
        /// Optional path involved in the failure.
        path: Option<PathBuf>,
        /// Source IO error.
        source: io::Error,
    },
    /// Configuration values were invalid.
    #[error("invalid configuration")]
    InvalidConfig {
        /// Field name that failed validation.
        field: &'static str,
        /// Machine-readable reason for the failure.
        reason: &'static str,
        /// Optional value associated with the failure.
        value: Option<String>,
    },
    /// Required dependency was missing.
    #[error("missing dependency")]
    MissingDependency {
        /// Name of the missing dependency.
        name: &'static str,
    },
    /// Another instance already holds the work directory's lock file.
    #[error("another instance is already running against this work directory")]
    AlreadyRunning {
        /// Path of the contended lock file.
        path: PathBuf,
    },
}

impl AppError {
    pub(crate) const fn config(
        operation: &'static str,
        source: ratioguard_config::ConfigError,
    ) -> Self {
        Self::Config { operation, source }
    }

    pub(crate) const fn data(
        operation: &'static str,
        source: ratioguard_data::DataError,
    ) -> Self {
        Self::Data { operation, source }
    }

    pub(crate) const fn telemetry(
        operation: &'static str,
        source: ratioguard_telemetry::TelemetryError,
    ) -> Self {
        Self::Telemetry { operation, source }
    }

    pub(crate) const fn pipeline(
        operation: &'static str,
        source: crate::pipeline::PipelineError,
    ) -> Self {
        Self::Pipeline { operation, source }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn app_error_helpers_build_variants() {
        let config = AppError::config(
            "load",
            ratioguard_config::ConfigError::NotFound {
                entity: "downloader",
                id: "qbit-1".to_string(),
            },
        );
        assert!(matches!(config, AppError::Config { .. }));

        let pipeline = AppError::pipeline("push", crate::pipeline::PipelineError::NoDownloader);
        assert!(matches!(pipeline, AppError::Pipeline { .. }));
    }
}
