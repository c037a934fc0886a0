//! Error types for program planning

use aic_format::FormatError;
use thiserror::Error;

/// Result type alias for planning operations
pub type Result<T> = std::result::Result<T, PlanError>;

/// Errors that can occur while planning or packaging a program
#[derive(Debug, Error)]
pub enum PlanError {
    /// The configuration describes a program the hardware cannot run
    #[error("Invalid program configuration: {reason}")]
    Config {
        /// Reason for failure
        reason: String,
    },

    /// Configuration file is not valid JSON for the schema
    #[error("Failed to parse configuration: {source}")]
    Json {
        /// Underlying parser error
        #[from]
        source: serde_json::Error,
    },

    /// Start symbol could not be resolved in the device binary
    #[error("Cannot resolve entry point: {reason}")]
    EntryPoint {
        /// Reason for failure
        reason: String,
    },

    /// Artifact could not be built or read
    #[error("Artifact error: {source}")]
    Format {
        /// Underlying format error
        #[from]
        source: FormatError,
    },

    /// I/O error
    #[error("I/O error: {source}")]
    Io {
        /// Underlying I/O error
        #[from]
        source: std::io::Error,
    },
}

impl PlanError {
    /// Create a configuration error
    pub fn config(reason: impl Into<String>) -> Self {
        Self::Config {
            reason: reason.into(),
        }
    }

    /// Create an entry point error
    pub fn entry_point(reason: impl Into<String>) -> Self {
        Self::EntryPoint {
            reason: reason.into(),
        }
    }

    /// True for errors caused by the user's configuration.
    #[must_use]
    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config { .. } | Self::Json { .. })
    }
}
