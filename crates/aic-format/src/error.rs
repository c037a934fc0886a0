//! Error types for artifact encoding and decoding

use thiserror::Error;

/// Result type alias for artifact format operations
pub type Result<T> = std::result::Result<T, FormatError>;

/// Errors raised while building, encoding or reading artifacts
#[derive(Debug, Error)]
pub enum FormatError {
    /// Buffer failed structural or schema verification
    #[error("Malformed {what}: {reason}")]
    Malformed {
        /// Artifact being read
        what: &'static str,
        /// Reason for failure
        reason: String,
    },

    /// Magic bytes did not match
    #[error("Bad {what} magic")]
    BadMagic {
        /// Artifact being read
        what: &'static str,
    },

    /// Document written by an incompatible format revision
    #[error("Incompatible {what} version: found {found}, expected {expected}")]
    VersionMismatch {
        /// Artifact being read
        what: &'static str,
        /// Version found in the buffer
        found: u32,
        /// Version this reader understands
        expected: u32,
    },

    /// Document requires fields this reader does not know
    #[error("Unsupported required fields: {}", fields.join(", "))]
    UnsupportedFeatures {
        /// Field names the reader does not recognise
        fields: Vec<String>,
    },

    /// Introspection name outside the known-field list
    #[error("Unknown metadata field: {name}")]
    UnknownField {
        /// Offending name
        name: String,
    },

    /// Builder finalized before a mandatory field was set
    #[error("Incomplete document: {field} must be set")]
    IncompleteDocument {
        /// Missing field
        field: &'static str,
    },

    /// Entry rejected by a builder
    #[error("Invalid entry: {reason}")]
    InvalidEntry {
        /// Reason for failure
        reason: String,
    },

    /// Container lacks mandatory segments
    #[error("Missing container segments: {}", names.join(", "))]
    MissingSegments {
        /// Names of the absent segments
        names: Vec<String>,
    },

    /// I/O error
    #[error("I/O error: {source}")]
    Io {
        /// Underlying I/O error
        #[from]
        source: std::io::Error,
    },
}

impl FormatError {
    /// Create a malformed-buffer error
    pub fn malformed(what: &'static str, reason: impl Into<String>) -> Self {
        Self::Malformed {
            what,
            reason: reason.into(),
        }
    }

    /// Create an invalid-entry error
    pub fn invalid_entry(reason: impl Into<String>) -> Self {
        Self::InvalidEntry {
            reason: reason.into(),
        }
    }

    /// True when a reader refused a well-formed document it cannot run.
    ///
    /// These are the errors a runtime reports back instead of treating the
    /// artifact as corrupt.
    #[must_use]
    pub fn is_compatibility(&self) -> bool {
        matches!(
            self,
            Self::VersionMismatch { .. } | Self::UnsupportedFeatures { .. }
        )
    }
}
