//! Custom error types for bibrecon.
//!
//! Setup failures (unreadable inputs, bad configuration) surface as `Err`.
//! Per-record failures never abort a run; they are carried as
//! [`SkipReason`](crate::pipeline::SkipReason) values and only use the
//! record-scoped variants below when a caller wants a single record's outcome
//! as a `Result`.

use thiserror::Error;

/// Main error type for bibrecon operations.
#[derive(Debug, Error)]
pub enum ReconError {
    /// File I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// CSV read error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// MARCXML read/write error
    #[error("XML error: {0}")]
    Xml(String),

    /// TOML parse / deserialization error
    #[error("Config parse error: {0}")]
    ConfigParse(String),

    /// Config validation error (threshold out of range, empty correction set, ...)
    #[error("Config error: {0}")]
    Config(String),

    /// A secondary-source row could not be turned into a candidate
    #[error("Source record {row}: {message}")]
    SourceRecord {
        /// Row / array position in the export
        row: usize,
        /// What was wrong with it
        message: String,
    },

    /// No candidate met the threshold
    #[error("record {recid}: no matching candidate")]
    NoMatchFound {
        /// Authoritative record identifier
        recid: String,
    },

    /// Several candidates tied above the threshold
    #[error("record {recid}: {tied} candidates tied at similarity {score:.3}")]
    AmbiguousMatch {
        /// Authoritative record identifier
        recid: String,
        /// Number of tied candidates
        tied: usize,
        /// Shared similarity score
        score: f64,
    },

    /// A candidate value failed its plausibility check
    #[error("record {recid}: field {field} rejected: {reason}")]
    FieldValidationFailure {
        /// Authoritative record identifier
        recid: String,
        /// Logical field (or publication-info part) name
        field: String,
        /// Why the value was rejected
        reason: String,
    },

    /// A value cannot be serialized safely
    #[error("record {recid}: cannot encode {tag}: {reason}")]
    SchemaEncodingError {
        /// Authoritative record identifier
        recid: String,
        /// Output tag of the offending block
        tag: String,
        /// What made it unencodable
        reason: String,
    },
}

/// Result type alias using `ReconError`
pub type Result<T> = std::result::Result<T, ReconError>;

impl From<quick_xml::Error> for ReconError {
    fn from(err: quick_xml::Error) -> Self {
        ReconError::Xml(err.to_string())
    }
}

impl From<toml::de::Error> for ReconError {
    fn from(err: toml::de::Error) -> Self {
        ReconError::ConfigParse(err.to_string())
    }
}

/// Extension trait for adding context to Option types
pub trait OptionExt<T> {
    /// Convert Option to Result with an XML error message
    fn ok_or_xml(self, msg: &str) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_xml(self, msg: &str) -> Result<T> {
        self.ok_or_else(|| ReconError::Xml(msg.to_string()))
    }
}
