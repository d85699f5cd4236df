//! Error types for the rules-matrix service.
//!
//! This module defines one error type per concern:
//!
//! - [`ParseError`] - structurally invalid matrix CSV
//! - [`StoreError`] - matrix store queried before a successful load
//! - [`RegistryError`] - on-disk version registry failures
//! - [`LoaderError`] - bootstrap could not produce a matrix
//! - [`UploadError`] - upload rejected or could not be committed
//! - [`EvaluationError`] - a single evaluation request was rejected
//! - [`ConfigError`] - invalid environment configuration
//! - [`ServerError`] - top-level HTTP errors
//!
//! Error conversion is automatic via `From` implementations,
//! allowing `?` to work across error boundaries.

use std::path::PathBuf;

use serde_json::{json, Value};
use thiserror::Error;

// =============================================================================
// CSV Matrix Parsing Errors
// =============================================================================

/// Errors raised while turning a CSV buffer into a [`crate::models::Matrix`].
#[derive(Debug, Error)]
pub enum ParseError {
    /// The CSV reader rejected the input.
    #[error("Invalid CSV format: {0}")]
    Csv(#[from] csv::Error),

    /// Input contained no rows at all.
    #[error("Matrix CSV has no data.")]
    EmptyFile,

    /// Header row has no country columns from the third column onward.
    #[error("Matrix CSV has no country headers.")]
    NoCountryHeaders,

    /// Two header cells resolve to the same country key.
    #[error("Duplicate country header: {0}")]
    DuplicateCountry(String),

    /// No data row ever set a category.
    #[error("Matrix CSV has no categories.")]
    NoCategories,

    /// Every country cell was empty.
    #[error("Matrix CSV has no rule data.")]
    NoRuleData,
}

// =============================================================================
// Matrix Store Errors
// =============================================================================

/// Errors from the in-memory matrix store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Nothing has been installed yet.
    #[error("Matrix not loaded yet.")]
    NotLoaded,
}

// =============================================================================
// Version Registry Errors
// =============================================================================

/// Errors from the on-disk version registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// IO error.
    #[error("Registry IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Metadata could not be (de)serialized.
    #[error("Registry metadata error: {0}")]
    Json(#[from] serde_json::Error),

    /// Renaming a temporary file into place failed.
    #[error("Failed to persist {path}: {source}")]
    Persist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

// =============================================================================
// Bootstrap Errors
// =============================================================================

/// Errors from the startup matrix loader. All of them are fatal.
#[derive(Debug, Error)]
pub enum LoaderError {
    /// No active version, no default CSV and no CSV in the data directory.
    #[error("No matrix CSV found (searched: {})", .searched.join(", "))]
    NoMatrixSource { searched: Vec<String> },

    /// The selected file could not be read.
    #[error("Cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The selected file is not a valid matrix.
    #[error("Cannot parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: ParseError,
    },
}

// =============================================================================
// Upload Errors
// =============================================================================

/// Errors from the upload/activation workflow.
///
/// `Validation` never leaves partial state behind: neither the registry
/// nor the matrix store has been touched when it is returned.
#[derive(Debug, Error)]
pub enum UploadError {
    /// The upload was rejected before anything was committed.
    #[error("{message}")]
    Validation { message: String, details: Value },

    /// Registry failure while committing.
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Writing the temporary upload failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl UploadError {
    /// Only `.csv` uploads are accepted.
    pub fn bad_extension(original_name: &str) -> Self {
        UploadError::Validation {
            message: "Only .csv files are allowed.".to_string(),
            details: json!({ "originalName": original_name }),
        }
    }

    /// The candidate file failed to parse.
    pub fn invalid_csv(err: &ParseError) -> Self {
        UploadError::Validation {
            message: "CSV validation failed. Keeping previous active rules.".to_string(),
            details: json!({ "reason": err.to_string() }),
        }
    }

    /// Details payload for the caller, `null` for non-validation failures.
    pub fn details(&self) -> Value {
        match self {
            UploadError::Validation { details, .. } => details.clone(),
            _ => Value::Null,
        }
    }

    /// Underlying rejection reason, if any.
    pub fn reason(&self) -> Option<&str> {
        match self {
            UploadError::Validation { details, .. } => details.get("reason").and_then(Value::as_str),
            _ => None,
        }
    }
}

// =============================================================================
// Evaluation Errors
// =============================================================================

/// Errors that reject a single evaluation request.
#[derive(Debug, Error)]
pub enum EvaluationError {
    /// Country key absent from the current matrix.
    #[error("Unknown country key: {0}")]
    UnknownCountry(String),

    /// Matrix store is empty.
    #[error(transparent)]
    Store(#[from] StoreError),
}

// =============================================================================
// Configuration Errors
// =============================================================================

/// Errors while reading configuration from the environment.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A variable is set but cannot be parsed.
    #[error("Invalid value for {name}: '{value}'")]
    InvalidValue { name: &'static str, value: String },
}

// =============================================================================
// Server Errors
// =============================================================================

/// HTTP server errors.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Invalid request.
    #[error("{0}")]
    BadRequest(String),

    /// Evaluation rejected.
    #[error(transparent)]
    Evaluation(#[from] EvaluationError),

    /// Upload rejected or failed.
    #[error(transparent)]
    Upload(#[from] UploadError),

    /// Store not ready.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Registry failure.
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// Server internal error.
    #[error("Internal server error: {0}")]
    Internal(String),
}

// =============================================================================
// Result Type Aliases
// =============================================================================

/// Result type for matrix parsing.
pub type ParseResult<T> = Result<T, ParseError>;

/// Result type for registry operations.
pub type RegistryResult<T> = Result<T, RegistryError>;

/// Result type for bootstrap.
pub type LoaderResult<T> = Result<T, LoaderError>;

/// Result type for uploads.
pub type UploadResult<T> = Result<T, UploadError>;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;
