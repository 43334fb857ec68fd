//! Error types for document loading, preprocessing and validation.

use std::path::PathBuf;
use thiserror::Error;

/// Errors while loading or preprocessing a document.
///
/// All of these are fatal at document-load time.
#[derive(Debug, Error)]
pub enum PreprocessError {
    // IO errors (exit code 3)
    #[error("file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("cannot read {path}: {source}")]
    ReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[cfg(feature = "remote")]
    #[error("failed to fetch {url}: {source}")]
    NetworkError {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    // Parse errors (exit code 2)
    #[error("invalid JSON: {source}")]
    InvalidJson {
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid YAML: {source}")]
    InvalidYaml {
        #[source]
        source: serde_yaml::Error,
    },

    // Document errors (exit code 2)
    #[error("invalid document at {path}: {message}")]
    InvalidDocument { path: String, message: String },

    #[error("malformed reference \"{reference}\": {message}")]
    MalformedReference { reference: String, message: String },

    #[error("circular reference chain through \"{reference}\"")]
    CircularReference { reference: String },
}

impl PreprocessError {
    /// Returns the exit code for this error type.
    pub fn exit_code(&self) -> i32 {
        match self {
            PreprocessError::FileNotFound { .. } | PreprocessError::ReadError { .. } => 3,
            #[cfg(feature = "remote")]
            PreprocessError::NetworkError { .. } => 3,
            _ => 2,
        }
    }

    pub(crate) fn invalid(path: impl Into<String>, message: impl Into<String>) -> Self {
        PreprocessError::InvalidDocument {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Errors from the validator-engine adapter.
#[derive(Debug, Error)]
pub enum ValidateError {
    #[error(transparent)]
    Preprocess(#[from] PreprocessError),

    #[error("no operation {method} {route}")]
    UnknownOperation { route: String, method: String },

    #[error("invalid schema at {pointer}: {message}")]
    InvalidSchema { pointer: String, message: String },

    #[error("{0}")]
    Invalid(ValidationFailure),
}

impl ValidateError {
    /// Returns the exit code for this error type.
    pub fn exit_code(&self) -> i32 {
        match self {
            ValidateError::Preprocess(e) => e.exit_code(),
            ValidateError::UnknownOperation { .. } | ValidateError::InvalidSchema { .. } => 2,
            ValidateError::Invalid(_) => 1,
        }
    }
}

/// Structured validation failure: HTTP status plus path/message items.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ValidationFailure {
    pub status: u16,
    pub errors: Vec<SchemaError>,
}

impl ValidationFailure {
    pub fn new(status: u16, errors: Vec<SchemaError>) -> Self {
        Self { status, errors }
    }

    pub fn single(status: u16, path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status,
            errors: vec![SchemaError {
                path: path.into(),
                message: message.into(),
            }],
        }
    }
}

impl std::fmt::Display for ValidationFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "validation failed ({}) with {} error(s)",
            self.status,
            self.errors.len()
        )
    }
}

/// Single validation error with path context.
#[derive(Debug, Clone, serde::Serialize)]
pub struct SchemaError {
    /// Location of the offending value, e.g. `/body/name` or `/query/limit`.
    pub path: String,
    /// Human-readable error message.
    pub message: String,
}

impl std::fmt::Display for SchemaError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}
