//! Document loading from files, strings and HTTP URLs.
//!
//! JSON and YAML are both accepted. Files pick their syntax by extension;
//! anything else is sniffed from the content.

use std::path::Path;

use serde_json::Value;

use crate::error::PreprocessError;
use crate::model::Document;

#[cfg(feature = "remote")]
use std::time::Duration;

/// Default timeout for HTTP requests (10 seconds).
#[cfg(feature = "remote")]
const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Serialization syntax of a document source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Syntax {
    Json,
    Yaml,
}

impl Syntax {
    /// Guess from a file extension, `None` when it says nothing.
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()?.to_ascii_lowercase().as_str() {
            "json" => Some(Syntax::Json),
            "yaml" | "yml" => Some(Syntax::Yaml),
            _ => None,
        }
    }

    /// JSON documents start with `{`; everything else is read as YAML.
    pub fn sniff(content: &str) -> Self {
        if content.trim_start().starts_with('{') {
            Syntax::Json
        } else {
            Syntax::Yaml
        }
    }
}

/// Parse a document value in the given syntax.
///
/// # Errors
///
/// Returns `PreprocessError::InvalidJson` or `PreprocessError::InvalidYaml`.
pub fn parse_value(content: &str, syntax: Syntax) -> Result<Value, PreprocessError> {
    match syntax {
        Syntax::Json => {
            serde_json::from_str(content).map_err(|source| PreprocessError::InvalidJson { source })
        }
        Syntax::Yaml => {
            serde_yaml::from_str(content).map_err(|source| PreprocessError::InvalidYaml { source })
        }
    }
}

/// Load a document value from a file path.
///
/// # Errors
///
/// Returns `PreprocessError::FileNotFound` if the file doesn't exist, or a
/// parse error if the content isn't valid JSON/YAML.
pub fn load_value(path: &Path) -> Result<Value, PreprocessError> {
    if !path.exists() {
        return Err(PreprocessError::FileNotFound {
            path: path.to_path_buf(),
        });
    }

    let content = std::fs::read_to_string(path).map_err(|source| PreprocessError::ReadError {
        path: path.to_path_buf(),
        source,
    })?;

    let syntax = Syntax::from_path(path).unwrap_or_else(|| Syntax::sniff(&content));
    parse_value(&content, syntax)
}

/// Load and model a document from a file path.
pub fn load_document(path: &Path) -> Result<Document, PreprocessError> {
    Document::from_value(load_value(path)?)
}

/// Load and model a document from a JSON or YAML string.
pub fn load_document_str(content: &str) -> Result<Document, PreprocessError> {
    Document::from_value(parse_value(content, Syntax::sniff(content))?)
}

/// Load a document value from an HTTP/HTTPS URL.
///
/// Requires the `remote` feature (enabled by default).
///
/// # Errors
///
/// Returns `PreprocessError::NetworkError` if the request fails, or a parse
/// error if the body isn't valid JSON/YAML.
#[cfg(feature = "remote")]
pub fn load_value_url(url: &str) -> Result<Value, PreprocessError> {
    let network = |source| PreprocessError::NetworkError {
        url: url.to_string(),
        source,
    };

    let client = reqwest::blocking::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .build()
        .map_err(network)?;

    let response = client.get(url).send().map_err(network)?;

    // Check for HTTP errors before parsing
    let response = response.error_for_status().map_err(network)?;

    let content = response.text().map_err(network)?;
    let syntax = Syntax::from_path(Path::new(url)).unwrap_or_else(|| Syntax::sniff(&content));
    parse_value(&content, syntax)
}

/// Check if a string looks like a URL (starts with http:// or https://).
pub fn is_url(s: &str) -> bool {
    s.starts_with("http://") || s.starts_with("https://")
}

/// Load a document value from a file path or URL.
///
/// URL loading requires the `remote` feature.
pub fn load_value_auto(source: &str) -> Result<Value, PreprocessError> {
    if is_url(source) {
        #[cfg(feature = "remote")]
        {
            load_value_url(source)
        }
        #[cfg(not(feature = "remote"))]
        {
            Err(PreprocessError::FileNotFound {
                path: std::path::PathBuf::from(source),
            })
        }
    } else {
        load_value(Path::new(source))
    }
}

/// Load and model a document from a file path or URL.
pub fn load_document_auto(source: &str) -> Result<Document, PreprocessError> {
    Document::from_value(load_value_auto(source)?)
}
