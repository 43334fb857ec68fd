//! Core types for schema preprocessing: traversal direction and the
//! configuration bundle handed in alongside the document.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Returns the JSON type name for error messages.
pub fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Direction a schema node is being prepared for.
///
/// Determines which rewrite rules apply to a visited node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Request,
    Response,
}

impl Direction {
    /// Both directions, in the order the visitor applies them.
    pub const BOTH: [Direction; 2] = [Direction::Request, Direction::Response];

    /// Create direction from a request flag (true = Request, false = Response).
    pub fn from_request_flag(is_request: bool) -> Self {
        if is_request {
            Direction::Request
        } else {
            Direction::Response
        }
    }
}

type SerializeFn = dyn Fn(&Value) -> Result<String, String> + Send + Sync;
type DeserializeFn = dyn Fn(&str) -> Result<Value, String> + Send + Sync;

/// Serializer/deserializer pair for a schema `format`.
///
/// Payloads using a registered format may arrive either as their wire-level
/// string or as the richer value produced by `deserialize`.
#[derive(Clone)]
pub struct SerDes {
    pub format: String,
    serialize: Option<Arc<SerializeFn>>,
    deserialize: Option<Arc<DeserializeFn>>,
}

impl SerDes {
    /// A format with neither direction attached. Still widens matching schemas.
    pub fn new(format: impl Into<String>) -> Self {
        Self {
            format: format.into(),
            serialize: None,
            deserialize: None,
        }
    }

    /// Build a serdes that converts in both directions.
    pub fn singleton<S, D>(format: impl Into<String>, serialize: S, deserialize: D) -> Self
    where
        S: Fn(&Value) -> Result<String, String> + Send + Sync + 'static,
        D: Fn(&str) -> Result<Value, String> + Send + Sync + 'static,
    {
        Self {
            format: format.into(),
            serialize: Some(Arc::new(serialize)),
            deserialize: Some(Arc::new(deserialize)),
        }
    }

    /// Convert an in-memory value to its wire string.
    ///
    /// Returns `None` when no serializer is attached.
    pub fn serialize(&self, value: &Value) -> Option<Result<String, String>> {
        self.serialize.as_ref().map(|f| f(value))
    }

    /// Convert a wire string to its in-memory value.
    ///
    /// Returns `None` when no deserializer is attached.
    pub fn deserialize(&self, raw: &str) -> Option<Result<Value, String>> {
        self.deserialize.as_ref().map(|f| f(raw))
    }
}

impl fmt::Debug for SerDes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SerDes")
            .field("format", &self.format)
            .field("serialize", &self.serialize.is_some())
            .field("deserialize", &self.deserialize.is_some())
            .finish()
    }
}

/// Registered serdes, keyed by `format`.
pub type SerDesMap = HashMap<String, SerDes>;

type FormatFn = dyn Fn(&str) -> bool + Send + Sync;

/// Custom string format validator registered with the validator engine.
#[derive(Clone)]
pub struct Format {
    pub name: String,
    validate: Arc<FormatFn>,
}

impl Format {
    pub fn new<F>(name: impl Into<String>, validate: F) -> Self
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            validate: Arc::new(validate),
        }
    }

    pub fn is_valid(&self, value: &str) -> bool {
        (self.validate)(value)
    }
}

impl fmt::Debug for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Format").field("name", &self.name).finish()
    }
}

/// How undeclared body properties are treated before validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoveAdditional {
    /// Leave the body untouched.
    #[default]
    Off,
    /// Strip every property not declared in `properties`.
    All,
    /// Strip undeclared properties only where `additionalProperties: false`.
    Failing,
}

/// Request validation switches.
#[derive(Debug, Clone, Copy, Default)]
pub struct ValidateRequestOpts {
    pub allow_unknown_query_parameters: bool,
    pub remove_additional: RemoveAdditional,
}

/// Configuration bundle supplied with the document.
#[derive(Debug, Clone, Default)]
pub struct PreprocessOptions {
    pub serdes: SerDesMap,
    pub formats: Vec<Format>,
    pub validate_requests: ValidateRequestOpts,
}

impl PreprocessOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a serdes under its format name, replacing any earlier entry.
    pub fn with_serdes(mut self, serdes: SerDes) -> Self {
        self.serdes.insert(serdes.format.clone(), serdes);
        self
    }

    pub fn with_format(mut self, format: Format) -> Self {
        self.formats.push(format);
        self
    }

    pub fn validate_requests(mut self, opts: ValidateRequestOpts) -> Self {
        self.validate_requests = opts;
        self
    }

    /// Whether `format` has a registered serdes.
    pub fn has_serdes(&self, format: &str) -> bool {
        self.serdes.contains_key(format)
    }
}
