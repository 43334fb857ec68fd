//! Validator-engine adapter over a preprocessed document.
//!
//! Every parameter, request-body and response schema is compiled once with
//! `jsonschema`, as a `$ref` into the serialized document (registered once as
//! a resource) so shared and cyclic schemas resolve the same way they do in
//! the document. Requests compile
//! against the request view of the document and responses against the
//! response view.

use std::collections::{HashMap, HashSet};

use indexmap::IndexMap;
use serde_json::Value;

use crate::error::{SchemaError, ValidateError, ValidationFailure};
use crate::index::RefIndex;
use crate::model::{DocPath, Document, HttpMethod, MediaType, SchemaId};
use crate::resolver::Resolver;
use crate::types::{Direction, Format, PreprocessOptions, RemoveAdditional, ValidateRequestOpts};

const BAD_REQUEST: u16 = 400;
const NOT_FOUND: u16 = 404;
const METHOD_NOT_ALLOWED: u16 = 405;
const UNSUPPORTED_MEDIA_TYPE: u16 = 415;
const INTERNAL_SERVER_ERROR: u16 = 500;

/// Upper bound on `$ref` hops and schema nesting followed while stripping.
const MAX_DEPTH: usize = 64;

/// Request body as handed over by the HTTP layer.
#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    /// Raw text; parsed as JSON when the media type is JSON.
    Text(String),
    Json(Value),
}

/// Framework-independent view of an inbound request.
#[derive(Debug, Clone, Default)]
pub struct RequestShape {
    /// Route pattern as written in `paths`, e.g. `/pets/{id}`.
    pub route: String,
    pub method: String,
    pub query: HashMap<String, String>,
    pub headers: HashMap<String, String>,
    pub body: Option<Body>,
    pub cookies: HashMap<String, String>,
    pub path_params: HashMap<String, String>,
}

impl RequestShape {
    pub fn new(route: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            route: route.into(),
            method: method.into(),
            ..Default::default()
        }
    }

    pub fn with_query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.insert(name.into(), value.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_cookie(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.cookies.insert(name.into(), value.into());
        self
    }

    pub fn with_path_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.path_params.insert(name.into(), value.into());
        self
    }

    pub fn with_body(mut self, body: Body) -> Self {
        self.body = Some(body);
        self
    }

    /// `content-type` header without parameters, matched case-insensitively.
    fn content_type(&self) -> Option<&str> {
        self.headers
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case("content-type"))
            .map(|(_, value)| value.split(';').next().unwrap_or(value).trim())
    }
}

struct CompiledParam {
    name: String,
    location: String,
    required: bool,
    schema: Option<jsonschema::Validator>,
}

struct CompiledContent {
    /// Pointer of the schema in the serialized document.
    pointer: Option<String>,
    schema: Option<jsonschema::Validator>,
}

struct CompiledBody {
    required: bool,
    content: IndexMap<String, CompiledContent>,
}

struct CompiledOperation {
    params: Vec<CompiledParam>,
    body: Option<CompiledBody>,
    responses: IndexMap<String, IndexMap<String, CompiledContent>>,
}

/// Compiled validators for every operation of a preprocessed document.
pub struct DocumentValidator {
    /// Request view of the document, used to strip undeclared properties.
    root: Value,
    operations: IndexMap<String, IndexMap<HttpMethod, CompiledOperation>>,
    options: ValidateRequestOpts,
}

impl DocumentValidator {
    /// Serialize `document` and compile its operation schemas.
    ///
    /// Items that no longer resolve (skipped during preprocessing) are left
    /// without a validator.
    ///
    /// # Errors
    ///
    /// Returns `ValidateError::InvalidSchema` when a schema does not compile,
    /// or a preprocessing error for malformed references.
    pub fn new(document: &Document, options: &PreprocessOptions) -> Result<Self, ValidateError> {
        let draft = draft_for(&document.openapi);
        let root = document.to_value_for(Direction::Request);
        let compiler = Compiler::new(root.clone(), &options.formats, draft);
        let response_compiler = Compiler::new(
            document.to_value_for(Direction::Response),
            &options.formats,
            draft,
        );
        let index = RefIndex::register(document);
        let resolver = Resolver::new(&index);

        let mut operations = IndexMap::new();
        for (route, item) in &document.paths {
            let Some(item) = resolver.resolve_path_item(document, item)? else {
                continue;
            };
            let mut methods = IndexMap::new();
            for (method, op) in &item.operations {
                let mut params = Vec::new();
                for param in op.parameters.iter().flatten() {
                    let Some(param) = resolver.resolve_parameter(document, param)? else {
                        continue;
                    };
                    params.push(CompiledParam {
                        required: param.is_required(),
                        schema: compiler.compile_slot(document, param.schema)?,
                        name: param.name,
                        location: param.location,
                    });
                }

                let body = match &op.request_body {
                    Some(body) => match resolver.resolve_request_body(document, body)? {
                        Some(body) => Some(CompiledBody {
                            required: body.required.unwrap_or(false),
                            content: compiler.compile_content(document, &body.content)?,
                        }),
                        None => None,
                    },
                    None => None,
                };

                let mut responses = IndexMap::new();
                for (status, response) in op.responses.iter().flatten() {
                    // Unresolvable responses were already reported by preprocessing.
                    let Ok(Some(response)) = resolver.resolve_response(document, response) else {
                        continue;
                    };
                    let content = match &response.content {
                        Some(content) => response_compiler.compile_content(document, content)?,
                        None => IndexMap::new(),
                    };
                    responses.insert(status.clone(), content);
                }

                methods.insert(
                    *method,
                    CompiledOperation {
                        params,
                        body,
                        responses,
                    },
                );
            }
            operations.insert(route.clone(), methods);
        }

        tracing::debug!(routes = operations.len(), "compiled document validators");
        Ok(Self {
            root,
            operations,
            options: options.validate_requests,
        })
    }

    /// Validate an inbound request against its operation.
    ///
    /// Takes the request by value since undeclared body properties may be
    /// stripped; the (possibly stripped) body is returned on success.
    ///
    /// # Errors
    ///
    /// `ValidateError::Invalid` with status 404/405 for an unknown route or
    /// method, 415 for an undeclared media type, 400 otherwise.
    pub fn validate_request(&self, request: RequestShape) -> Result<Option<Value>, ValidateError> {
        let op = self.find_request_operation(&request)?;
        let mut errors = Vec::new();

        for param in &op.params {
            let raw = match param.location.as_str() {
                "path" => request.path_params.get(&param.name),
                "query" => request.query.get(&param.name),
                "header" => request
                    .headers
                    .iter()
                    .find(|(name, _)| name.eq_ignore_ascii_case(&param.name))
                    .map(|(_, value)| value),
                "cookie" => request.cookies.get(&param.name),
                _ => continue,
            };
            check_param(param, raw, &mut errors);
        }

        if !self.options.allow_unknown_query_parameters {
            let declared: HashSet<&str> = op
                .params
                .iter()
                .filter(|p| p.location == "query")
                .map(|p| p.name.as_str())
                .collect();
            let mut unknown: Vec<&String> = request
                .query
                .keys()
                .filter(|name| !declared.contains(name.as_str()))
                .collect();
            unknown.sort();
            for name in unknown {
                errors.push(SchemaError {
                    path: format!("/query/{name}"),
                    message: "unknown query parameter".into(),
                });
            }
        }

        let content_type = request.content_type().map(str::to_string);
        let body = match (&op.body, request.body) {
            (Some(declared), Some(body)) => {
                let media_type = content_type.as_deref().unwrap_or("application/json");
                let Some((matched, content)) = match_media_type(&declared.content, media_type) else {
                    return Err(ValidateError::Invalid(ValidationFailure::single(
                        UNSUPPORTED_MEDIA_TYPE,
                        "/headers/content-type",
                        format!("unsupported media type {media_type}"),
                    )));
                };
                match decode_body(body, matched) {
                    Ok(mut value) => {
                        self.strip(content, &mut value);
                        validate_instance(content.schema.as_ref(), &value, "/body", &mut errors);
                        Some(value)
                    }
                    Err(message) => {
                        errors.push(SchemaError {
                            path: "/body".into(),
                            message,
                        });
                        None
                    }
                }
            }
            (Some(declared), None) => {
                if declared.required {
                    errors.push(SchemaError {
                        path: "/body".into(),
                        message: "request body is required".into(),
                    });
                }
                None
            }
            (None, body) => body.map(|b| match b {
                Body::Json(value) => value,
                Body::Text(text) => Value::String(text),
            }),
        };

        if errors.is_empty() {
            Ok(body)
        } else {
            Err(ValidateError::Invalid(ValidationFailure::new(BAD_REQUEST, errors)))
        }
    }

    /// Validate a response body for `status`, falling back to the `NXX`
    /// range and then `default`. Without `media_type` the first declared
    /// media type is used.
    ///
    /// # Errors
    ///
    /// `ValidateError::UnknownOperation` when route or method is not declared;
    /// `ValidateError::Invalid` with status 500 otherwise.
    pub fn validate_response(
        &self,
        route: &str,
        method: &str,
        status: &str,
        media_type: Option<&str>,
        body: &Value,
    ) -> Result<(), ValidateError> {
        let op = HttpMethod::parse(method)
            .and_then(|m| self.operations.get(route)?.get(&m))
            .ok_or_else(|| ValidateError::UnknownOperation {
                route: route.to_string(),
                method: method.to_string(),
            })?;

        let range = status.get(..1).map(|class| format!("{class}XX"));
        let content = op
            .responses
            .get(status)
            .or_else(|| op.responses.get(range.as_deref()?))
            .or_else(|| op.responses.get("default"))
            .ok_or_else(|| {
                ValidateError::Invalid(ValidationFailure::single(
                    INTERNAL_SERVER_ERROR,
                    "/status",
                    format!("no response declared for status {status}"),
                ))
            })?;

        let compiled = match media_type {
            Some(media_type) => match_media_type(content, media_type).map(|(_, c)| c),
            None => content.values().next(),
        };
        let Some(compiled) = compiled else {
            if content.is_empty() {
                return Ok(());
            }
            return Err(ValidateError::Invalid(ValidationFailure::single(
                INTERNAL_SERVER_ERROR,
                "/headers/content-type",
                format!("media type {} not declared", media_type.unwrap_or_default()),
            )));
        };

        let mut errors = Vec::new();
        validate_instance(compiled.schema.as_ref(), body, "/body", &mut errors);
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ValidateError::Invalid(ValidationFailure::new(
                INTERNAL_SERVER_ERROR,
                errors,
            )))
        }
    }

    fn find_request_operation(
        &self,
        request: &RequestShape,
    ) -> Result<&CompiledOperation, ValidateError> {
        let Some(methods) = self.operations.get(&request.route) else {
            return Err(ValidateError::Invalid(ValidationFailure::single(
                NOT_FOUND,
                "/route",
                format!("no route {}", request.route),
            )));
        };
        HttpMethod::parse(&request.method)
            .and_then(|m| methods.get(&m))
            .ok_or_else(|| {
                ValidateError::Invalid(ValidationFailure::single(
                    METHOD_NOT_ALLOWED,
                    "/method",
                    format!("method {} not allowed on {}", request.method, request.route),
                ))
            })
    }

    fn strip(&self, content: &CompiledContent, value: &mut Value) {
        let mode = self.options.remove_additional;
        if mode == RemoveAdditional::Off {
            return;
        }
        if let Some(schema) = content
            .pointer
            .as_deref()
            .and_then(|p| lookup_pointer(&self.root, p))
        {
            strip_additional(value, schema, &self.root, mode, 0);
        }
    }
}

/// URI the serialized document is registered under while compiling.
const DOCUMENT_URI: &str = "urn:openapi-preprocess:document";

/// Compiles `$ref` stubs against one registered copy of the document.
struct Compiler {
    options: jsonschema::ValidationOptions,
}

impl Compiler {
    fn new(root: Value, formats: &[Format], draft: jsonschema::Draft) -> Self {
        let mut options = jsonschema::options();
        options
            .with_draft(draft)
            .should_validate_formats(true)
            .with_resource(DOCUMENT_URI, draft.create_resource(root));
        for format in formats {
            let check = format.clone();
            options.with_format(format.name.clone(), move |s: &str| check.is_valid(s));
        }
        Self { options }
    }

    fn compile(&self, pointer: &str) -> Result<jsonschema::Validator, ValidateError> {
        let stub = serde_json::json!({ "$ref": format!("{DOCUMENT_URI}{pointer}") });
        self.options
            .build(&stub)
            .map_err(|e| ValidateError::InvalidSchema {
                pointer: pointer.to_string(),
                message: e.to_string(),
            })
    }

    fn compile_slot(
        &self,
        document: &Document,
        schema: Option<SchemaId>,
    ) -> Result<Option<jsonschema::Validator>, ValidateError> {
        schema
            .map(|id| self.compile(document.schemas.home(id)))
            .transpose()
    }

    fn compile_content(
        &self,
        document: &Document,
        content: &IndexMap<String, MediaType>,
    ) -> Result<IndexMap<String, CompiledContent>, ValidateError> {
        let mut out = IndexMap::with_capacity(content.len());
        for (media_type, media) in content {
            let pointer = media.schema.map(|id| document.schemas.home(id).to_string());
            out.insert(
                media_type.clone(),
                CompiledContent {
                    schema: self.compile_slot(document, media.schema)?,
                    pointer,
                },
            );
        }
        Ok(out)
    }
}

/// OpenAPI 3.1 schemas are 2020-12; earlier versions are closest to draft 4.
fn draft_for(openapi: &str) -> jsonschema::Draft {
    if openapi.starts_with("3.0") || openapi.starts_with("2.") {
        jsonschema::Draft::Draft4
    } else {
        jsonschema::Draft::Draft202012
    }
}

/// Exact match, then `type/*`, then `*/*`.
fn match_media_type<'c, T>(
    content: &'c IndexMap<String, T>,
    media_type: &str,
) -> Option<(&'c str, &'c T)> {
    let wildcard = media_type
        .split('/')
        .next()
        .map(|main| format!("{main}/*"));
    [Some(media_type.to_string()), wildcard, Some("*/*".to_string())]
        .into_iter()
        .flatten()
        .find_map(|key| content.get_key_value(key.as_str()))
        .map(|(key, value)| (key.as_str(), value))
}

fn decode_body(body: Body, media_type: &str) -> Result<Value, String> {
    match body {
        Body::Json(value) => Ok(value),
        Body::Text(text) if media_type.contains("json") => {
            serde_json::from_str(&text).map_err(|e| format!("invalid JSON: {e}"))
        }
        Body::Text(text) => Ok(Value::String(text)),
    }
}

fn check_param(param: &CompiledParam, raw: Option<&String>, errors: &mut Vec<SchemaError>) {
    let prefix = match param.location.as_str() {
        "path" => "/path",
        "query" => "/query",
        "header" => "/headers",
        _ => "/cookies",
    };
    let path = format!("{prefix}/{}", param.name);

    let Some(raw) = raw else {
        if param.required {
            errors.push(SchemaError {
                path,
                message: format!("missing required {} parameter", param.location),
            });
        }
        return;
    };
    let Some(schema) = &param.schema else {
        return;
    };

    // Parameters arrive as strings; numbers and booleans are also tried parsed.
    let text = Value::String(raw.clone());
    if schema.is_valid(&text) {
        return;
    }
    if let Ok(parsed) = serde_json::from_str::<Value>(raw) {
        if !parsed.is_string() && schema.is_valid(&parsed) {
            return;
        }
    }
    validate_instance(Some(schema), &text, &path, errors);
}

fn validate_instance(
    schema: Option<&jsonschema::Validator>,
    instance: &Value,
    prefix: &str,
    errors: &mut Vec<SchemaError>,
) {
    let Some(schema) = schema else {
        return;
    };
    errors.extend(schema.iter_errors(instance).map(|e| SchemaError {
        path: format!("{prefix}{}", e.instance_path),
        message: e.to_string(),
    }));
}

fn lookup_pointer<'v>(root: &'v Value, reference: &str) -> Option<&'v Value> {
    let path = DocPath::from_reference(reference).ok()?;
    path.segments()
        .iter()
        .try_fold(root, |node, segment| match node {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?),
            _ => None,
        })
}

fn deref<'v>(root: &'v Value, mut schema: &'v Value) -> Option<&'v Value> {
    for _ in 0..MAX_DEPTH {
        match schema.get("$ref").and_then(Value::as_str) {
            Some(reference) => schema = lookup_pointer(root, reference)?,
            None => return Some(schema),
        }
    }
    None
}

/// Gather `properties` of `schema` and its `allOf` members. Returns whether
/// `schema` itself forbids additional properties.
fn collect_properties<'v>(
    root: &'v Value,
    schema: &'v Value,
    declared: &mut HashMap<&'v str, &'v Value>,
    depth: usize,
) -> bool {
    if let Some(properties) = schema.get("properties").and_then(Value::as_object) {
        for (name, property) in properties {
            declared.entry(name.as_str()).or_insert(property);
        }
    }
    if depth < MAX_DEPTH {
        for member in schema.get("allOf").and_then(Value::as_array).into_iter().flatten() {
            if let Some(member) = deref(root, member) {
                collect_properties(root, member, declared, depth + 1);
            }
        }
    }
    schema.get("additionalProperties") == Some(&Value::Bool(false))
}

fn strip_additional(
    value: &mut Value,
    schema: &Value,
    root: &Value,
    mode: RemoveAdditional,
    depth: usize,
) {
    if depth > MAX_DEPTH {
        return;
    }
    let Some(schema) = deref(root, schema) else {
        return;
    };

    match value {
        Value::Object(map) => {
            let mut declared = HashMap::new();
            let closed = collect_properties(root, schema, &mut declared, 0);
            if declared.is_empty() && !closed {
                return;
            }
            let remove = match mode {
                RemoveAdditional::All => true,
                RemoveAdditional::Failing => closed,
                RemoveAdditional::Off => false,
            };
            if remove {
                map.retain(|name, _| declared.contains_key(name.as_str()));
            }
            for (name, child) in map.iter_mut() {
                if let Some(property) = declared.get(name.as_str()) {
                    strip_additional(child, property, root, mode, depth + 1);
                }
            }
        }
        Value::Array(items) => {
            if let Some(item_schema) = schema.get("items") {
                for item in items {
                    strip_additional(item, item_schema, root, mode, depth + 1);
                }
            }
        }
        _ => {}
    }
}
