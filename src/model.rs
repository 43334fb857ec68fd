//! Typed OpenAPI document model.
//!
//! Schemas live in a [`SchemaArena`] and are linked by [`SchemaId`], so a
//! schema shared through references (or reaching itself through a cycle) is a
//! single slot reached by several links. Everything the preprocessing pass
//! doesn't need to understand is kept verbatim in `extra` maps.

use std::collections::HashMap;
use std::fmt;

use indexmap::IndexMap;
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};
use serde_json::{Map, Value};

use crate::error::PreprocessError;
use crate::types::{json_type_name, Direction};

/// Characters escaped when a path is rendered as a URI fragment.
const FRAGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'[')
    .add(b'\\')
    .add(b']')
    .add(b'^')
    .add(b'`')
    .add(b'{')
    .add(b'|')
    .add(b'}');

/// Structural location of a node, as unescaped segments from the document root.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct DocPath(Vec<String>);

impl DocPath {
    pub fn root() -> Self {
        Self(Vec::new())
    }

    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(segments.into_iter().map(Into::into).collect())
    }

    /// Parse a local reference (`#/components/schemas/Pet`) into segments.
    ///
    /// Handles JSON Pointer escapes (`~0`, `~1`) and percent-encoding.
    ///
    /// # Errors
    ///
    /// Returns `PreprocessError::MalformedReference` for anything that is not a
    /// local pointer, or that contains invalid escapes.
    pub fn from_reference(reference: &str) -> Result<Self, PreprocessError> {
        let malformed = |message: &str| PreprocessError::MalformedReference {
            reference: reference.to_string(),
            message: message.to_string(),
        };

        let fragment = reference
            .strip_prefix('#')
            .ok_or_else(|| malformed("expected a local pointer starting with '#'"))?;
        if fragment.is_empty() {
            return Ok(Self::root());
        }
        let fragment = fragment
            .strip_prefix('/')
            .ok_or_else(|| malformed("pointer must start with '#/'"))?;
        let decoded = percent_decode_str(fragment)
            .decode_utf8()
            .map_err(|_| malformed("percent-encoding is not valid UTF-8"))?;

        let mut segments = Vec::new();
        for raw in decoded.split('/') {
            let mut segment = String::with_capacity(raw.len());
            let mut chars = raw.chars();
            while let Some(c) = chars.next() {
                if c != '~' {
                    segment.push(c);
                    continue;
                }
                match chars.next() {
                    Some('0') => segment.push('~'),
                    Some('1') => segment.push('/'),
                    _ => return Err(malformed("'~' must be followed by '0' or '1'")),
                }
            }
            segments.push(segment);
        }
        Ok(Self(segments))
    }

    pub fn child(&self, segment: impl Into<String>) -> Self {
        let mut path = self.clone();
        path.0.push(segment.into());
        path
    }

    pub fn join<I, S>(&self, segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut path = self.clone();
        path.0.extend(segments.into_iter().map(Into::into));
        path
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    pub fn last(&self) -> Option<&str> {
        self.0.last().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Render as a local reference, e.g. `#/paths/~1pets/get`.
    pub fn to_pointer(&self) -> String {
        let mut out = String::from("#");
        for segment in &self.0 {
            out.push('/');
            let escaped = segment.replace('~', "~0").replace('/', "~1");
            out.extend(utf8_percent_encode(&escaped, FRAGMENT));
        }
        out
    }
}

impl fmt::Display for DocPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_pointer())
    }
}

/// Stable handle to a schema slot in a [`SchemaArena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SchemaId(usize);

/// Declared `type` of a schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaType {
    Single(String),
    Multiple(Vec<String>),
}

impl SchemaType {
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) => Some(SchemaType::Single(s.clone())),
            Value::Array(arr) => arr
                .iter()
                .map(|v| v.as_str().map(String::from))
                .collect::<Option<Vec<_>>>()
                .map(SchemaType::Multiple),
            _ => None,
        }
    }

    fn to_value(&self) -> Value {
        match self {
            SchemaType::Single(s) => Value::String(s.clone()),
            SchemaType::Multiple(types) => {
                Value::Array(types.iter().cloned().map(Value::String).collect())
            }
        }
    }

    /// True only for a single declared type equal to `name`.
    pub fn is_exactly(&self, name: &str) -> bool {
        matches!(self, SchemaType::Single(s) if s == name)
    }
}

/// How a child schema hangs off its parent.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ChildLink {
    Property(String),
    AllOf(usize),
    OneOf(usize),
    AnyOf(usize),
    Items,
    AdditionalProperties,
    Not,
    /// Named entry under `$defs`, `definitions` or `patternProperties`.
    Keyed(String, String),
}

impl ChildLink {
    /// Path segments this link adds below the parent.
    pub fn segments(&self) -> Vec<String> {
        match self {
            ChildLink::Property(name) => vec!["properties".into(), name.clone()],
            ChildLink::AllOf(i) => vec!["allOf".into(), i.to_string()],
            ChildLink::OneOf(i) => vec!["oneOf".into(), i.to_string()],
            ChildLink::AnyOf(i) => vec!["anyOf".into(), i.to_string()],
            ChildLink::Items => vec!["items".into()],
            ChildLink::AdditionalProperties => vec!["additionalProperties".into()],
            ChildLink::Not => vec!["not".into()],
            ChildLink::Keyed(keyword, name) => vec![keyword.clone(), name.clone()],
        }
    }
}

/// A concrete (non-reference) schema node.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SchemaObject {
    pub schema_type: Option<SchemaType>,
    pub format: Option<String>,
    pub properties: Option<IndexMap<String, SchemaId>>,
    pub items: Option<SchemaId>,
    pub additional_properties: Option<SchemaId>,
    pub not: Option<SchemaId>,
    /// `$defs`, `definitions` and `patternProperties`, by keyword.
    pub subschemas: IndexMap<String, IndexMap<String, SchemaId>>,
    pub required: Option<Vec<String>>,
    pub all_of: Option<Vec<SchemaId>>,
    pub one_of: Option<Vec<SchemaId>>,
    pub any_of: Option<Vec<SchemaId>>,
    pub read_only: Option<bool>,
    pub write_only: Option<bool>,
    pub default: Option<Value>,
    /// Keywords not modelled above, kept as written.
    pub extra: Map<String, Value>,
}

impl SchemaObject {
    pub fn is_read_only(&self) -> bool {
        self.read_only.unwrap_or(false)
    }

    /// Children walked by the traverser, by keyword precedence:
    /// `allOf`, else `oneOf`, else `anyOf`, else `properties`.
    pub fn traversal_children(&self) -> Vec<(ChildLink, SchemaId)> {
        let indexed = |ids: &[SchemaId], link: fn(usize) -> ChildLink| -> Vec<(ChildLink, SchemaId)> {
            ids.iter()
                .enumerate()
                .map(|(i, id)| (link(i), *id))
                .collect()
        };

        if let Some(all_of) = &self.all_of {
            indexed(all_of, ChildLink::AllOf)
        } else if let Some(one_of) = &self.one_of {
            indexed(one_of, ChildLink::OneOf)
        } else if let Some(any_of) = &self.any_of {
            indexed(any_of, ChildLink::AnyOf)
        } else if let Some(properties) = &self.properties {
            properties
                .iter()
                .map(|(name, id)| (ChildLink::Property(name.clone()), *id))
                .collect()
        } else {
            Vec::new()
        }
    }

    pub fn child(&self, link: &ChildLink) -> Option<SchemaId> {
        match link {
            ChildLink::Property(name) => self.properties.as_ref()?.get(name).copied(),
            ChildLink::AllOf(i) => self.all_of.as_ref()?.get(*i).copied(),
            ChildLink::OneOf(i) => self.one_of.as_ref()?.get(*i).copied(),
            ChildLink::AnyOf(i) => self.any_of.as_ref()?.get(*i).copied(),
            ChildLink::Items => self.items,
            ChildLink::AdditionalProperties => self.additional_properties,
            ChildLink::Not => self.not,
            ChildLink::Keyed(keyword, name) => self.subschemas.get(keyword)?.get(name).copied(),
        }
    }

    pub fn child_mut(&mut self, link: &ChildLink) -> Option<&mut SchemaId> {
        match link {
            ChildLink::Property(name) => self.properties.as_mut()?.get_mut(name),
            ChildLink::AllOf(i) => self.all_of.as_mut()?.get_mut(*i),
            ChildLink::OneOf(i) => self.one_of.as_mut()?.get_mut(*i),
            ChildLink::AnyOf(i) => self.any_of.as_mut()?.get_mut(*i),
            ChildLink::Items => self.items.as_mut(),
            ChildLink::AdditionalProperties => self.additional_properties.as_mut(),
            ChildLink::Not => self.not.as_mut(),
            ChildLink::Keyed(keyword, name) => self.subschemas.get_mut(keyword)?.get_mut(name),
        }
    }
}

/// A `$ref` together with the keywords written beside it.
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaRef {
    pub reference: String,
    pub read_only: Option<bool>,
    /// Sibling keywords other than `readOnly`, kept as written.
    pub extra: Map<String, Value>,
}

impl SchemaRef {
    pub fn new(reference: impl Into<String>) -> Self {
        Self {
            reference: reference.into(),
            read_only: None,
            extra: Map::new(),
        }
    }

    pub fn has_siblings(&self) -> bool {
        self.read_only.is_some() || !self.extra.is_empty()
    }

    /// Render pointing at `reference`, siblings included.
    fn to_value(&self, reference: &str) -> Value {
        let mut map = Map::new();
        map.insert("$ref".into(), Value::String(reference.to_string()));
        for (key, value) in &self.extra {
            map.insert(key.clone(), value.clone());
        }
        if let Some(read_only) = self.read_only {
            map.insert("readOnly".into(), Value::Bool(read_only));
        }
        Value::Object(map)
    }
}

/// A schema slot: a symbolic reference, a concrete object, or a boolean schema.
#[derive(Debug, Clone, PartialEq)]
pub enum Schema {
    Reference(SchemaRef),
    Object(SchemaObject),
    Boolean(bool),
}

impl Schema {
    pub fn as_reference(&self) -> Option<&str> {
        self.as_schema_ref().map(|r| r.reference.as_str())
    }

    pub fn as_schema_ref(&self) -> Option<&SchemaRef> {
        match self {
            Schema::Reference(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&SchemaObject> {
        match self {
            Schema::Object(obj) => Some(obj),
            _ => None,
        }
    }

    pub fn as_object_mut(&mut self) -> Option<&mut SchemaObject> {
        match self {
            Schema::Object(obj) => Some(obj),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
struct Slot {
    schema: Schema,
    /// Pointer of the location the slot was parsed from.
    home: String,
}

/// Owner of every schema node in a document.
#[derive(Debug, Clone, Default)]
pub struct SchemaArena {
    slots: Vec<Slot>,
    /// References parsed with sibling keywords, by home pointer.
    wrappers: HashMap<String, SchemaId>,
}

impl SchemaArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, schema: Schema, home: &DocPath) -> SchemaId {
        let id = SchemaId(self.slots.len());
        let home = home.to_pointer();
        if schema.as_schema_ref().is_some_and(SchemaRef::has_siblings) {
            self.wrappers.insert(home.clone(), id);
        }
        self.slots.push(Slot { schema, home });
        id
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn get(&self, id: SchemaId) -> &Schema {
        &self.slots[id.0].schema
    }

    pub fn get_mut(&mut self, id: SchemaId) -> &mut Schema {
        &mut self.slots[id.0].schema
    }

    pub fn object(&self, id: SchemaId) -> Option<&SchemaObject> {
        self.get(id).as_object()
    }

    pub fn object_mut(&mut self, id: SchemaId) -> Option<&mut SchemaObject> {
        self.get_mut(id).as_object_mut()
    }

    /// Pointer of the location the slot was parsed from.
    pub fn home(&self, id: SchemaId) -> &str {
        &self.slots[id.0].home
    }

    /// Point `owner`'s `link` at `target`. Returns false if the link is absent.
    pub fn relink(&mut self, owner: SchemaId, link: &ChildLink, target: SchemaId) -> bool {
        match self.object_mut(owner).and_then(|obj| obj.child_mut(link)) {
            Some(slot) => {
                *slot = target;
                true
            }
            None => false,
        }
    }

    /// Parse a schema value found at `path` into the arena.
    pub fn parse(&mut self, value: &Value, path: &DocPath) -> Result<SchemaId, PreprocessError> {
        let map = match value {
            Value::Object(map) => map,
            Value::Bool(b) => return Ok(self.insert(Schema::Boolean(*b), path)),
            other => {
                return Err(PreprocessError::invalid(
                    path.to_pointer(),
                    format!("expected schema, got {}", json_type_name(other)),
                ))
            }
        };

        if let Some(reference) = map.get("$ref").and_then(Value::as_str) {
            let mut schema_ref = SchemaRef::new(reference);
            for (key, value) in map {
                match key.as_str() {
                    "$ref" => {}
                    "readOnly" if value.is_boolean() => schema_ref.read_only = value.as_bool(),
                    _ => {
                        schema_ref.extra.insert(key.clone(), value.clone());
                    }
                }
            }
            return Ok(self.insert(Schema::Reference(schema_ref), path));
        }

        let mut obj = SchemaObject::default();
        for (key, value) in map {
            match key.as_str() {
                "type" => match SchemaType::from_value(value) {
                    Some(t) => obj.schema_type = Some(t),
                    None => {
                        obj.extra.insert(key.clone(), value.clone());
                    }
                },
                "format" => match value.as_str() {
                    Some(f) => obj.format = Some(f.to_string()),
                    None => {
                        obj.extra.insert(key.clone(), value.clone());
                    }
                },
                "properties" => {
                    let props = value.as_object().ok_or_else(|| {
                        PreprocessError::invalid(
                            path.child("properties").to_pointer(),
                            "expected object",
                        )
                    })?;
                    let mut properties = IndexMap::with_capacity(props.len());
                    for (name, prop) in props {
                        let id = self.parse(prop, &path.join(["properties", name.as_str()]))?;
                        properties.insert(name.clone(), id);
                    }
                    obj.properties = Some(properties);
                }
                "items" if value.is_object() => {
                    obj.items = Some(self.parse(value, &path.child("items"))?);
                }
                "additionalProperties" | "not" if is_schema(value) => {
                    let id = self.parse(value, &path.child(key.as_str()))?;
                    if key == "not" {
                        obj.not = Some(id);
                    } else {
                        obj.additional_properties = Some(id);
                    }
                }
                "$defs" | "definitions" | "patternProperties" if is_schema_map(value) => {
                    let mut entries = IndexMap::new();
                    for (name, sub) in value.as_object().into_iter().flatten() {
                        let id = self.parse(sub, &path.join([key.as_str(), name.as_str()]))?;
                        entries.insert(name.clone(), id);
                    }
                    obj.subschemas.insert(key.clone(), entries);
                }
                "required" => {
                    let required = value
                        .as_array()
                        .and_then(|arr| {
                            arr.iter()
                                .map(|v| v.as_str().map(String::from))
                                .collect::<Option<Vec<_>>>()
                        })
                        .ok_or_else(|| {
                            PreprocessError::invalid(
                                path.child("required").to_pointer(),
                                "expected array of strings",
                            )
                        })?;
                    obj.required = Some(required);
                }
                "allOf" | "oneOf" | "anyOf" => {
                    let arr = value.as_array().ok_or_else(|| {
                        PreprocessError::invalid(path.child(key.as_str()).to_pointer(), "expected array")
                    })?;
                    let mut members = Vec::with_capacity(arr.len());
                    for (i, member) in arr.iter().enumerate() {
                        members.push(self.parse(member, &path.join([key.clone(), i.to_string()]))?);
                    }
                    match key.as_str() {
                        "allOf" => obj.all_of = Some(members),
                        "oneOf" => obj.one_of = Some(members),
                        _ => obj.any_of = Some(members),
                    }
                }
                "readOnly" if value.is_boolean() => obj.read_only = value.as_bool(),
                "writeOnly" if value.is_boolean() => obj.write_only = value.as_bool(),
                "default" => obj.default = Some(value.clone()),
                _ => {
                    obj.extra.insert(key.clone(), value.clone());
                }
            }
        }

        Ok(self.insert(Schema::Object(obj), path))
    }

    /// Serialize the schema linked at `at`.
    ///
    /// A slot is written in full only at its home location; anywhere else it
    /// becomes a `$ref` to its home, which keeps shared and cyclic graphs finite.
    /// A reference replaced at `at` keeps the keywords that were written beside it.
    pub fn to_value(&self, id: SchemaId, at: &DocPath) -> Value {
        let home = self.home(id);
        let pointer = at.to_pointer();
        if home != pointer {
            let wrapper = self
                .wrappers
                .get(&pointer)
                .and_then(|w| self.get(*w).as_schema_ref());
            return match wrapper {
                Some(wrapper) => wrapper.to_value(home),
                None => reference_value(home),
            };
        }

        match self.get(id) {
            Schema::Reference(schema_ref) => schema_ref.to_value(&schema_ref.reference),
            Schema::Boolean(b) => Value::Bool(*b),
            Schema::Object(obj) => {
                let mut map = Map::new();
                if let Some(t) = &obj.schema_type {
                    map.insert("type".into(), t.to_value());
                }
                if let Some(format) = &obj.format {
                    map.insert("format".into(), Value::String(format.clone()));
                }
                for (key, value) in &obj.extra {
                    map.insert(key.clone(), value.clone());
                }
                if let Some(required) = &obj.required {
                    map.insert(
                        "required".into(),
                        Value::Array(required.iter().cloned().map(Value::String).collect()),
                    );
                }
                if let Some(properties) = &obj.properties {
                    let mut props = Map::new();
                    for (name, child) in properties {
                        let child_path = at.join(["properties", name.as_str()]);
                        props.insert(name.clone(), self.to_value(*child, &child_path));
                    }
                    map.insert("properties".into(), Value::Object(props));
                }
                if let Some(items) = obj.items {
                    map.insert("items".into(), self.to_value(items, &at.child("items")));
                }
                if let Some(additional) = obj.additional_properties {
                    let child = at.child("additionalProperties");
                    map.insert("additionalProperties".into(), self.to_value(additional, &child));
                }
                if let Some(not) = obj.not {
                    map.insert("not".into(), self.to_value(not, &at.child("not")));
                }
                for (keyword, entries) in &obj.subschemas {
                    let mut out = Map::new();
                    for (name, child) in entries {
                        let child_path = at.join([keyword.as_str(), name.as_str()]);
                        out.insert(name.clone(), self.to_value(*child, &child_path));
                    }
                    map.insert(keyword.clone(), Value::Object(out));
                }
                for (key, members) in [
                    ("allOf", &obj.all_of),
                    ("oneOf", &obj.one_of),
                    ("anyOf", &obj.any_of),
                ] {
                    if let Some(members) = members {
                        let values = members
                            .iter()
                            .enumerate()
                            .map(|(i, m)| self.to_value(*m, &at.join([key.to_string(), i.to_string()])))
                            .collect();
                        map.insert(key.into(), Value::Array(values));
                    }
                }
                if let Some(read_only) = obj.read_only {
                    map.insert("readOnly".into(), Value::Bool(read_only));
                }
                if let Some(write_only) = obj.write_only {
                    map.insert("writeOnly".into(), Value::Bool(write_only));
                }
                if let Some(default) = &obj.default {
                    map.insert("default".into(), default.clone());
                }
                Value::Object(map)
            }
        }
    }
}

fn is_schema(value: &Value) -> bool {
    value.is_object() || value.is_boolean()
}

fn is_schema_map(value: &Value) -> bool {
    value.as_object().is_some_and(|map| map.values().all(is_schema))
}

fn reference_value(reference: &str) -> Value {
    let mut map = Map::new();
    map.insert("$ref".into(), Value::String(reference.to_string()));
    Value::Object(map)
}

/// Either a `$ref` or an inline item.
#[derive(Debug, Clone, PartialEq)]
pub enum RefOr<T> {
    Ref(String),
    Item(T),
}

impl<T> RefOr<T> {
    pub fn as_item(&self) -> Option<&T> {
        match self {
            RefOr::Item(item) => Some(item),
            RefOr::Ref(_) => None,
        }
    }

    pub fn as_item_mut(&mut self) -> Option<&mut T> {
        match self {
            RefOr::Item(item) => Some(item),
            RefOr::Ref(_) => None,
        }
    }

    pub fn as_reference(&self) -> Option<&str> {
        match self {
            RefOr::Ref(r) => Some(r),
            RefOr::Item(_) => None,
        }
    }
}

/// HTTP methods a path item may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum HttpMethod {
    Get,
    Put,
    Post,
    Delete,
    Options,
    Head,
    Patch,
    Trace,
}

impl HttpMethod {
    pub const ALL: [HttpMethod; 8] = [
        HttpMethod::Get,
        HttpMethod::Put,
        HttpMethod::Post,
        HttpMethod::Delete,
        HttpMethod::Options,
        HttpMethod::Head,
        HttpMethod::Patch,
        HttpMethod::Trace,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "get",
            HttpMethod::Put => "put",
            HttpMethod::Post => "post",
            HttpMethod::Delete => "delete",
            HttpMethod::Options => "options",
            HttpMethod::Head => "head",
            HttpMethod::Patch => "patch",
            HttpMethod::Trace => "trace",
        }
    }

    /// Case-insensitive parse. Returns `None` for anything else on a path item.
    pub fn parse(s: &str) -> Option<Self> {
        let lower = s.to_ascii_lowercase();
        Self::ALL.into_iter().find(|m| m.as_str() == lower)
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MediaType {
    pub schema: Option<SchemaId>,
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    pub name: String,
    /// `path`, `query`, `header` or `cookie`.
    pub location: String,
    pub required: Option<bool>,
    pub schema: Option<SchemaId>,
    pub extra: Map<String, Value>,
}

impl Parameter {
    pub fn is_required(&self) -> bool {
        self.location == "path" || self.required.unwrap_or(false)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RequestBody {
    pub content: IndexMap<String, MediaType>,
    pub required: Option<bool>,
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub content: Option<IndexMap<String, MediaType>>,
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Operation {
    pub parameters: Option<Vec<RefOr<Parameter>>>,
    pub request_body: Option<RefOr<RequestBody>>,
    pub responses: Option<IndexMap<String, RefOr<Response>>>,
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PathItem {
    pub operations: IndexMap<HttpMethod, Operation>,
    pub parameters: Option<Vec<RefOr<Parameter>>>,
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Components {
    pub schemas: IndexMap<String, SchemaId>,
    pub responses: IndexMap<String, RefOr<Response>>,
    pub request_bodies: IndexMap<String, RefOr<RequestBody>>,
    pub parameters: IndexMap<String, RefOr<Parameter>>,
    pub extra: Map<String, Value>,
}

impl Components {
    fn is_empty(&self) -> bool {
        self.schemas.is_empty()
            && self.responses.is_empty()
            && self.request_bodies.is_empty()
            && self.parameters.is_empty()
            && self.extra.is_empty()
    }
}

/// An OpenAPI 3 document with its schema graph.
///
/// `schemas` is the request-direction view of the graph. Once forked, the
/// response direction gets its own arena with identical ids and links, so
/// rewrites that only apply to requests leave responses untouched.
#[derive(Debug, Clone)]
pub struct Document {
    pub openapi: String,
    pub paths: IndexMap<String, RefOr<PathItem>>,
    pub components: Components,
    pub schemas: SchemaArena,
    pub response_schemas: Option<SchemaArena>,
    /// Top-level keys other than `openapi`, `paths` and `components`.
    pub extra: Map<String, Value>,
}

impl Document {
    /// Build the typed model from a parsed JSON/YAML value.
    ///
    /// # Errors
    ///
    /// Returns `PreprocessError::InvalidDocument` when a structural member has
    /// the wrong shape.
    pub fn from_value(value: Value) -> Result<Self, PreprocessError> {
        let Value::Object(mut root) = value else {
            return Err(PreprocessError::invalid("#", "document must be an object"));
        };

        let openapi = match root.remove("openapi") {
            Some(Value::String(v)) => v,
            Some(other) => {
                return Err(PreprocessError::invalid(
                    "#/openapi",
                    format!("expected string, got {}", json_type_name(&other)),
                ))
            }
            None => return Err(PreprocessError::invalid("#/openapi", "missing version")),
        };

        let mut schemas = SchemaArena::new();

        let components = match root.remove("components") {
            Some(value) => parse_components(value, &mut schemas)?,
            None => Components::default(),
        };

        let mut paths = IndexMap::new();
        if let Some(value) = root.remove("paths") {
            let base = DocPath::new(["paths"]);
            for (route, item) in expect_object(value, &base)? {
                let item_path = base.child(route.as_str());
                let item = parse_ref_or(item, &item_path, |map, path| {
                    parse_path_item(map, path, &mut schemas)
                })?;
                paths.insert(route, item);
            }
        }

        Ok(Self {
            openapi,
            paths,
            components,
            schemas,
            response_schemas: None,
            extra: root,
        })
    }

    /// Give the response direction its own copy of the schema graph.
    /// Does nothing once forked.
    pub fn fork_directions(&mut self) {
        if self.response_schemas.is_none() {
            self.response_schemas = Some(self.schemas.clone());
        }
    }

    /// Schema graph as seen by `direction`; unforked documents share one.
    pub fn arena(&self, direction: Direction) -> &SchemaArena {
        match direction {
            Direction::Response => self.response_schemas.as_ref().unwrap_or(&self.schemas),
            Direction::Request => &self.schemas,
        }
    }

    /// Mutable graph for `direction`, `None` for responses before a fork.
    pub fn arena_mut(&mut self, direction: Direction) -> Option<&mut SchemaArena> {
        match direction {
            Direction::Request => Some(&mut self.schemas),
            Direction::Response => self.response_schemas.as_mut(),
        }
    }

    /// Point `owner`'s `link` at `target` in every direction's graph.
    pub fn relink(&mut self, owner: SchemaId, link: &ChildLink, target: SchemaId) -> bool {
        if let Some(response) = self.response_schemas.as_mut() {
            response.relink(owner, link, target);
        }
        self.schemas.relink(owner, link, target)
    }

    /// Serialize the request view back to an OpenAPI JSON value.
    pub fn to_value(&self) -> Value {
        self.to_value_for(Direction::Request)
    }

    /// Serialize the view of the document seen by `direction`.
    pub fn to_value_for(&self, direction: Direction) -> Value {
        let render = Render {
            doc: self,
            arena: self.arena(direction),
        };
        let mut root = Map::new();
        root.insert("openapi".into(), Value::String(self.openapi.clone()));
        for (key, value) in &self.extra {
            root.insert(key.clone(), value.clone());
        }

        let base = DocPath::new(["paths"]);
        let mut paths = Map::new();
        for (route, item) in &self.paths {
            let path = base.child(route.as_str());
            let value = ref_or_value(item, |item| render.path_item(item, &path));
            paths.insert(route.clone(), value);
        }
        root.insert("paths".into(), Value::Object(paths));

        if !self.components.is_empty() {
            root.insert("components".into(), render.components());
        }
        Value::Object(root)
    }

    pub fn path_item(&self, route: &str) -> Option<&PathItem> {
        self.paths.get(route)?.as_item()
    }

    pub fn operation(&self, route: &str, method: HttpMethod) -> Option<&Operation> {
        self.path_item(route)?.operations.get(&method)
    }
}

/// Serializer for one direction's view of a document.
struct Render<'d> {
    doc: &'d Document,
    arena: &'d SchemaArena,
}

impl Render<'_> {
    fn components(&self) -> Value {
        let components = &self.doc.components;
        let base = DocPath::new(["components"]);
        let mut map = Map::new();
        if !components.schemas.is_empty() {
            let mut schemas = Map::new();
            for (name, id) in &components.schemas {
                let path = base.join(["schemas", name.as_str()]);
                schemas.insert(name.clone(), self.arena.to_value(*id, &path));
            }
            map.insert("schemas".into(), Value::Object(schemas));
        }
        if !components.responses.is_empty() {
            let mut responses = Map::new();
            for (name, response) in &components.responses {
                let path = base.join(["responses", name.as_str()]);
                let value = ref_or_value(response, |r| self.response(r, &path));
                responses.insert(name.clone(), value);
            }
            map.insert("responses".into(), Value::Object(responses));
        }
        if !components.request_bodies.is_empty() {
            let mut bodies = Map::new();
            for (name, body) in &components.request_bodies {
                let path = base.join(["requestBodies", name.as_str()]);
                let value = ref_or_value(body, |b| self.request_body(b, &path));
                bodies.insert(name.clone(), value);
            }
            map.insert("requestBodies".into(), Value::Object(bodies));
        }
        if !components.parameters.is_empty() {
            let mut params = Map::new();
            for (name, param) in &components.parameters {
                let path = base.join(["parameters", name.as_str()]);
                let value = ref_or_value(param, |p| self.parameter(p, &path));
                params.insert(name.clone(), value);
            }
            map.insert("parameters".into(), Value::Object(params));
        }
        for (key, value) in &components.extra {
            map.insert(key.clone(), value.clone());
        }
        Value::Object(map)
    }

    fn path_item(&self, item: &PathItem, path: &DocPath) -> Value {
        let mut map = item.extra.clone();
        if let Some(params) = &item.parameters {
            map.insert(
                "parameters".into(),
                self.parameters(params, &path.child("parameters")),
            );
        }
        for (method, op) in &item.operations {
            map.insert(
                method.as_str().into(),
                self.operation(op, &path.child(method.as_str())),
            );
        }
        Value::Object(map)
    }

    fn operation(&self, op: &Operation, path: &DocPath) -> Value {
        let mut map = op.extra.clone();
        if let Some(params) = &op.parameters {
            map.insert(
                "parameters".into(),
                self.parameters(params, &path.child("parameters")),
            );
        }
        if let Some(body) = &op.request_body {
            let body_path = path.child("requestBody");
            let value = ref_or_value(body, |b| self.request_body(b, &body_path));
            map.insert("requestBody".into(), value);
        }
        if let Some(responses) = &op.responses {
            let mut out = Map::new();
            for (status, response) in responses {
                let response_path = path.join(["responses", status.as_str()]);
                let value = ref_or_value(response, |r| self.response(r, &response_path));
                out.insert(status.clone(), value);
            }
            map.insert("responses".into(), Value::Object(out));
        }
        Value::Object(map)
    }

    fn parameters(&self, params: &[RefOr<Parameter>], path: &DocPath) -> Value {
        Value::Array(
            params
                .iter()
                .enumerate()
                .map(|(i, p)| {
                    let param_path = path.child(i.to_string());
                    ref_or_value(p, |p| self.parameter(p, &param_path))
                })
                .collect(),
        )
    }

    fn parameter(&self, param: &Parameter, path: &DocPath) -> Value {
        let mut map = Map::new();
        map.insert("name".into(), Value::String(param.name.clone()));
        map.insert("in".into(), Value::String(param.location.clone()));
        if let Some(required) = param.required {
            map.insert("required".into(), Value::Bool(required));
        }
        for (key, value) in &param.extra {
            map.insert(key.clone(), value.clone());
        }
        if let Some(schema) = param.schema {
            map.insert(
                "schema".into(),
                self.arena.to_value(schema, &path.child("schema")),
            );
        }
        Value::Object(map)
    }

    fn request_body(&self, body: &RequestBody, path: &DocPath) -> Value {
        let mut map = body.extra.clone();
        if let Some(required) = body.required {
            map.insert("required".into(), Value::Bool(required));
        }
        map.insert(
            "content".into(),
            self.content(&body.content, &path.child("content")),
        );
        Value::Object(map)
    }

    fn response(&self, response: &Response, path: &DocPath) -> Value {
        let mut map = response.extra.clone();
        if let Some(content) = &response.content {
            map.insert(
                "content".into(),
                self.content(content, &path.child("content")),
            );
        }
        Value::Object(map)
    }

    fn content(&self, content: &IndexMap<String, MediaType>, path: &DocPath) -> Value {
        let mut out = Map::new();
        for (media_type, media) in content {
            let mut map = media.extra.clone();
            if let Some(schema) = media.schema {
                let schema_path = path.join([media_type.as_str(), "schema"]);
                map.insert("schema".into(), self.arena.to_value(schema, &schema_path));
            }
            out.insert(media_type.clone(), Value::Object(map));
        }
        Value::Object(out)
    }
}

// --- Internal parsing ---

fn ref_or_value<T>(item: &RefOr<T>, render: impl FnOnce(&T) -> Value) -> Value {
    match item {
        RefOr::Ref(reference) => reference_value(reference),
        RefOr::Item(item) => render(item),
    }
}

fn expect_object(value: Value, path: &DocPath) -> Result<Map<String, Value>, PreprocessError> {
    match value {
        Value::Object(map) => Ok(map),
        other => Err(PreprocessError::invalid(
            path.to_pointer(),
            format!("expected object, got {}", json_type_name(&other)),
        )),
    }
}

fn parse_ref_or<T>(
    value: Value,
    path: &DocPath,
    parse: impl FnOnce(Map<String, Value>, &DocPath) -> Result<T, PreprocessError>,
) -> Result<RefOr<T>, PreprocessError> {
    let map = expect_object(value, path)?;
    if let Some(Value::String(reference)) = map.get("$ref") {
        return Ok(RefOr::Ref(reference.clone()));
    }
    parse(map, path).map(RefOr::Item)
}

fn take_bool(map: &mut Map<String, Value>, key: &str) -> Option<bool> {
    match map.get(key) {
        Some(Value::Bool(b)) => {
            let b = *b;
            map.remove(key);
            Some(b)
        }
        _ => None,
    }
}

fn parse_components(
    value: Value,
    schemas: &mut SchemaArena,
) -> Result<Components, PreprocessError> {
    let base = DocPath::new(["components"]);
    let mut map = expect_object(value, &base)?;
    let mut components = Components::default();

    if let Some(value) = map.remove("schemas") {
        let path = base.child("schemas");
        for (name, schema) in expect_object(value, &path)? {
            let id = schemas.parse(&schema, &path.child(name.as_str()))?;
            components.schemas.insert(name, id);
        }
    }
    if let Some(value) = map.remove("responses") {
        let path = base.child("responses");
        for (name, response) in expect_object(value, &path)? {
            let item_path = path.child(name.as_str());
            let response =
                parse_ref_or(response, &item_path, |m, p| parse_response(m, p, schemas))?;
            components.responses.insert(name, response);
        }
    }
    if let Some(value) = map.remove("requestBodies") {
        let path = base.child("requestBodies");
        for (name, body) in expect_object(value, &path)? {
            let item_path = path.child(name.as_str());
            let body = parse_ref_or(body, &item_path, |m, p| parse_request_body(m, p, schemas))?;
            components.request_bodies.insert(name, body);
        }
    }
    if let Some(value) = map.remove("parameters") {
        let path = base.child("parameters");
        for (name, param) in expect_object(value, &path)? {
            let item_path = path.child(name.as_str());
            let param = parse_ref_or(param, &item_path, |m, p| parse_parameter(m, p, schemas))?;
            components.parameters.insert(name, param);
        }
    }

    components.extra = map;
    Ok(components)
}

fn parse_path_item(
    mut map: Map<String, Value>,
    path: &DocPath,
    schemas: &mut SchemaArena,
) -> Result<PathItem, PreprocessError> {
    let parameters = match map.remove("parameters") {
        Some(value) => Some(parse_parameters(value, &path.child("parameters"), schemas)?),
        None => None,
    };

    let mut operations = IndexMap::new();
    for method in HttpMethod::ALL {
        if let Some(value) = map.remove(method.as_str()) {
            let op_path = path.child(method.as_str());
            let op = parse_operation(expect_object(value, &op_path)?, &op_path, schemas)?;
            operations.insert(method, op);
        }
    }

    Ok(PathItem {
        operations,
        parameters,
        extra: map,
    })
}

fn parse_operation(
    mut map: Map<String, Value>,
    path: &DocPath,
    schemas: &mut SchemaArena,
) -> Result<Operation, PreprocessError> {
    let parameters = match map.remove("parameters") {
        Some(value) => Some(parse_parameters(value, &path.child("parameters"), schemas)?),
        None => None,
    };

    let request_body = match map.remove("requestBody") {
        Some(value) => Some(parse_ref_or(value, &path.child("requestBody"), |m, p| {
            parse_request_body(m, p, schemas)
        })?),
        None => None,
    };

    let responses = match map.remove("responses") {
        Some(value) => {
            let responses_path = path.child("responses");
            let mut responses = IndexMap::new();
            for (status, response) in expect_object(value, &responses_path)? {
                let response_path = responses_path.child(status.as_str());
                let response = parse_ref_or(response, &response_path, |m, p| {
                    parse_response(m, p, schemas)
                })?;
                responses.insert(status, response);
            }
            Some(responses)
        }
        None => None,
    };

    Ok(Operation {
        parameters,
        request_body,
        responses,
        extra: map,
    })
}

fn parse_parameters(
    value: Value,
    path: &DocPath,
    schemas: &mut SchemaArena,
) -> Result<Vec<RefOr<Parameter>>, PreprocessError> {
    let Value::Array(items) = value else {
        return Err(PreprocessError::invalid(path.to_pointer(), "expected array"));
    };
    items
        .into_iter()
        .enumerate()
        .map(|(i, item)| {
            parse_ref_or(item, &path.child(i.to_string()), |m, p| {
                parse_parameter(m, p, schemas)
            })
        })
        .collect()
}

fn parse_parameter(
    mut map: Map<String, Value>,
    path: &DocPath,
    schemas: &mut SchemaArena,
) -> Result<Parameter, PreprocessError> {
    let mut field = |key: &str| match map.remove(key) {
        Some(Value::String(s)) => Ok(s),
        _ => Err(PreprocessError::invalid(
            path.child(key).to_pointer(),
            "expected string",
        )),
    };
    let name = field("name")?;
    let location = field("in")?;
    let required = take_bool(&mut map, "required");
    let schema = match map.remove("schema") {
        Some(value) => Some(schemas.parse(&value, &path.child("schema"))?),
        None => None,
    };
    Ok(Parameter {
        name,
        location,
        required,
        schema,
        extra: map,
    })
}

fn parse_request_body(
    mut map: Map<String, Value>,
    path: &DocPath,
    schemas: &mut SchemaArena,
) -> Result<RequestBody, PreprocessError> {
    let required = take_bool(&mut map, "required");
    let content = match map.remove("content") {
        Some(value) => parse_content(value, &path.child("content"), schemas)?,
        None => IndexMap::new(),
    };
    Ok(RequestBody {
        content,
        required,
        extra: map,
    })
}

fn parse_response(
    mut map: Map<String, Value>,
    path: &DocPath,
    schemas: &mut SchemaArena,
) -> Result<Response, PreprocessError> {
    let content = match map.remove("content") {
        Some(value) => Some(parse_content(value, &path.child("content"), schemas)?),
        None => None,
    };
    Ok(Response {
        content,
        extra: map,
    })
}

fn parse_content(
    value: Value,
    path: &DocPath,
    schemas: &mut SchemaArena,
) -> Result<IndexMap<String, MediaType>, PreprocessError> {
    let mut content = IndexMap::new();
    for (media_type, media) in expect_object(value, path)? {
        let media_path = path.child(media_type.as_str());
        let mut map = expect_object(media, &media_path)?;
        let schema = match map.remove("schema") {
            Some(value) => Some(schemas.parse(&value, &media_path.child("schema"))?),
            None => None,
        };
        content.insert(media_type, MediaType { schema, extra: map });
    }
    Ok(content)
}
