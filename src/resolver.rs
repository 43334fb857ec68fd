//! Reference resolution against the schema index and the document itself.

use std::collections::HashSet;

use crate::error::PreprocessError;
use crate::index::SchemaIndex;
use crate::model::{
    ChildLink, DocPath, Document, HttpMethod, Parameter, PathItem, RefOr, RequestBody, Response,
    SchemaId,
};

/// Turns references into the concrete nodes they designate.
///
/// Schema references go to the index first; on a miss the reference is
/// parsed into a [`DocPath`] and walked over the typed document.
pub struct Resolver<'a> {
    index: &'a dyn SchemaIndex,
}

impl<'a> Resolver<'a> {
    pub fn new(index: &'a dyn SchemaIndex) -> Self {
        Self { index }
    }

    /// Resolve the slot `id` to a schema object.
    ///
    /// An object resolves to itself. Reference chains are followed until an
    /// object is reached. Returns `Ok(None)` when a well-formed reference
    /// designates nothing.
    ///
    /// # Errors
    ///
    /// Returns `MalformedReference` for references that are not local
    /// pointers and `CircularReference` for a chain that loops on itself.
    pub fn resolve_schema(
        &self,
        doc: &Document,
        id: SchemaId,
    ) -> Result<Option<SchemaId>, PreprocessError> {
        let mut current = id;
        let mut chain = HashSet::new();
        loop {
            let Some(reference) = doc.schemas.get(current).as_reference() else {
                return Ok(Some(current));
            };
            if !chain.insert(reference) {
                return Err(PreprocessError::CircularReference {
                    reference: reference.to_string(),
                });
            }
            match self.lookup(doc, reference)? {
                Some(next) => current = next,
                None => return Ok(None),
            }
        }
    }

    /// Find the slot a reference string designates, without following chains.
    pub fn lookup(
        &self,
        doc: &Document,
        reference: &str,
    ) -> Result<Option<SchemaId>, PreprocessError> {
        if let Some(id) = self.index.lookup(reference) {
            return Ok(Some(id));
        }
        let path = DocPath::from_reference(reference)?;
        tracing::debug!(reference, "index miss, walking document");
        self.lookup_path(doc, &path)
    }

    /// Structural lookup of a schema slot by document path.
    pub fn lookup_path(
        &self,
        doc: &Document,
        path: &DocPath,
    ) -> Result<Option<SchemaId>, PreprocessError> {
        let segments: Vec<&str> = path.segments().iter().map(String::as_str).collect();

        let (start, rest): (Option<SchemaId>, &[&str]) = match segments.as_slice() {
            ["components", "schemas", name, rest @ ..] => {
                (doc.components.schemas.get(*name).copied(), rest)
            }
            ["components", "parameters", name, "schema", rest @ ..] => {
                let param = match doc.components.parameters.get(*name) {
                    Some(p) => self.resolve_parameter(doc, p)?,
                    None => None,
                };
                (param.and_then(|p| p.schema), rest)
            }
            ["components", "requestBodies", name, "content", media_type, "schema", rest @ ..] => {
                let body = match doc.components.request_bodies.get(*name) {
                    Some(b) => self.resolve_request_body(doc, b)?,
                    None => None,
                };
                let schema = body.and_then(|b| b.content.get(*media_type)?.schema);
                (schema, rest)
            }
            ["components", "responses", name, "content", media_type, "schema", rest @ ..] => {
                let response = match doc.components.responses.get(*name) {
                    Some(r) => self.resolve_response(doc, r)?,
                    None => None,
                };
                let schema = response.and_then(|r| r.content?.get(*media_type)?.schema);
                (schema, rest)
            }
            ["paths", route, method, "requestBody", "content", media_type, "schema", rest @ ..] => {
                let body = match operation(doc, route, method).and_then(|op| op.request_body.as_ref()) {
                    Some(b) => self.resolve_request_body(doc, b)?,
                    None => None,
                };
                let schema = body.and_then(|b| b.content.get(*media_type)?.schema);
                (schema, rest)
            }
            ["paths", route, method, "responses", status, "content", media_type, "schema", rest @ ..] => {
                let found = operation(doc, route, method)
                    .and_then(|op| op.responses.as_ref()?.get(*status));
                let response = match found {
                    Some(r) => self.resolve_response(doc, r)?,
                    None => None,
                };
                let schema = response.and_then(|r| r.content?.get(*media_type)?.schema);
                (schema, rest)
            }
            ["paths", route, "parameters", i, "schema", rest @ ..] => {
                let found = path_item(doc, route)
                    .and_then(|item| item.parameters.as_ref()?.get(i.parse::<usize>().ok()?));
                let param = match found {
                    Some(p) => self.resolve_parameter(doc, p)?,
                    None => None,
                };
                (param.and_then(|p| p.schema), rest)
            }
            ["paths", route, method, "parameters", i, "schema", rest @ ..] => {
                let found = operation(doc, route, method)
                    .and_then(|op| op.parameters.as_ref()?.get(i.parse::<usize>().ok()?));
                let param = match found {
                    Some(p) => self.resolve_parameter(doc, p)?,
                    None => None,
                };
                (param.and_then(|p| p.schema), rest)
            }
            _ => (None, &[]),
        };

        match start {
            Some(id) => self.descend(doc, id, rest),
            None => Ok(None),
        }
    }

    /// Walk schema-internal segments below `id`, resolving references on the way.
    fn descend(
        &self,
        doc: &Document,
        mut id: SchemaId,
        mut rest: &[&str],
    ) -> Result<Option<SchemaId>, PreprocessError> {
        while !rest.is_empty() {
            let Some(resolved) = self.resolve_schema(doc, id)? else {
                return Ok(None);
            };
            let Some(obj) = doc.schemas.object(resolved) else {
                return Ok(None);
            };
            let index = |s: &str| s.parse::<usize>().ok();
            let (link, tail) = match rest {
                ["properties", name, tail @ ..] => (Some(ChildLink::Property(name.to_string())), tail),
                ["allOf", i, tail @ ..] => (index(*i).map(ChildLink::AllOf), tail),
                ["oneOf", i, tail @ ..] => (index(*i).map(ChildLink::OneOf), tail),
                ["anyOf", i, tail @ ..] => (index(*i).map(ChildLink::AnyOf), tail),
                ["items", tail @ ..] => (Some(ChildLink::Items), tail),
                ["additionalProperties", tail @ ..] => (Some(ChildLink::AdditionalProperties), tail),
                ["not", tail @ ..] => (Some(ChildLink::Not), tail),
                [keyword @ ("$defs" | "definitions" | "patternProperties"), name, tail @ ..] => (
                    Some(ChildLink::Keyed(keyword.to_string(), name.to_string())),
                    tail,
                ),
                _ => return Ok(None),
            };
            match link.and_then(|link| obj.child(&link)) {
                Some(child) => id = child,
                None => return Ok(None),
            }
            rest = tail;
        }
        Ok(Some(id))
    }

    pub fn resolve_response(
        &self,
        doc: &Document,
        item: &RefOr<Response>,
    ) -> Result<Option<Response>, PreprocessError> {
        follow(item, |segments| match segments {
            ["components", "responses", name] => doc.components.responses.get(*name),
            ["paths", route, method, "responses", status] => {
                operation(doc, route, method)?.responses.as_ref()?.get(*status)
            }
            _ => None,
        })
    }

    pub fn resolve_request_body(
        &self,
        doc: &Document,
        item: &RefOr<RequestBody>,
    ) -> Result<Option<RequestBody>, PreprocessError> {
        follow(item, |segments| match segments {
            ["components", "requestBodies", name] => doc.components.request_bodies.get(*name),
            ["paths", route, method, "requestBody"] => {
                operation(doc, route, method)?.request_body.as_ref()
            }
            _ => None,
        })
    }

    pub fn resolve_parameter(
        &self,
        doc: &Document,
        item: &RefOr<Parameter>,
    ) -> Result<Option<Parameter>, PreprocessError> {
        follow(item, |segments| match segments {
            ["components", "parameters", name] => doc.components.parameters.get(*name),
            ["paths", route, "parameters", i] => path_item(doc, route)?
                .parameters
                .as_ref()?
                .get(i.parse::<usize>().ok()?),
            ["paths", route, method, "parameters", i] => operation(doc, route, method)?
                .parameters
                .as_ref()?
                .get(i.parse::<usize>().ok()?),
            _ => None,
        })
    }

    pub fn resolve_path_item(
        &self,
        doc: &Document,
        item: &RefOr<PathItem>,
    ) -> Result<Option<PathItem>, PreprocessError> {
        follow(item, |segments| match segments {
            ["paths", route] => doc.paths.get(*route),
            _ => None,
        })
    }
}

/// Path item at `route`, following path items given by reference.
fn path_item<'d>(doc: &'d Document, route: &str) -> Option<&'d PathItem> {
    let mut current = doc.paths.get(route)?;
    let mut seen = HashSet::new();
    loop {
        match current {
            RefOr::Item(item) => return Some(item),
            RefOr::Ref(reference) => {
                if !seen.insert(reference.as_str()) {
                    return None;
                }
                let path = DocPath::from_reference(reference).ok()?;
                current = match path.segments() {
                    [paths, next] if paths == "paths" => doc.paths.get(next)?,
                    _ => return None,
                };
            }
        }
    }
}

fn operation<'d>(
    doc: &'d Document,
    route: &str,
    method: &str,
) -> Option<&'d crate::model::Operation> {
    path_item(doc, route)?.operations.get(&HttpMethod::parse(method)?)
}

/// Follow a chain of references to a non-schema item, cloning the target.
fn follow<'d, T, F>(item: &RefOr<T>, lookup: F) -> Result<Option<T>, PreprocessError>
where
    T: Clone + 'd,
    F: Fn(&[&str]) -> Option<&'d RefOr<T>>,
{
    let mut reference = match item {
        RefOr::Item(item) => return Ok(Some(item.clone())),
        RefOr::Ref(reference) => reference.clone(),
    };
    let mut chain = HashSet::new();
    loop {
        if !chain.insert(reference.clone()) {
            return Err(PreprocessError::CircularReference { reference });
        }
        let path = DocPath::from_reference(&reference)?;
        let segments: Vec<&str> = path.segments().iter().map(String::as_str).collect();
        match lookup(&segments) {
            Some(RefOr::Item(item)) => return Ok(Some(item.clone())),
            Some(RefOr::Ref(next)) => reference = next.clone(),
            None => return Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::RefIndex;
    use serde_json::json;

    fn doc() -> Document {
        Document::from_value(json!({
            "openapi": "3.0.3",
            "paths": {
                "/pets": {
                    "post": {
                        "requestBody": {
                            "content": {
                                "application/json": {
                                    "schema": {
                                        "type": "object",
                                        "properties": { "nick": { "type": "string" } }
                                    }
                                }
                            }
                        },
                        "responses": {
                            "201": { "$ref": "#/components/responses/Created" },
                            "404": { "$ref": "#/components/responses/Missing" }
                        }
                    }
                }
            },
            "components": {
                "schemas": {
                    "Pet": {
                        "type": "object",
                        "properties": {
                            "owner": { "$ref": "#/components/schemas/Owner" },
                            "tags": { "type": "array", "items": { "type": "string", "format": "tag" } }
                        }
                    },
                    "Owner": { "type": "object", "properties": { "name": { "type": "string" } } },
                    "Alias": { "$ref": "#/components/schemas/Pet" },
                    "Loop": { "$ref": "#/components/schemas/Loop" }
                },
                "responses": {
                    "Created": {
                        "description": "created",
                        "content": { "application/json": { "schema": { "$ref": "#/components/schemas/Pet" } } }
                    }
                }
            }
        }))
        .unwrap()
    }

    #[test]
    fn object_resolves_to_itself() {
        let doc = doc();
        let index = RefIndex::register(&doc);
        let resolver = Resolver::new(&index);
        let pet = doc.components.schemas["Pet"];
        assert_eq!(resolver.resolve_schema(&doc, pet).unwrap(), Some(pet));
    }

    #[test]
    fn reference_chain_resolves_through_index() {
        let doc = doc();
        let index = RefIndex::register(&doc);
        let resolver = Resolver::new(&index);
        let alias = doc.components.schemas["Alias"];
        assert_eq!(
            resolver.resolve_schema(&doc, alias).unwrap(),
            Some(doc.components.schemas["Pet"])
        );
    }

    #[test]
    fn index_miss_falls_back_to_structural_walk() {
        let doc = doc();
        let resolver_index = RefIndex::new();
        let resolver = Resolver::new(&resolver_index);

        let name = resolver
            .lookup(&doc, "#/components/schemas/Pet/properties/owner/properties/name")
            .unwrap()
            .unwrap();
        assert_eq!(
            doc.schemas.home(name),
            "#/components/schemas/Owner/properties/name"
        );

        let items = resolver
            .lookup(&doc, "#/components/schemas/Pet/properties/tags/items")
            .unwrap()
            .unwrap();
        assert_eq!(doc.schemas.object(items).unwrap().format.as_deref(), Some("tag"));

        let nick = resolver
            .lookup(
                &doc,
                "#/paths/~1pets/post/requestBody/content/application~1json/schema/properties/nick",
            )
            .unwrap();
        assert!(nick.is_some());
    }

    #[test]
    fn dangling_reference_is_none() {
        let doc = doc();
        let index = RefIndex::register(&doc);
        let resolver = Resolver::new(&index);
        assert!(resolver
            .lookup(&doc, "#/components/schemas/Nope")
            .unwrap()
            .is_none());
        assert!(resolver.lookup(&doc, "#/info/title").unwrap().is_none());
    }

    #[test]
    fn malformed_reference_is_fatal() {
        let doc = doc();
        let index = RefIndex::register(&doc);
        let resolver = Resolver::new(&index);
        let err = resolver.lookup(&doc, "pets.yaml#/Pet").unwrap_err();
        assert!(matches!(err, PreprocessError::MalformedReference { .. }));
    }

    #[test]
    fn self_referencing_chain_is_circular() {
        let doc = doc();
        let index = RefIndex::register(&doc);
        let resolver = Resolver::new(&index);
        let err = resolver
            .resolve_schema(&doc, doc.components.schemas["Loop"])
            .unwrap_err();
        assert!(matches!(err, PreprocessError::CircularReference { .. }));
    }

    #[test]
    fn resolves_component_responses() {
        let doc = doc();
        let index = RefIndex::register(&doc);
        let resolver = Resolver::new(&index);
        let responses = doc
            .operation("/pets", HttpMethod::Post)
            .unwrap()
            .responses
            .as_ref()
            .unwrap();

        let created = resolver
            .resolve_response(&doc, &responses["201"])
            .unwrap()
            .unwrap();
        assert!(created.content.unwrap().contains_key("application/json"));

        let missing = resolver.resolve_response(&doc, &responses["404"]).unwrap();
        assert!(missing.is_none());
    }

    #[test]
    fn structural_walk_reaches_schema_valued_keywords() {
        let doc = Document::from_value(json!({
            "openapi": "3.1.0",
            "paths": {},
            "components": {
                "schemas": {
                    "Map": {
                        "type": "object",
                        "additionalProperties": { "type": "string", "format": "custom-id" },
                        "$defs": { "Key": { "type": "string" } },
                        "not": { "type": "null" }
                    }
                }
            }
        }))
        .unwrap();
        let resolver_index = RefIndex::new();
        let resolver = Resolver::new(&resolver_index);

        for (reference, home) in [
            ("#/components/schemas/Map/additionalProperties", "#/components/schemas/Map/additionalProperties"),
            ("#/components/schemas/Map/$defs/Key", "#/components/schemas/Map/$defs/Key"),
            ("#/components/schemas/Map/not", "#/components/schemas/Map/not"),
        ] {
            let found = resolver.lookup(&doc, reference).unwrap().unwrap();
            assert_eq!(doc.schemas.home(found), home);
        }
        assert!(resolver
            .lookup(&doc, "#/components/schemas/Map/$defs/Missing")
            .unwrap()
            .is_none());
    }

    #[test]
    fn structural_walk_follows_path_item_references() {
        let doc = Document::from_value(json!({
            "openapi": "3.0.3",
            "paths": {
                "/pets": {
                    "post": {
                        "requestBody": {
                            "content": { "application/json": { "schema": { "type": "object" } } }
                        }
                    }
                },
                "/animals": { "$ref": "#/paths/~1pets" }
            }
        }))
        .unwrap();
        let resolver_index = RefIndex::new();
        let resolver = Resolver::new(&resolver_index);

        let found = resolver
            .lookup(
                &doc,
                "#/paths/~1animals/post/requestBody/content/application~1json/schema",
            )
            .unwrap()
            .unwrap();
        assert_eq!(
            doc.schemas.home(found),
            "#/paths/~1pets/post/requestBody/content/application~1json/schema"
        );
    }
}
