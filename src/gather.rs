//! Collection of traversal roots from components and operations.
//!
//! Top-level references (component schema aliases, request bodies, responses
//! and their media-type schemas) are replaced in place by what they resolve to
//! before the walk starts, so the traverser only meets nested references.

use std::collections::HashSet;

use crate::error::PreprocessError;
use crate::model::{DocPath, Document, HttpMethod, Operation, Parameter, PathItem, RefOr};
use crate::resolver::Resolver;
use crate::traverse::Node;

/// Roots and bookkeeping produced by [`gather_schema_nodes_from_paths`].
#[derive(Debug, Clone, Default)]
pub struct PathSchemaNodes {
    pub request_bodies: Vec<Node>,
    pub responses: Vec<Node>,
    /// Pointers of responses (or response schemas) left out of the walk.
    pub skipped_responses: Vec<String>,
    /// Path-level parameters copied onto operations.
    pub parameters_merged: usize,
}

/// One root per named component schema, at `components/schemas/<name>`.
///
/// A component that is itself a reference is replaced by its target. One
/// that designates nothing is logged and left out.
///
/// # Errors
///
/// Malformed or circular component references are fatal.
pub fn gather_component_schema_nodes(
    doc: &mut Document,
    resolver: &Resolver<'_>,
) -> Result<Vec<Node>, PreprocessError> {
    let entries: Vec<_> = doc
        .components
        .schemas
        .iter()
        .map(|(name, id)| (name.clone(), *id))
        .collect();

    let mut nodes = Vec::with_capacity(entries.len());
    for (name, id) in entries {
        let path = DocPath::new(["components", "schemas", name.as_str()]);
        let Some(target) = resolver.resolve_schema(doc, id)? else {
            tracing::warn!(path = %path, "component schema reference designates nothing, skipping");
            continue;
        };
        if target != id {
            doc.components.schemas.insert(name, target);
        }
        tracing::debug!(path = %path, "gathered component schema");
        nodes.push(Node::root(target, path));
    }
    Ok(nodes)
}

/// Request-body and response roots for every operation on every route.
///
/// Path-level parameters are merged into each operation first. Path items,
/// request bodies and responses given by reference are replaced by their
/// targets. Responses that fail to resolve for any reason are skipped and
/// recorded; the rest of the operation is still gathered.
///
/// # Errors
///
/// Malformed or circular references outside responses are fatal.
pub fn gather_schema_nodes_from_paths(
    doc: &mut Document,
    resolver: &Resolver<'_>,
) -> Result<PathSchemaNodes, PreprocessError> {
    let mut out = PathSchemaNodes::default();
    let routes: Vec<String> = doc.paths.keys().cloned().collect();

    for route in routes {
        let Some(entry) = doc.paths.get(&route) else {
            continue;
        };
        let Some(mut item) = resolver.resolve_path_item(doc, entry)? else {
            tracing::warn!(route = %route, "path item reference designates nothing, skipping");
            continue;
        };

        let methods: Vec<HttpMethod> = item.operations.keys().copied().collect();
        for method in methods {
            out.parameters_merged += merge_path_level_parameters(&mut item, method, doc, resolver)?;
        }

        let base = DocPath::new(["paths", route.as_str()]);
        for (method, op) in item.operations.iter_mut() {
            let op_path = base.child(method.as_str());
            gather_request_body(doc, resolver, op, &op_path, &mut out)?;
            gather_responses(doc, resolver, op, &op_path, &mut out);
        }

        doc.paths.insert(route, RefOr::Item(item));
    }
    Ok(out)
}

/// Append the path item's parameters to the operation for `method`.
///
/// A parameter is added only when the operation has none with the same
/// `(in, name)`; references that cannot be resolved are keyed by their
/// reference string. Returns how many parameters were added.
///
/// # Errors
///
/// Malformed or circular parameter references are fatal.
pub fn merge_path_level_parameters(
    item: &mut PathItem,
    method: HttpMethod,
    doc: &Document,
    resolver: &Resolver<'_>,
) -> Result<usize, PreprocessError> {
    let Some(shared) = item.parameters.as_ref().filter(|p| !p.is_empty()) else {
        return Ok(0);
    };
    let Some(op) = item.operations.get_mut(&method) else {
        return Ok(0);
    };

    let own = op.parameters.get_or_insert_with(Vec::new);
    let mut keys = HashSet::new();
    for param in own.iter() {
        keys.insert(parameter_key(doc, resolver, param)?);
    }

    let mut merged = 0;
    for param in shared {
        if keys.insert(parameter_key(doc, resolver, param)?) {
            own.push(param.clone());
            merged += 1;
        }
    }
    if merged > 0 {
        tracing::debug!(%method, merged, "merged path-level parameters");
    }
    Ok(merged)
}

#[derive(Debug, PartialEq, Eq, Hash)]
enum ParameterKey {
    Named { location: String, name: String },
    Unresolved(String),
}

fn parameter_key(
    doc: &Document,
    resolver: &Resolver<'_>,
    param: &RefOr<Parameter>,
) -> Result<ParameterKey, PreprocessError> {
    Ok(match resolver.resolve_parameter(doc, param)? {
        Some(p) => ParameterKey::Named {
            location: p.location,
            name: p.name,
        },
        None => ParameterKey::Unresolved(param.as_reference().unwrap_or_default().to_string()),
    })
}

fn gather_request_body(
    doc: &Document,
    resolver: &Resolver<'_>,
    op: &mut Operation,
    op_path: &DocPath,
    out: &mut PathSchemaNodes,
) -> Result<(), PreprocessError> {
    let Some(body) = op.request_body.as_ref() else {
        return Ok(());
    };
    let Some(mut body) = resolver.resolve_request_body(doc, body)? else {
        tracing::warn!(path = %op_path, "request body reference designates nothing, skipping");
        return Ok(());
    };

    let content_path = op_path.join(["requestBody", "content"]);
    for (media_type, media) in body.content.iter_mut() {
        let Some(schema) = media.schema else {
            continue;
        };
        let path = content_path.join([media_type.as_str(), "schema"]);
        let Some(target) = resolver.resolve_schema(doc, schema)? else {
            tracing::warn!(path = %path, "request body schema reference designates nothing, skipping");
            continue;
        };
        media.schema = Some(target);
        tracing::debug!(path = %path, "gathered request body schema");
        out.request_bodies.push(Node::root(target, path));
    }

    op.request_body = Some(RefOr::Item(body));
    Ok(())
}

fn gather_responses(
    doc: &Document,
    resolver: &Resolver<'_>,
    op: &mut Operation,
    op_path: &DocPath,
    out: &mut PathSchemaNodes,
) {
    let Some(responses) = op.responses.as_mut() else {
        return;
    };

    for (status, entry) in responses.iter_mut() {
        let response_path = op_path.join(["responses", status.as_str()]);
        let mut response = match resolver.resolve_response(doc, entry) {
            Ok(Some(response)) => response,
            Ok(None) => {
                tracing::warn!(path = %response_path, "response reference designates nothing, skipping");
                out.skipped_responses.push(response_path.to_pointer());
                continue;
            }
            Err(e) => {
                tracing::warn!(path = %response_path, error = %e, "cannot resolve response, skipping");
                out.skipped_responses.push(response_path.to_pointer());
                continue;
            }
        };

        if let Some(content) = response.content.as_mut() {
            let content_path = response_path.child("content");
            for (media_type, media) in content.iter_mut() {
                let Some(schema) = media.schema else {
                    continue;
                };
                let path = content_path.join([media_type.as_str(), "schema"]);
                match resolver.resolve_schema(doc, schema) {
                    Ok(Some(target)) => {
                        media.schema = Some(target);
                        tracing::debug!(path = %path, "gathered response schema");
                        out.responses.push(Node::root(target, path));
                    }
                    Ok(None) => {
                        tracing::warn!(path = %path, "response schema reference designates nothing, skipping");
                        out.skipped_responses.push(path.to_pointer());
                    }
                    Err(e) => {
                        tracing::warn!(path = %path, error = %e, "cannot resolve response schema, skipping");
                        out.skipped_responses.push(path.to_pointer());
                    }
                }
            }
        }

        *entry = RefOr::Item(response);
    }
}
