//! Depth-first walk over the schema graph.
//!
//! Every distinct schema slot is handed to the visitor at most once per walk,
//! however many links reach it. References met on the way are resolved,
//! replaced at their point of use, and the walk continues into the target.

use std::collections::HashSet;

use crate::error::PreprocessError;
use crate::model::{ChildLink, DocPath, Document, SchemaId};
use crate::resolver::Resolver;
use crate::types::Direction;

/// Traversal-time view of a schema slot.
///
/// Pairs the slot with the path used to reach it and the slot it was reached
/// from. Does not own the schema.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub schema: SchemaId,
    pub path: DocPath,
    pub parent: Option<SchemaId>,
    /// How the node hangs off `parent`, when reached through a child keyword.
    pub link: Option<ChildLink>,
}

impl Node {
    /// A traversal entry point with no parent.
    pub fn root(schema: SchemaId, path: DocPath) -> Self {
        Self {
            schema,
            path,
            parent: None,
            link: None,
        }
    }

    fn child_of(parent: &Node, link: ChildLink, schema: SchemaId) -> Self {
        Self {
            schema,
            path: parent.path.join(link.segments()),
            parent: Some(parent.schema),
            link: Some(link),
        }
    }
}

/// Per-direction accumulator threaded through one walk.
#[derive(Debug, Clone, PartialEq)]
pub struct TraversalState {
    pub direction: Direction,
    /// Path of the node currently being visited.
    pub path: DocPath,
    /// Slot as it appeared before reference resolution.
    pub original_schema: Option<SchemaId>,
    /// Target of the reference being visited; `None` while visiting objects.
    pub resolved_schema: Option<SchemaId>,
}

impl TraversalState {
    pub fn new(direction: Direction) -> Self {
        Self {
            direction,
            path: DocPath::root(),
            original_schema: None,
            resolved_schema: None,
        }
    }
}

/// The request and response states of a single walk.
#[derive(Debug, Clone, PartialEq)]
pub struct TraversalStates {
    pub request: TraversalState,
    pub response: TraversalState,
}

impl TraversalStates {
    pub fn new() -> Self {
        Self {
            request: TraversalState::new(Direction::Request),
            response: TraversalState::new(Direction::Response),
        }
    }

    pub fn get(&self, direction: Direction) -> &TraversalState {
        match direction {
            Direction::Request => &self.request,
            Direction::Response => &self.response,
        }
    }

    pub fn get_mut(&mut self, direction: Direction) -> &mut TraversalState {
        match direction {
            Direction::Request => &mut self.request,
            Direction::Response => &mut self.response,
        }
    }

    fn record_original(&mut self, schema: SchemaId, resolved: Option<SchemaId>) {
        for state in [&mut self.request, &mut self.response] {
            state.original_schema = Some(schema);
            state.resolved_schema = resolved;
        }
    }
}

impl Default for TraversalStates {
    fn default() -> Self {
        Self::new()
    }
}

/// Root nodes gathered from the document, walked in field order.
#[derive(Debug, Clone, Default)]
pub struct TopLevelSchemaNodes {
    pub schemas: Vec<Node>,
    pub request_bodies: Vec<Node>,
    pub responses: Vec<Node>,
}

impl TopLevelSchemaNodes {
    pub fn len(&self) -> usize {
        self.schemas.len() + self.request_bodies.len() + self.responses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn iter(&self) -> impl Iterator<Item = &Node> {
        self.schemas
            .iter()
            .chain(&self.request_bodies)
            .chain(&self.responses)
    }
}

/// Counters from one walk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TraversalStats {
    /// Schema objects and boolean schemas handed to the visitor.
    pub visited: usize,
    /// References resolved and replaced at their point of use.
    pub references_resolved: usize,
}

/// Walk every schema reachable from `nodes`, invoking `visit` once per slot.
///
/// Graph structure is read from the request view; references are relinked
/// in every direction's view.
///
/// Component schemas go first, then request bodies, then responses; a slot
/// seen from an earlier root is not walked again. Reference slots are
/// visited before their target. Object children are chosen by keyword
/// precedence (see [`SchemaObject::traversal_children`]).
///
/// [`SchemaObject::traversal_children`]: crate::model::SchemaObject::traversal_children
///
/// # Errors
///
/// Propagates fatal resolution errors (malformed or circular references).
pub fn traverse_schemas<F>(
    doc: &mut Document,
    resolver: &Resolver<'_>,
    nodes: &TopLevelSchemaNodes,
    visit: F,
) -> Result<TraversalStats, PreprocessError>
where
    F: FnMut(&mut Document, &Node, &mut TraversalStates),
{
    let mut walk = Walk {
        resolver,
        seen: HashSet::new(),
        visit,
        stats: TraversalStats::default(),
    };

    for node in nodes.iter() {
        let mut states = TraversalStates::new();
        walk.recurse(doc, node, &mut states)?;
    }

    Ok(walk.stats)
}

struct Walk<'r, 'i, F> {
    resolver: &'r Resolver<'i>,
    seen: HashSet<SchemaId>,
    visit: F,
    stats: TraversalStats,
}

impl<F> Walk<'_, '_, F>
where
    F: FnMut(&mut Document, &Node, &mut TraversalStates),
{
    fn recurse(
        &mut self,
        doc: &mut Document,
        node: &Node,
        states: &mut TraversalStates,
    ) -> Result<(), PreprocessError> {
        if !self.seen.insert(node.schema) {
            return Ok(());
        }

        if let Some(reference) = doc.schemas.get(node.schema).as_reference() {
            let reference = reference.to_string();
            let target = self.resolver.resolve_schema(doc, node.schema)?;

            states.record_original(node.schema, target);
            (self.visit)(doc, node, states);

            let Some(target) = target else {
                tracing::warn!(%reference, path = %node.path, "unresolved schema reference, skipping");
                return Ok(());
            };
            self.stats.references_resolved += 1;
            if let (Some(parent), Some(link)) = (node.parent, &node.link) {
                doc.relink(parent, link, target);
            }

            let resolved = Node {
                schema: target,
                path: DocPath::from_reference(&reference)?,
                parent: Some(node.schema),
                link: None,
            };
            return self.recurse(doc, &resolved, states);
        }

        states.record_original(node.schema, None);
        (self.visit)(doc, node, states);
        self.stats.visited += 1;

        let children = doc
            .schemas
            .object(node.schema)
            .map(|obj| obj.traversal_children())
            .unwrap_or_default();
        for (link, child) in children {
            let child = Node::child_of(node, link, child);
            self.recurse(doc, &child, states)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::RefIndex;
    use serde_json::json;
    use std::collections::HashMap;

    fn component_roots(doc: &Document) -> TopLevelSchemaNodes {
        TopLevelSchemaNodes {
            schemas: doc
                .components
                .schemas
                .iter()
                .map(|(name, id)| {
                    Node::root(*id, DocPath::new(["components", "schemas", name.as_str()]))
                })
                .collect(),
            ..Default::default()
        }
    }

    #[test]
    fn cycle_terminates_and_visits_each_object_once() {
        let mut doc = Document::from_value(json!({
            "openapi": "3.0.0",
            "paths": {},
            "components": {
                "schemas": {
                    "A": { "type": "object", "properties": { "b": { "$ref": "#/components/schemas/B" } } },
                    "B": { "type": "object", "properties": { "a": { "$ref": "#/components/schemas/A" } } }
                }
            }
        }))
        .unwrap();
        let index = RefIndex::register(&doc);
        let resolver = Resolver::new(&index);
        let roots = component_roots(&doc);

        let mut visits: HashMap<SchemaId, usize> = HashMap::new();
        let stats = traverse_schemas(&mut doc, &resolver, &roots, |doc, node, _| {
            if doc.schemas.object(node.schema).is_some() {
                *visits.entry(node.schema).or_default() += 1;
            }
        })
        .unwrap();

        assert_eq!(visits[&doc.components.schemas["A"]], 1);
        assert_eq!(visits[&doc.components.schemas["B"]], 1);
        assert_eq!(stats.visited, 2);
        assert_eq!(stats.references_resolved, 2);
    }

    #[test]
    fn references_are_replaced_at_point_of_use() {
        let mut doc = Document::from_value(json!({
            "openapi": "3.0.0",
            "paths": {},
            "components": {
                "schemas": {
                    "Pet": { "type": "object", "properties": { "owner": { "$ref": "#/components/schemas/Owner" } } },
                    "Owner": { "type": "object" }
                }
            }
        }))
        .unwrap();
        let index = RefIndex::register(&doc);
        let resolver = Resolver::new(&index);
        let roots = component_roots(&doc);
        doc.fork_directions();

        traverse_schemas(&mut doc, &resolver, &roots, |_, _, _| {}).unwrap();

        for direction in Direction::BOTH {
            let pet = doc
                .arena(direction)
                .object(doc.components.schemas["Pet"])
                .unwrap();
            let owner = pet.properties.as_ref().unwrap()["owner"];
            assert_eq!(owner, doc.components.schemas["Owner"]);
        }
    }

    #[test]
    fn reference_node_is_visited_before_its_target() {
        let mut doc = Document::from_value(json!({
            "openapi": "3.0.0",
            "paths": {},
            "components": {
                "schemas": {
                    "Wrapper": { "type": "object", "properties": { "inner": { "$ref": "#/components/schemas/Inner" } } },
                    "Inner": { "type": "string" }
                }
            }
        }))
        .unwrap();
        let index = RefIndex::register(&doc);
        let resolver = Resolver::new(&index);
        let roots = TopLevelSchemaNodes {
            schemas: vec![Node::root(
                doc.components.schemas["Wrapper"],
                DocPath::new(["components", "schemas", "Wrapper"]),
            )],
            ..Default::default()
        };

        let mut order = Vec::new();
        traverse_schemas(&mut doc, &resolver, &roots, |doc, node, states| {
            let kind = if doc.schemas.get(node.schema).as_reference().is_some() {
                "ref"
            } else {
                "object"
            };
            assert_eq!(states.request.original_schema, Some(node.schema));
            assert_eq!(states.response.resolved_schema.is_some(), kind == "ref");
            order.push((kind, node.path.to_pointer()));
        })
        .unwrap();

        assert_eq!(
            order,
            vec![
                ("object", "#/components/schemas/Wrapper".to_string()),
                ("ref", "#/components/schemas/Wrapper/properties/inner".to_string()),
                ("object", "#/components/schemas/Inner".to_string()),
            ]
        );
    }

    #[test]
    fn all_of_shadows_properties() {
        let mut doc = Document::from_value(json!({
            "openapi": "3.0.0",
            "paths": {},
            "components": {
                "schemas": {
                    "Mixed": {
                        "allOf": [{ "type": "object" }],
                        "properties": { "skipped": { "type": "string" } }
                    }
                }
            }
        }))
        .unwrap();
        let index = RefIndex::register(&doc);
        let resolver = Resolver::new(&index);
        let roots = component_roots(&doc);

        let mut paths = Vec::new();
        traverse_schemas(&mut doc, &resolver, &roots, |_, node, _| {
            paths.push(node.path.to_pointer());
        })
        .unwrap();

        assert_eq!(
            paths,
            vec![
                "#/components/schemas/Mixed".to_string(),
                "#/components/schemas/Mixed/allOf/0".to_string(),
            ]
        );
    }

    #[test]
    fn dangling_nested_reference_is_skipped() {
        let mut doc = Document::from_value(json!({
            "openapi": "3.0.0",
            "paths": {},
            "components": {
                "schemas": {
                    "Pet": { "type": "object", "properties": { "gone": { "$ref": "#/components/schemas/Gone" } } }
                }
            }
        }))
        .unwrap();
        let index = RefIndex::register(&doc);
        let resolver = Resolver::new(&index);
        let roots = component_roots(&doc);

        let stats = traverse_schemas(&mut doc, &resolver, &roots, |_, _, _| {}).unwrap();
        assert_eq!(stats.visited, 1);
        assert_eq!(stats.references_resolved, 0);
    }

    #[test]
    fn boolean_schemas_are_leaves() {
        let mut doc = Document::from_value(json!({
            "openapi": "3.1.0",
            "paths": {},
            "components": {
                "schemas": {
                    "Any": { "type": "object", "properties": { "x": true, "y": { "type": "string" } } }
                }
            }
        }))
        .unwrap();
        let index = RefIndex::register(&doc);
        let resolver = Resolver::new(&index);
        let roots = component_roots(&doc);

        let mut paths = Vec::new();
        let stats = traverse_schemas(&mut doc, &resolver, &roots, |_, node, _| {
            paths.push(node.path.to_pointer());
        })
        .unwrap();

        assert_eq!(stats.visited, 3);
        assert!(paths.contains(&"#/components/schemas/Any/properties/x".to_string()));
    }

    #[test]
    fn reference_into_keyword_slot_reaches_target() {
        let mut doc = Document::from_value(json!({
            "openapi": "3.1.0",
            "paths": {},
            "components": {
                "schemas": {
                    "Holder": {
                        "type": "object",
                        "properties": { "v": { "$ref": "#/components/schemas/Map/additionalProperties" } }
                    },
                    "Map": { "type": "object", "additionalProperties": { "type": "string" } }
                }
            }
        }))
        .unwrap();
        let index = RefIndex::register(&doc);
        let resolver = Resolver::new(&index);
        let roots = component_roots(&doc);

        let mut reached = Vec::new();
        let stats = traverse_schemas(&mut doc, &resolver, &roots, |_, node, _| {
            reached.push(node.path.to_pointer());
        })
        .unwrap();

        assert_eq!(stats.references_resolved, 1);
        assert!(reached.contains(&"#/components/schemas/Map/additionalProperties".to_string()));
    }
}
