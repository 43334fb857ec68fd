//! Per-node rewrite rules applied during traversal.

use crate::model::{DocPath, Document, Schema, SchemaObject, SchemaType};
use crate::traverse::{Node, TraversalState, TraversalStates};
use crate::types::{Direction, SerDesMap};

/// Rewrites applied by [`schema_visitor`], counted per schema node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Rewrites {
    pub serdes_widened: usize,
    pub read_only_unrequired: usize,
}

impl Rewrites {
    pub fn merge(&mut self, other: Rewrites) {
        self.serdes_widened += other.serdes_widened;
        self.read_only_unrequired += other.read_only_unrequired;
    }

    pub fn is_empty(&self) -> bool {
        self.serdes_widened == 0 && self.read_only_unrequired == 0
    }
}

/// Widen `type: string` to `["object", "string"]` when the schema's format
/// has a registered serdes. Returns true if the schema changed.
pub fn handle_serdes(schema: &mut SchemaObject, serdes: &SerDesMap) -> bool {
    let is_string = schema
        .schema_type
        .as_ref()
        .is_some_and(|t| t.is_exactly("string"));
    let registered = schema
        .format
        .as_deref()
        .is_some_and(|f| !f.is_empty() && serdes.contains_key(f));

    if is_string && registered {
        schema.schema_type = Some(SchemaType::Multiple(vec![
            "object".to_string(),
            "string".to_string(),
        ]));
        return true;
    }
    false
}

/// Remove a read-only property from its parent's `required` list.
///
/// Request direction only. `required` is dropped entirely once empty.
/// Returns true if the parent changed.
pub fn handle_read_only(parent: &mut SchemaObject, read_only: bool, state: &TraversalState) -> bool {
    if state.direction == Direction::Response || !read_only {
        return false;
    }
    let Some(property) = property_name(&state.path) else {
        return false;
    };
    let Some(required) = parent.required.as_mut() else {
        return false;
    };
    let Some(index) = required.iter().position(|r| r == property) else {
        return false;
    };

    required.remove(index);
    if required.is_empty() {
        parent.required = None;
    }
    true
}

/// Name of the property a path ends in, if it ends in `properties/<name>`.
fn property_name(path: &DocPath) -> Option<&str> {
    match path.segments() {
        [.., keyword, name] if keyword == "properties" => Some(name),
        _ => None,
    }
}

/// Apply both rule sets to `node`, once per direction.
///
/// Each direction rewrites its own view of the graph; an unforked document
/// only has the request view. A reference node is read-only when `readOnly`
/// is set beside the `$ref` or on its resolved target, so a property linked
/// through `$ref` is treated like an inline one.
pub fn schema_visitor(
    doc: &mut Document,
    node: &Node,
    states: &mut TraversalStates,
    serdes: &SerDesMap,
) -> Rewrites {
    let mut rewrites = Rewrites::default();
    let mut widened = false;

    for direction in Direction::BOTH {
        states.get_mut(direction).path = node.path.clone();
        let state = states.get(direction);
        let Some(arena) = doc.arena_mut(direction) else {
            continue;
        };

        if let Some(schema) = arena.object_mut(node.schema) {
            if handle_serdes(schema, serdes) {
                tracing::debug!(path = %node.path, ?direction, "widened serdes type");
                widened = true;
            }
        }

        let Some(parent) = node.parent else {
            continue;
        };
        let read_only = match arena.get(node.schema) {
            Schema::Reference(wrapper) => {
                wrapper.read_only == Some(true)
                    || state
                        .resolved_schema
                        .and_then(|target| arena.object(target))
                        .is_some_and(SchemaObject::is_read_only)
            }
            Schema::Object(obj) => obj.is_read_only(),
            Schema::Boolean(_) => false,
        };
        if let Some(parent) = arena.object_mut(parent) {
            if handle_read_only(parent, read_only, state) {
                tracing::debug!(path = %node.path, "removed read-only property from required");
                rewrites.read_only_unrequired += 1;
            }
        }
    }

    if widened {
        rewrites.serdes_widened += 1;
    }
    rewrites
}
