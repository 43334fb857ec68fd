//! Reference index supplied by the validator engine's registration step.

use std::collections::HashMap;

use crate::model::{DocPath, Document, SchemaId};

/// Lookup of schema slots by reference string.
///
/// The validator engine indexes schemas when a document is registered; the
/// resolver consults this first and only walks the document on a miss.
pub trait SchemaIndex {
    fn lookup(&self, reference: &str) -> Option<SchemaId>;
}

/// Index of every named component schema, keyed by its local pointer.
#[derive(Debug, Clone, Default)]
pub struct RefIndex {
    entries: HashMap<String, SchemaId>,
}

impl RefIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `#/components/schemas/<name>` for each component schema.
    pub fn register(document: &Document) -> Self {
        let mut index = Self::new();
        for (name, id) in &document.components.schemas {
            let pointer = DocPath::new(["components", "schemas", name.as_str()]).to_pointer();
            index.insert(pointer, *id);
        }
        tracing::debug!(entries = index.len(), "registered component schemas");
        index
    }

    pub fn insert(&mut self, reference: impl Into<String>, id: SchemaId) {
        self.entries.insert(reference.into(), id);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl SchemaIndex for RefIndex {
    fn lookup(&self, reference: &str) -> Option<SchemaId> {
        self.entries.get(reference).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn registers_component_schemas_only() {
        let doc = Document::from_value(json!({
            "openapi": "3.0.0",
            "paths": {},
            "components": {
                "schemas": {
                    "Pet": { "type": "object", "properties": { "name": { "type": "string" } } },
                    "Pet Name": { "type": "string" }
                }
            }
        }))
        .unwrap();

        let index = RefIndex::register(&doc);
        assert_eq!(index.len(), 2);
        assert_eq!(
            index.lookup("#/components/schemas/Pet"),
            Some(doc.components.schemas["Pet"])
        );
        assert_eq!(
            index.lookup("#/components/schemas/Pet%20Name"),
            Some(doc.components.schemas["Pet Name"])
        );
        assert!(index
            .lookup("#/components/schemas/Pet/properties/name")
            .is_none());
    }
}
