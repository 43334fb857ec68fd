//! One preprocessing pass over a document: gather roots, walk, rewrite.

use serde::Serialize;
use serde_json::Value;

use crate::error::PreprocessError;
use crate::gather::{gather_component_schema_nodes, gather_schema_nodes_from_paths};
use crate::index::{RefIndex, SchemaIndex};
use crate::model::Document;
use crate::resolver::Resolver;
use crate::traverse::{traverse_schemas, TopLevelSchemaNodes};
use crate::types::{Direction, PreprocessOptions};
use crate::visitor::{schema_visitor, Rewrites};

/// What a pass did to the document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PreprocessReport {
    /// Root nodes handed to the traverser.
    pub roots: usize,
    /// Distinct schema objects visited.
    pub visited: usize,
    pub references_resolved: usize,
    pub serdes_widened: usize,
    /// Read-only properties dropped from a `required` list.
    pub read_only_unrequired: usize,
    pub parameters_merged: usize,
    /// Pointers of responses or response schemas left out of the walk.
    pub skipped_responses: Vec<String>,
}

impl PreprocessReport {
    /// True when the pass changed nothing in the document.
    pub fn is_noop(&self) -> bool {
        self.references_resolved == 0
            && self.serdes_widened == 0
            && self.read_only_unrequired == 0
            && self.parameters_merged == 0
    }
}

/// Prepares a document's schemas for direction-aware validation.
///
/// The document is mutated in place and is not observed by anything else
/// while the pass runs. Its schema graph is forked into request and response
/// views first; see [`Document::to_value_for`].
pub struct SchemaPreprocessor<'a> {
    document: &'a mut Document,
    index: &'a dyn SchemaIndex,
    options: &'a PreprocessOptions,
}

impl<'a> SchemaPreprocessor<'a> {
    pub fn new(
        document: &'a mut Document,
        index: &'a dyn SchemaIndex,
        options: &'a PreprocessOptions,
    ) -> Self {
        Self {
            document,
            index,
            options,
        }
    }

    /// Run the pass.
    ///
    /// # Errors
    ///
    /// Malformed or circular references outside responses abort the pass.
    /// The document may be partially rewritten in that case and should be
    /// discarded.
    pub fn preprocess(self) -> Result<PreprocessReport, PreprocessError> {
        let resolver = Resolver::new(self.index);
        self.document.fork_directions();

        let schemas = gather_component_schema_nodes(self.document, &resolver)?;
        let paths = gather_schema_nodes_from_paths(self.document, &resolver)?;
        let roots = TopLevelSchemaNodes {
            schemas,
            request_bodies: paths.request_bodies,
            responses: paths.responses,
        };

        let serdes = &self.options.serdes;
        let mut rewrites = Rewrites::default();
        let stats = traverse_schemas(self.document, &resolver, &roots, |doc, node, states| {
            rewrites.merge(schema_visitor(doc, node, states, serdes));
        })?;

        let report = PreprocessReport {
            roots: roots.len(),
            visited: stats.visited,
            references_resolved: stats.references_resolved,
            serdes_widened: rewrites.serdes_widened,
            read_only_unrequired: rewrites.read_only_unrequired,
            parameters_merged: paths.parameters_merged,
            skipped_responses: paths.skipped_responses,
        };
        tracing::info!(
            roots = report.roots,
            visited = report.visited,
            references = report.references_resolved,
            widened = report.serdes_widened,
            unrequired = report.read_only_unrequired,
            skipped = report.skipped_responses.len(),
            "preprocessed document"
        );
        Ok(report)
    }
}

/// Register the document's component schemas and run one pass over it.
pub fn preprocess(
    document: &mut Document,
    options: &PreprocessOptions,
) -> Result<PreprocessReport, PreprocessError> {
    let index = RefIndex::register(document);
    SchemaPreprocessor::new(document, &index, options).preprocess()
}

/// Parse, preprocess and serialize the `direction` view of a document value.
pub fn preprocess_value(
    value: Value,
    options: &PreprocessOptions,
    direction: Direction,
) -> Result<(Value, PreprocessReport), PreprocessError> {
    let mut document = Document::from_value(value)?;
    let report = preprocess(&mut document, options)?;
    Ok((document.to_value_for(direction), report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SerDes;
    use serde_json::json;

    fn pets() -> Value {
        json!({
            "openapi": "3.0.3",
            "paths": {
                "/pets": {
                    "post": {
                        "requestBody": {
                            "content": { "application/json": { "schema": { "$ref": "#/components/schemas/Pet" } } }
                        },
                        "responses": {
                            "201": {
                                "description": "created",
                                "content": { "application/json": { "schema": { "$ref": "#/components/schemas/Pet" } } }
                            }
                        }
                    }
                }
            },
            "components": {
                "schemas": {
                    "Pet": {
                        "type": "object",
                        "required": ["id", "name"],
                        "properties": {
                            "id": { "type": "string", "format": "custom-id", "readOnly": true },
                            "name": { "type": "string" }
                        }
                    }
                }
            }
        })
    }

    #[test]
    fn report_counts_rewrites() {
        let options = PreprocessOptions::new().with_serdes(SerDes::new("custom-id"));
        let (value, report) = preprocess_value(pets(), &options, Direction::Request).unwrap();

        assert_eq!(report.roots, 3);
        assert_eq!(report.visited, 3);
        assert_eq!(report.serdes_widened, 1);
        assert_eq!(report.read_only_unrequired, 1);
        assert!(report.skipped_responses.is_empty());

        let pet = &value["components"]["schemas"]["Pet"];
        assert_eq!(pet["required"], json!(["name"]));
        assert_eq!(pet["properties"]["id"]["type"], json!(["object", "string"]));

        let (value, _) = preprocess_value(pets(), &options, Direction::Response).unwrap();
        let pet = &value["components"]["schemas"]["Pet"];
        assert_eq!(pet["required"], json!(["id", "name"]));
        assert_eq!(pet["properties"]["id"]["type"], json!(["object", "string"]));
    }

    #[test]
    fn second_pass_in_memory_is_noop() {
        let options = PreprocessOptions::new().with_serdes(SerDes::new("custom-id"));
        let mut doc = Document::from_value(pets()).unwrap();

        assert!(!preprocess(&mut doc, &options).unwrap().is_noop());
        let again = preprocess(&mut doc, &options).unwrap();
        assert!(again.is_noop(), "{again:?}");
    }
}
