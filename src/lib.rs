//! OpenAPI Schema Preprocessor
//!
//! Prepares an OpenAPI document's schema graph for direction-aware request
//! and response validation.
//!
//! One pass over the document resolves `$ref`s at their point of use, walks
//! every reachable schema exactly once (shared and cyclic schemas included)
//! and rewrites nodes in place:
//!
//! - `type: string` schemas whose `format` has a registered serdes are widened
//!   to `["object", "string"]`, so payloads may carry either the wire string
//!   or the deserialized value.
//! - `readOnly` properties are dropped from their parent's `required` list in
//!   the request view of the document. The response view keeps them.
//!
//! # Example
//!
//! ```
//! use openapi_preprocess::{preprocess_value, Direction, PreprocessOptions, SerDes};
//! use serde_json::json;
//!
//! let document = json!({
//!     "openapi": "3.0.3",
//!     "paths": {},
//!     "components": {
//!         "schemas": {
//!             "Pet": {
//!                 "type": "object",
//!                 "required": ["id", "name"],
//!                 "properties": {
//!                     "id": { "type": "string", "readOnly": true },
//!                     "name": { "type": "string" },
//!                     "born": { "type": "string", "format": "date" }
//!                 }
//!             }
//!         }
//!     }
//! });
//!
//! let options = PreprocessOptions::new().with_serdes(SerDes::new("date"));
//! let (request, report) = preprocess_value(document, &options, Direction::Request).unwrap();
//!
//! let pet = &request["components"]["schemas"]["Pet"];
//! assert_eq!(pet["required"], json!(["name"]));
//! assert_eq!(pet["properties"]["born"]["type"], json!(["object", "string"]));
//! assert_eq!(report.read_only_unrequired, 1);
//! ```
//!
//! # Rewrite Rules
//!
//! | Rule | Request view | Response view |
//! |------|--------------|---------------|
//! | serdes `format` on `type: string` | widen type | widen type |
//! | `readOnly` property | remove from `required` | unchanged |
//!
//! Running the pass again over its own output changes nothing.

mod error;
mod gather;
mod index;
mod loader;
mod model;
mod preprocessor;
mod resolver;
mod traverse;
mod types;
mod validator;
mod visitor;

pub use error::{PreprocessError, SchemaError, ValidateError, ValidationFailure};
pub use gather::{
    gather_component_schema_nodes, gather_schema_nodes_from_paths, merge_path_level_parameters,
    PathSchemaNodes,
};
pub use index::{RefIndex, SchemaIndex};
pub use loader::{
    is_url, load_document, load_document_auto, load_document_str, load_value, load_value_auto,
    parse_value, Syntax,
};
pub use model::{
    ChildLink, Components, DocPath, Document, HttpMethod, MediaType, Operation, Parameter,
    PathItem, RefOr, RequestBody, Response, Schema, SchemaArena, SchemaId, SchemaObject,
    SchemaRef, SchemaType,
};
pub use preprocessor::{preprocess, preprocess_value, PreprocessReport, SchemaPreprocessor};
pub use resolver::Resolver;
pub use traverse::{
    traverse_schemas, Node, TopLevelSchemaNodes, TraversalState, TraversalStates, TraversalStats,
};
pub use types::{
    json_type_name, Direction, Format, PreprocessOptions, RemoveAdditional, SerDes, SerDesMap,
    ValidateRequestOpts,
};
pub use validator::{Body, DocumentValidator, RequestShape};
pub use visitor::{handle_read_only, handle_serdes, schema_visitor, Rewrites};

#[cfg(feature = "remote")]
pub use loader::load_value_url;
