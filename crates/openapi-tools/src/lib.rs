//! Compile `OpenAPI` 3 operations into MCP tools.
//!
//! Load a document ([`loader`]), compile every operation into a flat, schema-described
//! tool ([`schema`], [`descriptor`]), and turn tool calls back into HTTP requests
//! ([`request`]) whose responses are rendered as text ([`response`]). [`ToolCatalog`]
//! ties these together for a tool host.
//!
//! No transport is included: hosts own session framing and registration.

pub mod catalog;
pub mod config;
pub mod descriptor;
pub mod error;
pub mod loader;
pub mod request;
pub mod resolver;
pub mod response;
pub mod schema;
pub mod semantics;

#[cfg(test)]
mod test_server;

pub use catalog::{CompiledTool, ToolCatalog};
pub use config::{ApiToolsConfig, AutoDiscoverConfig, BodyCollisionPolicy, HashPolicy};
pub use descriptor::{
    OperationDescriptor, ParamLocation, ParameterSpec, ToolDescriptor, ToolDescriptorBuilder,
};
pub use error::{OpenApiToolsError, Result};
pub use schema::{SchemaNode, SchemaTranslator};
