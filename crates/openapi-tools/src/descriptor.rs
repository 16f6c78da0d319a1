//! Operation -> tool descriptor compilation.
//!
//! [`ToolDescriptorBuilder::describe`] turns one `openapiv3` operation into an
//! [`OperationDescriptor`] (resolved parameters, translated schemas, JSON body).
//! [`ToolDescriptorBuilder::build`] flattens that into a [`ToolDescriptor`]: one
//! property namespace shared by parameters and spliced body fields, and the union of
//! their required names.

use crate::config::BodyCollisionPolicy;
use crate::error::{OpenApiToolsError, Result};
use crate::resolver::LocalRefResolver;
use crate::schema::{SchemaNode, SchemaTranslator};
use openapiv3::{Operation, Parameter, ParameterSchemaOrContent, ReferenceOr};
use regex::Regex;
use reqwest::Method;
use rmcp::model::JsonObject;
use serde_json::{Value, json};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::LazyLock;

static NON_IDENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^A-Za-z0-9_]").expect("static regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamLocation {
    Path,
    Query,
    Header,
}

impl ParamLocation {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ParamLocation::Path => "path",
            ParamLocation::Query => "query",
            ParamLocation::Header => "header",
        }
    }
}

/// One path/query/header parameter of an operation.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterSpec {
    pub name: String,
    pub location: ParamLocation,
    pub required: bool,
    pub schema: SchemaNode,
    pub description: Option<String>,
}

/// The JSON object body of an operation.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestBodySpec {
    pub media_type: String,
    /// Always object kind.
    pub schema: SchemaNode,
}

impl RequestBodySpec {
    #[must_use]
    pub fn required(&self) -> &[String] {
        self.schema.required()
    }

    /// Declared body property names.
    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.schema
            .properties()
            .into_iter()
            .flat_map(|props| props.keys().map(String::as_str))
    }
}

/// Everything the synthesizer needs to call one operation.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationDescriptor {
    pub method: Method,
    /// Path template with `{name}` placeholders.
    pub path: String,
    pub operation_id: Option<String>,
    pub summary: Option<String>,
    pub description: Option<String>,
    pub parameters: Vec<ParameterSpec>,
    pub request_body: Option<RequestBodySpec>,
}

/// A compiled tool: name, description and flat input schema.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub properties: BTreeMap<String, SchemaNode>,
    pub required: Vec<String>,
}

impl ToolDescriptor {
    /// `{"type": "object", "properties": {...}, "required": [...]}`.
    #[must_use]
    pub fn input_schema(&self) -> Value {
        Value::Object(self.input_schema_object())
    }

    #[must_use]
    pub fn input_schema_object(&self) -> JsonObject {
        let properties: serde_json::Map<String, Value> = self
            .properties
            .iter()
            .map(|(name, node)| (name.clone(), node.to_json()))
            .collect();

        let mut schema = JsonObject::new();
        schema.insert("type".to_string(), json!("object"));
        schema.insert("properties".to_string(), Value::Object(properties));
        schema.insert("required".to_string(), json!(self.required));
        schema
    }
}

/// Builds operation and tool descriptors for one loaded document.
#[derive(Clone, Copy)]
pub struct ToolDescriptorBuilder<'a> {
    resolver: &'a LocalRefResolver,
    collision: BodyCollisionPolicy,
}

impl<'a> ToolDescriptorBuilder<'a> {
    #[must_use]
    pub fn new(resolver: &'a LocalRefResolver, collision: BodyCollisionPolicy) -> Self {
        Self {
            resolver,
            collision,
        }
    }

    fn translator(&self) -> SchemaTranslator<'a> {
        SchemaTranslator::new(self.resolver)
    }

    /// Resolve and translate one operation.
    ///
    /// # Errors
    ///
    /// Returns an error if the method is not a valid HTTP method, or a parameter or
    /// request body `$ref` cannot be resolved.
    pub fn describe(
        &self,
        method: &str,
        path: &str,
        path_item_params: &[ReferenceOr<Parameter>],
        operation: &Operation,
    ) -> Result<OperationDescriptor> {
        let method = Method::from_bytes(method.to_uppercase().as_bytes()).map_err(|e| {
            OpenApiToolsError::OpenApi(format!("invalid HTTP method '{method}': {e}"))
        })?;

        let merged = self.merge_parameters(path_item_params, &operation.parameters)?;
        let parameters = merged
            .iter()
            .filter_map(|p| self.parameter_spec(p, path))
            .collect();

        let request_body = match &operation.request_body {
            Some(body) => self.request_body_spec(body, path)?,
            None => None,
        };

        Ok(OperationDescriptor {
            method,
            path: path.to_string(),
            operation_id: operation.operation_id.clone().filter(|id| !id.is_empty()),
            summary: operation.summary.clone(),
            description: operation.description.clone(),
            parameters,
            request_body,
        })
    }

    /// Flatten an operation into its tool descriptor.
    #[must_use]
    pub fn build(&self, op: &OperationDescriptor) -> ToolDescriptor {
        let name = tool_name(op);
        let mut properties: BTreeMap<String, SchemaNode> = BTreeMap::new();
        let mut required: Vec<String> = Vec::new();

        for param in &op.parameters {
            if properties
                .insert(param.name.clone(), param.schema.clone())
                .is_some()
            {
                tracing::warn!(
                    tool = %name,
                    parameter = %param.name,
                    location = param.location.as_str(),
                    "parameter name reused across locations; last one is advertised"
                );
            }
            if param.required {
                push_unique(&mut required, &param.name);
            }
        }

        if let Some(body) = &op.request_body {
            let param_names: HashSet<&str> =
                op.parameters.iter().map(|p| p.name.as_str()).collect();

            for (field, node) in body.schema.properties().into_iter().flatten() {
                if param_names.contains(field.as_str()) {
                    tracing::warn!(
                        tool = %name,
                        field = %field,
                        policy = ?self.collision,
                        "request body field collides with a parameter"
                    );
                    if self.collision == BodyCollisionPolicy::ParameterWins {
                        continue;
                    }
                }
                properties.insert(field.clone(), node.clone());
            }
            for field in body.required() {
                push_unique(&mut required, field);
            }
        }

        ToolDescriptor {
            name,
            description: tool_description(op),
            properties,
            required,
        }
    }

    /// Path-item parameters first; operation parameters replace same `(in, name)` entries.
    fn merge_parameters(
        &self,
        path_item_params: &[ReferenceOr<Parameter>],
        operation_params: &[ReferenceOr<Parameter>],
    ) -> Result<Vec<Parameter>> {
        let mut merged: Vec<Parameter> = Vec::new();
        let mut index: HashMap<(&'static str, String), usize> = HashMap::new();

        for p in path_item_params.iter().chain(operation_params) {
            let resolved = self.resolver.resolve_parameter(p)?;
            let key = (location_key(&resolved), resolved.parameter_data_ref().name.clone());
            match index.get(&key) {
                Some(&i) => merged[i] = resolved,
                None => {
                    index.insert(key, merged.len());
                    merged.push(resolved);
                }
            }
        }

        Ok(merged)
    }

    fn parameter_spec(&self, param: &Parameter, path: &str) -> Option<ParameterSpec> {
        let (location, data) = match param {
            Parameter::Path { parameter_data, .. } => (ParamLocation::Path, parameter_data),
            Parameter::Query { parameter_data, .. } => (ParamLocation::Query, parameter_data),
            Parameter::Header { parameter_data, .. } => (ParamLocation::Header, parameter_data),
            Parameter::Cookie { parameter_data, .. } => {
                tracing::debug!(
                    path,
                    parameter = %parameter_data.name,
                    "skipping cookie parameter"
                );
                return None;
            }
        };

        let schema_ref = match &data.format {
            ParameterSchemaOrContent::Schema(schema) => Some(schema),
            ParameterSchemaOrContent::Content(content) => {
                content.values().next().and_then(|mt| mt.schema.as_ref())
            }
        };
        let mut schema = self.translator().translate(schema_ref);

        let description = data.description.clone().filter(|d| !d.is_empty());
        if description.is_some() {
            schema.attrs.description.clone_from(&description);
        }

        Some(ParameterSpec {
            name: data.name.clone(),
            location,
            // Path parameters are always required in OpenAPI.
            required: data.required || location == ParamLocation::Path,
            schema,
            description,
        })
    }

    fn request_body_spec(
        &self,
        body: &ReferenceOr<openapiv3::RequestBody>,
        path: &str,
    ) -> Result<Option<RequestBodySpec>> {
        let body = self.resolver.resolve_request_body(body)?;

        let Some((media_type, media)) = body.content.iter().find(|(mt, _)| mt.contains("json"))
        else {
            tracing::debug!(path, "request body has no JSON representation");
            return Ok(None);
        };

        let schema = self.translator().translate(media.schema.as_ref());
        if !schema.is_object() {
            tracing::debug!(
                path,
                media_type = %media_type,
                "JSON body is not an object; not spliced"
            );
            return Ok(None);
        }

        Ok(Some(RequestBodySpec {
            media_type: media_type.clone(),
            schema,
        }))
    }
}

/// operationId verbatim, else `<method>_<sanitized path>`.
#[must_use]
pub fn tool_name(op: &OperationDescriptor) -> String {
    match &op.operation_id {
        Some(id) => id.clone(),
        None => canonical_name(op.method.as_str(), &op.path),
    }
}

/// `GET /users/{id}` -> `get_users_id`.
#[must_use]
pub fn canonical_name(method: &str, path: &str) -> String {
    let stripped = path.replace(['{', '}'], "");
    let sanitized = NON_IDENT.replace_all(&stripped, "_");
    format!("{}_{}", method.to_lowercase(), sanitized.trim_matches('_'))
}

fn tool_description(op: &OperationDescriptor) -> String {
    op.description
        .as_deref()
        .filter(|d| !d.is_empty())
        .or_else(|| op.summary.as_deref().filter(|s| !s.is_empty()))
        .map_or_else(
            || format!("Calls {} {}", op.method, op.path),
            str::to_string,
        )
}

fn location_key(p: &Parameter) -> &'static str {
    match p {
        Parameter::Path { .. } => "path",
        Parameter::Query { .. } => "query",
        Parameter::Header { .. } => "header",
        Parameter::Cookie { .. } => "cookie",
    }
}

fn push_unique(names: &mut Vec<String>, name: &str) {
    if !names.iter().any(|n| n == name) {
        names.push(name.to_string());
    }
}
