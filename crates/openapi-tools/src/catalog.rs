//! Compiled tool set for one `OpenAPI` document.
//!
//! [`ToolCatalog`] walks every path item and method, compiles each accepted operation into
//! a [`CompiledTool`], and serves the `(name, description, inputSchema, handler)` surface a
//! tool host needs. Everything is read-only after construction; clones share state.

use crate::config::{ApiToolsConfig, AutoDiscoverConfig};
use crate::descriptor::{OperationDescriptor, ToolDescriptor, ToolDescriptorBuilder};
use crate::error::{OpenApiToolsError, Result};
use crate::loader::{load_spec, resolve_base_url};
use crate::request::synthesize;
use crate::resolver::LocalRefResolver;
use crate::response::format_response;
use crate::semantics::annotations_for_operation;
use openapiv3::{OpenAPI, Operation, PathItem};
use reqwest::Client;
use reqwest::header::{HeaderName, HeaderValue};
use rmcp::model::{CallToolResult, Content, JsonObject, Tool};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// One operation ready to be listed and invoked.
#[derive(Debug, Clone)]
pub struct CompiledTool {
    pub descriptor: ToolDescriptor,
    pub operation: OperationDescriptor,
}

#[derive(Debug)]
struct CatalogInner {
    title: String,
    base_url: String,
    headers: BTreeMap<String, String>,
    client: Client,
    tools: Vec<CompiledTool>,
    by_name: HashMap<String, usize>,
}

#[derive(Debug, Clone)]
pub struct ToolCatalog {
    inner: Arc<CatalogInner>,
}

impl ToolCatalog {
    /// Load `config.spec` and compile it.
    ///
    /// # Errors
    ///
    /// Returns an error if the spec cannot be loaded, no base URL can be derived, or a
    /// static header is invalid.
    pub async fn load(config: &ApiToolsConfig) -> Result<Self> {
        let client = Client::builder()
            .build()
            .map_err(|e| OpenApiToolsError::Config(format!("failed to build HTTP client: {e}")))?;
        let loaded = load_spec(&client, config).await?;
        Self::from_document(client, config, &loaded.document)
    }

    /// Compile an already-parsed document.
    ///
    /// Operations that fail to compile (unresolvable parameter or body refs) are skipped
    /// with a warning.
    ///
    /// # Errors
    ///
    /// Returns an error if no base URL can be derived or a static header is invalid.
    pub fn from_document(
        client: Client,
        config: &ApiToolsConfig,
        document: &OpenAPI,
    ) -> Result<Self> {
        validate_static_headers(&config.headers)?;
        let base_url = resolve_base_url(config, document)?;
        let resolver = LocalRefResolver::new(document)?;
        let builder = ToolDescriptorBuilder::new(&resolver, config.body_collision);

        let tools = compile(document, &resolver, &builder, &config.auto_discover);
        let by_name = tools
            .iter()
            .enumerate()
            .map(|(i, t)| (t.descriptor.name.clone(), i))
            .collect();

        tracing::info!(
            title = %document.info.title,
            base_url = %base_url,
            tools = tools.len(),
            "compiled OpenAPI tools"
        );

        Ok(Self {
            inner: Arc::new(CatalogInner {
                title: document.info.title.clone(),
                base_url,
                headers: config.headers.clone(),
                client,
                tools,
                by_name,
            }),
        })
    }

    #[must_use]
    pub fn title(&self) -> &str {
        &self.inner.title
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.inner.base_url
    }

    #[must_use]
    pub fn tools(&self) -> &[CompiledTool] {
        &self.inner.tools
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&CompiledTool> {
        self.inner.by_name.get(name).map(|&i| &self.inner.tools[i])
    }

    /// MCP tool definitions, in discovery order.
    #[must_use]
    pub fn list_tools(&self) -> Vec<Tool> {
        self.inner
            .tools
            .iter()
            .map(|t| {
                let mut tool = Tool::new(
                    t.descriptor.name.clone(),
                    t.descriptor.description.clone(),
                    Arc::new(t.descriptor.input_schema_object()),
                );
                tool.annotations = Some(annotations_for_operation(
                    &t.operation.method,
                    t.operation.summary.as_deref(),
                ));
                tool
            })
            .collect()
    }

    /// Invoke a tool and return the formatted response text.
    ///
    /// Non-2xx upstream statuses are successful invocations.
    ///
    /// # Errors
    ///
    /// - [`OpenApiToolsError::ToolNotFound`] for an unknown name.
    /// - [`OpenApiToolsError::MissingRequiredArgument`] / [`OpenApiToolsError::InvalidRequest`]
    ///   before any network call.
    /// - [`OpenApiToolsError::UpstreamTransport`] if the exchange does not complete.
    pub async fn invoke(
        &self,
        name: &str,
        arguments: &JsonObject,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let tool = self
            .get(name)
            .ok_or_else(|| OpenApiToolsError::ToolNotFound(name.to_string()))?;

        let response = synthesize(
            &self.inner.client,
            &tool.operation,
            &self.inner.base_url,
            arguments,
            &self.inner.headers,
            cancel,
        )
        .await?;

        tracing::debug!(
            tool = name,
            status = %response.status,
            bytes = response.body.len(),
            "tool call completed"
        );
        Ok(format_response(
            response.status.as_u16(),
            response.status_text(),
            &response.body,
        ))
    }

    /// [`Self::invoke`] wrapped as an MCP result; failures become `is_error` results.
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: Option<JsonObject>,
        cancel: &CancellationToken,
    ) -> CallToolResult {
        let arguments = arguments.unwrap_or_default();
        match self.invoke(name, &arguments, cancel).await {
            Ok(text) => CallToolResult::success(vec![Content::text(text)]),
            Err(e) => {
                if e.is_invocation_failure() {
                    tracing::warn!(tool = name, error = %e, "tool call failed");
                } else {
                    tracing::error!(tool = name, error = %e, "tool call failed unexpectedly");
                }
                CallToolResult::error(vec![Content::text(e.to_string())])
            }
        }
    }
}

fn compile(
    document: &OpenAPI,
    resolver: &LocalRefResolver,
    builder: &ToolDescriptorBuilder<'_>,
    filter: &AutoDiscoverConfig,
) -> Vec<CompiledTool> {
    let mut tools = Vec::new();
    let mut reserved: HashSet<String> = HashSet::new();

    for (path, item) in &document.paths.paths {
        let item = match resolver.resolve_path_item(item) {
            Ok(item) => item,
            Err(e) => {
                tracing::warn!(path = %path, error = %e, "skipping path item");
                continue;
            }
        };

        for (method, op) in operations(&item) {
            if !filter.allows(method, path) {
                tracing::debug!(method, path = %path, "operation excluded by autoDiscover");
                continue;
            }

            let operation = match builder.describe(method, path, &item.parameters, op) {
                Ok(operation) => operation,
                Err(e) => {
                    tracing::warn!(method, path = %path, error = %e, "skipping operation");
                    continue;
                }
            };

            let mut descriptor = builder.build(&operation);
            let unique = reserve_unique_name(&mut reserved, &descriptor.name);
            if unique != descriptor.name {
                tracing::warn!(
                    name = %descriptor.name,
                    renamed = %unique,
                    method,
                    path = %path,
                    "duplicate tool name"
                );
                descriptor.name = unique;
            }

            tools.push(CompiledTool {
                descriptor,
                operation,
            });
        }
    }

    tools
}

fn operations(item: &PathItem) -> impl Iterator<Item = (&'static str, &Operation)> {
    [
        ("get", item.get.as_ref()),
        ("put", item.put.as_ref()),
        ("post", item.post.as_ref()),
        ("delete", item.delete.as_ref()),
        ("options", item.options.as_ref()),
        ("head", item.head.as_ref()),
        ("patch", item.patch.as_ref()),
        ("trace", item.trace.as_ref()),
    ]
    .into_iter()
    .filter_map(|(method, op)| op.map(|op| (method, op)))
}

fn reserve_unique_name(reserved: &mut HashSet<String>, base: &str) -> String {
    if reserved.insert(base.to_string()) {
        return base.to_string();
    }

    let mut counter = 1;
    loop {
        let candidate = format!("{base}_{counter}");
        if reserved.insert(candidate.clone()) {
            return candidate;
        }
        counter += 1;
    }
}

fn validate_static_headers(headers: &BTreeMap<String, String>) -> Result<()> {
    for (name, value) in headers {
        HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
            OpenApiToolsError::Config(format!("invalid header name '{name}': {e}"))
        })?;
        HeaderValue::from_str(value).map_err(|e| {
            OpenApiToolsError::Config(format!("invalid value for header '{name}': {e}"))
        })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BodyCollisionPolicy;
    use crate::test_server::EchoServer;
    use serde_json::{Value, json};

    const SPEC: &str = r#"
openapi: "3.0.3"
info: { title: Pets, version: "1" }
paths:
  /pets:
    get:
      operationId: listPets
      summary: List pets
      parameters:
        - { name: limit, in: query, schema: { type: integer } }
      responses: {}
    post:
      operationId: createPet
      requestBody:
        content:
          application/json:
            schema: { $ref: '#/components/schemas/NewPet' }
      responses: {}
  /pets/{petId}:
    parameters:
      - { name: petId, in: path, required: true, schema: { type: string } }
    get:
      operationId: getPet
      responses: {}
    delete:
      responses: {}
  /missing/{id}:
    get:
      operationId: getMissing
      parameters:
        - { name: id, in: path, required: true, schema: { type: string } }
      responses: {}
  /text:
    get: { operationId: getText, responses: {} }
  /empty:
    get: { operationId: getEmpty, responses: {} }
  /dup:
    get: { operationId: listPets, responses: {} }
  /broken:
    get:
      operationId: broken
      parameters:
        - $ref: '#/components/parameters/Nope'
      responses: {}
components:
  schemas:
    NewPet:
      type: object
      required: [name]
      properties:
        name: { type: string }
        tag: { type: string }
"#;

    fn catalog(base_url: &str, config: impl FnOnce(&mut ApiToolsConfig)) -> ToolCatalog {
        let document: OpenAPI = serde_yaml::from_str(SPEC).unwrap();
        let mut cfg = ApiToolsConfig::for_spec("inline");
        cfg.base_url = Some(base_url.to_string());
        config(&mut cfg);
        ToolCatalog::from_document(Client::new(), &cfg, &document).unwrap()
    }

    fn text(result: &CallToolResult) -> String {
        result
            .content
            .iter()
            .filter_map(|c| c.as_text().map(|t| t.text.clone()))
            .collect()
    }

    #[test]
    fn lists_every_operation_with_unique_names() {
        let catalog = catalog("http://127.0.0.1:1", |_| {});
        let names: Vec<_> = catalog
            .tools()
            .iter()
            .map(|t| t.descriptor.name.as_str())
            .collect();

        assert_eq!(
            names,
            [
                "listPets",
                "createPet",
                "getPet",
                "delete_pets_petId",
                "getMissing",
                "getText",
                "getEmpty",
                "listPets_1",
            ]
        );
        assert!(catalog.get("broken").is_none());
        assert_eq!(catalog.title(), "Pets");
    }

    #[test]
    fn mcp_tools_carry_schema_and_annotations() {
        let catalog = catalog("http://127.0.0.1:1", |_| {});
        let tools = catalog.list_tools();

        let list = tools.iter().find(|t| t.name == "listPets").unwrap();
        let annotations = list.annotations.as_ref().unwrap();
        assert_eq!(annotations.read_only_hint, Some(true));
        assert_eq!(annotations.title.as_deref(), Some("List pets"));

        let create = tools.iter().find(|t| t.name == "createPet").unwrap();
        let schema = Value::Object((*create.input_schema).clone());
        assert_eq!(schema["type"], "object");
        assert_eq!(schema["required"], json!(["name"]));
        assert_eq!(
            schema["properties"]["name"],
            json!({"type": "string"})
        );

        let get = tools.iter().find(|t| t.name == "getPet").unwrap();
        assert_eq!(get.input_schema["required"], json!(["petId"]));
    }

    #[test]
    fn auto_discover_filter_is_applied() {
        let catalog = catalog("http://127.0.0.1:1", |cfg| {
            cfg.auto_discover = AutoDiscoverConfig::Detailed {
                include: vec!["* /pets*".to_string()],
                exclude: vec!["DELETE *".to_string()],
            };
        });
        let names: Vec<_> = catalog
            .tools()
            .iter()
            .map(|t| t.descriptor.name.as_str())
            .collect();
        assert_eq!(names, ["listPets", "createPet", "getPet"]);
    }

    #[test]
    fn invalid_static_header_fails_construction() {
        let document: OpenAPI = serde_yaml::from_str(SPEC).unwrap();
        let mut cfg = ApiToolsConfig::for_spec("inline");
        cfg.base_url = Some("http://127.0.0.1:1".to_string());
        cfg.headers.insert("bad header".to_string(), "x".to_string());
        let err = ToolCatalog::from_document(Client::new(), &cfg, &document).unwrap_err();
        assert!(matches!(err, OpenApiToolsError::Config(_)));
    }

    #[tokio::test]
    async fn not_found_json_is_a_successful_invocation() {
        let server = EchoServer::start().await;
        let catalog = catalog(&server.base_url, |_| {});

        let result = catalog
            .call_tool(
                "getMissing",
                json!({"id": "7"}).as_object().cloned(),
                &CancellationToken::new(),
            )
            .await;

        assert_ne!(result.is_error, Some(true));
        assert_eq!(
            text(&result),
            "Status: 404 Not Found\n\n{\n  \"error\": \"not found\"\n}"
        );
    }

    #[tokio::test]
    async fn invoke_round_trips_through_upstream() {
        let server = EchoServer::start().await;
        let catalog = catalog(&server.base_url, |cfg| {
            cfg.headers
                .insert("Authorization".to_string(), "Bearer t".to_string());
        });

        let out = catalog
            .invoke(
                "createPet",
                json!({"name": "rex", "tag": null}).as_object().unwrap(),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        let (status, body) = out.split_once("\n\n").unwrap();
        assert_eq!(status, "Status: 200 OK");
        let echoed: Value = serde_json::from_str(body).unwrap();
        assert_eq!(echoed["method"], "POST");
        assert_eq!(echoed["path"], "/pets");
        assert_eq!(echoed["headers"]["authorization"], "Bearer t");
        assert_eq!(echoed["body"], json!({"name": "rex"}));

        let text = catalog
            .invoke("getText", &JsonObject::new(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(text, "Status: 200 OK\n\nhello");

        let empty = catalog
            .invoke("getEmpty", &JsonObject::new(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(empty, "Status: 204 No Content");
    }

    #[tokio::test]
    async fn invocation_failures_become_error_results() {
        let server = EchoServer::start().await;
        let catalog = catalog(&server.base_url, |cfg| {
            cfg.body_collision = BodyCollisionPolicy::ParameterWins;
        });

        let missing = catalog
            .call_tool("getPet", None, &CancellationToken::new())
            .await;
        assert_eq!(missing.is_error, Some(true));
        assert!(text(&missing).contains("petId"));

        let unknown = catalog
            .call_tool("nope", None, &CancellationToken::new())
            .await;
        assert_eq!(unknown.is_error, Some(true));
        assert!(text(&unknown).contains("Tool not found"));

        assert_eq!(server.hits(), 0);
    }
}
