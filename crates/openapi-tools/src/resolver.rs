//! Local `$ref` resolver.
//!
//! The `openapiv3` crate models `$ref`s using `ReferenceOr<T>` but does not resolve them.
//! This resolver handles references that point into the loaded document itself
//! (`#/components/...` or any other JSON pointer). The document is converted to a
//! `serde_json::Value` once; each lookup deserializes the pointed-to fragment into the
//! expected `openapiv3` type.
//!
//! External documents (`./common.yaml#/...`, URLs) are not supported: fetching them is the
//! spec loader's job, and the translator degrades unresolved schema refs instead of failing.

use crate::error::{OpenApiToolsError, Result};
use crate::schema::SchemaLookup;
use openapiv3::{OpenAPI, Parameter, PathItem, ReferenceOr, RequestBody, Schema};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashSet;

#[derive(Debug, Clone)]
pub struct LocalRefResolver {
    document: Value,
}

impl LocalRefResolver {
    /// Create a resolver for a loaded `OpenAPI` document.
    ///
    /// # Errors
    ///
    /// Returns an error if the document cannot be converted into JSON.
    pub fn new(spec: &OpenAPI) -> Result<Self> {
        let document = serde_json::to_value(spec)?;
        Ok(Self { document })
    }

    /// Resolve a `$ref` for a parameter.
    ///
    /// # Errors
    ///
    /// Returns an error if the reference is external, dangling, cyclic, or does not
    /// deserialize as a parameter.
    pub fn resolve_parameter(&self, param: &ReferenceOr<Parameter>) -> Result<Parameter> {
        self.resolve_reference_or(param)
    }

    /// Resolve a `$ref` for a request body.
    ///
    /// # Errors
    ///
    /// See [`Self::resolve_parameter`].
    pub fn resolve_request_body(&self, body: &ReferenceOr<RequestBody>) -> Result<RequestBody> {
        self.resolve_reference_or(body)
    }

    /// Resolve a `$ref` for a path item.
    ///
    /// # Errors
    ///
    /// See [`Self::resolve_parameter`].
    pub fn resolve_path_item(&self, item: &ReferenceOr<PathItem>) -> Result<PathItem> {
        self.resolve_reference_or(item)
    }

    fn resolve_reference_or<T>(&self, r: &ReferenceOr<T>) -> Result<T>
    where
        T: Clone + DeserializeOwned,
    {
        let mut seen: HashSet<String> = HashSet::new();
        let mut cur: ReferenceOr<T> = r.clone();

        loop {
            match cur {
                ReferenceOr::Item(item) => return Ok(item),
                ReferenceOr::Reference { reference } => {
                    if !seen.insert(reference.clone()) {
                        return Err(OpenApiToolsError::UnresolvedReference {
                            reference,
                            message: "cyclic reference chain".to_string(),
                        });
                    }
                    let value = self.pointer_value(&reference)?;
                    cur = serde_json::from_value(value.clone()).map_err(|e| {
                        OpenApiToolsError::UnresolvedReference {
                            reference: reference.clone(),
                            message: format!("unexpected referenced value: {e}"),
                        }
                    })?;
                }
            }
        }
    }

    fn pointer_value(&self, reference: &str) -> Result<&Value> {
        let pointer = parse_local_ref(reference).ok_or_else(|| {
            OpenApiToolsError::UnresolvedReference {
                reference: reference.to_string(),
                message: "only local '#/...' references are supported".to_string(),
            }
        })?;
        self.document
            .pointer(pointer)
            .ok_or_else(|| OpenApiToolsError::UnresolvedReference {
                reference: reference.to_string(),
                message: format!("missing pointer '{pointer}'"),
            })
    }
}

impl SchemaLookup for LocalRefResolver {
    fn lookup_schema(&self, reference: &str) -> Option<ReferenceOr<Schema>> {
        let value = self.pointer_value(reference).ok()?;
        serde_json::from_value(value.clone()).ok()
    }
}

/// `#/a/b` -> `/a/b`; `#` -> `""` (whole document). `None` for external refs.
fn parse_local_ref(reference: &str) -> Option<&str> {
    let fragment = reference.strip_prefix('#')?;
    (fragment.is_empty() || fragment.starts_with('/')).then_some(fragment)
}
