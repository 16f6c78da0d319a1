//! Spec loading: file or URL, hash verification, parsing, base URL derivation.

use crate::config::{ApiToolsConfig, HashPolicy};
use crate::error::{OpenApiToolsError, Result};
use crate::request::sanitize_reqwest_error;
use openapiv3::{OpenAPI, Server};
use reqwest::Client;
use sha2::{Digest, Sha256};
use url::Url;

/// A parsed document plus where it came from.
#[derive(Debug, Clone)]
pub struct LoadedSpec {
    pub location: String,
    /// `sha256:<hex>` of the raw content.
    pub hash: String,
    pub document: OpenAPI,
}

/// Load `config.spec` from a `http(s)` URL or the filesystem, verify its hash and parse it.
///
/// # Errors
///
/// Returns an error if the spec cannot be fetched/read, the hash check fails under
/// [`HashPolicy::Fail`], or the content is not a valid `OpenAPI` 3 document.
pub async fn load_spec(client: &Client, config: &ApiToolsConfig) -> Result<LoadedSpec> {
    let location = config.spec.trim();
    if location.is_empty() {
        return Err(OpenApiToolsError::Config(
            "no spec location configured".to_string(),
        ));
    }

    let content = if is_http_url(location) {
        tracing::info!(url = %location, "fetching OpenAPI spec");
        fetch(client, location).await?
    } else {
        tracing::info!(path = %location, "loading OpenAPI spec");
        tokio::fs::read_to_string(location)
            .await
            .map_err(|e| OpenApiToolsError::SpecReadFile {
                path: location.to_string(),
                source: e,
            })?
    };

    let hash = content_hash(&content);
    verify_hash(config, &hash)?;

    let document = parse_spec(&content, location)?;
    tracing::info!(
        location,
        title = %document.info.title,
        version = %document.info.version,
        paths = document.paths.paths.len(),
        "loaded OpenAPI spec"
    );

    Ok(LoadedSpec {
        location: location.to_string(),
        hash,
        document,
    })
}

async fn fetch(client: &Client, location: &str) -> Result<String> {
    let fetch_err = |message: String| OpenApiToolsError::SpecFetch {
        url: location.to_string(),
        message,
    };

    let response = client
        .get(location)
        .send()
        .await
        .map_err(|e| fetch_err(sanitize_reqwest_error(&e)))?
        .error_for_status()
        .map_err(|e| fetch_err(sanitize_reqwest_error(&e)))?;

    response
        .text()
        .await
        .map_err(|e| fetch_err(sanitize_reqwest_error(&e)))
}

/// Parse JSON or YAML content. `type: [a, b]` lists are narrowed to their first entry.
///
/// # Errors
///
/// Returns [`OpenApiToolsError::SpecParse`] if the content is not a valid document.
pub fn parse_spec(content: &str, location: &str) -> Result<OpenAPI> {
    let parse_err = |e: serde_yaml::Error| OpenApiToolsError::SpecParse {
        location: location.to_string(),
        message: e.to_string(),
    };

    // JSON is a valid subset of YAML.
    let mut raw: serde_yaml::Value = serde_yaml::from_str(content).map_err(parse_err)?;
    if !narrow_type_lists(&mut raw) {
        return serde_yaml::from_str(content).map_err(parse_err);
    }

    tracing::debug!(location, "narrowed multi-type schema declarations");
    let normalized = serde_yaml::to_string(&raw).map_err(parse_err)?;
    serde_yaml::from_str(&normalized).map_err(parse_err)
}

/// Replace every `type: [first, ...]` with `type: first`. Returns whether anything changed.
///
/// Literal payloads (`example`, `default`, `enum`, extensions, ...) are left untouched.
fn narrow_type_lists(value: &mut serde_yaml::Value) -> bool {
    use serde_yaml::Value;

    let mut changed = false;
    match value {
        Value::Mapping(map) => {
            for (key, child) in map.iter_mut() {
                match key.as_str() {
                    Some("type") => {
                        if let Some(first) = child.as_sequence().and_then(|t| t.first()).cloned() {
                            *child = first;
                            changed = true;
                        }
                    }
                    Some(k) if is_literal_payload(k) => {}
                    // Keys here are property names, not keywords.
                    Some("properties" | "patternProperties") => {
                        if let Value::Mapping(props) = child {
                            for (_, schema) in props.iter_mut() {
                                changed |= narrow_type_lists(schema);
                            }
                        }
                    }
                    _ => changed |= narrow_type_lists(child),
                }
            }
        }
        Value::Sequence(items) => {
            for item in items {
                changed |= narrow_type_lists(item);
            }
        }
        Value::Tagged(tagged) => changed |= narrow_type_lists(&mut tagged.value),
        _ => {}
    }
    changed
}

fn is_literal_payload(key: &str) -> bool {
    matches!(key, "example" | "examples" | "default" | "enum" | "const") || key.starts_with("x-")
}

#[must_use]
pub fn content_hash(content: &str) -> String {
    format!("sha256:{}", hex::encode(Sha256::digest(content.as_bytes())))
}

fn verify_hash(config: &ApiToolsConfig, actual: &str) -> Result<()> {
    let Some(expected) = config.spec_hash.as_deref() else {
        return Ok(());
    };
    if expected.eq_ignore_ascii_case(actual) {
        return Ok(());
    }

    match config.spec_hash_policy {
        HashPolicy::Fail => Err(OpenApiToolsError::OpenApi(format!(
            "Spec hash mismatch. Expected: {expected}, Got: {actual}"
        ))),
        HashPolicy::Warn => {
            tracing::warn!(spec = %config.spec, expected, actual, "spec hash mismatch");
            Ok(())
        }
        HashPolicy::Ignore => Ok(()),
    }
}

/// Effective base URL: configured `baseUrl`, else `servers[0]`, else the spec URL's origin.
///
/// Relative URLs are resolved against the spec URL.
///
/// # Errors
///
/// Returns [`OpenApiToolsError::Config`] when no absolute base URL can be derived.
pub fn resolve_base_url(config: &ApiToolsConfig, document: &OpenAPI) -> Result<String> {
    if let Some(base) = config.base_url.as_deref().map(str::trim).filter(|b| !b.is_empty()) {
        return absolutize(base, &config.spec);
    }

    if let Some(server) = document.servers.first() {
        return absolutize(&expand_server_variables(server), &config.spec);
    }

    if is_http_url(&config.spec) {
        let spec_url = parse_url(&config.spec)?;
        return Ok(spec_url.origin().ascii_serialization());
    }

    Err(OpenApiToolsError::Config(
        "no base URL: set baseUrl or declare servers in the spec".to_string(),
    ))
}

/// `{var}` placeholders in a server URL take their declared defaults.
fn expand_server_variables(server: &Server) -> String {
    let mut url = server.url.clone();
    for (name, var) in server.variables.iter().flatten() {
        url = url.replace(&format!("{{{name}}}"), &var.default);
    }
    url
}

fn absolutize(base: &str, spec_location: &str) -> Result<String> {
    if is_http_url(base) {
        return Ok(base.to_string());
    }

    if is_http_url(spec_location) {
        let mut spec_url = parse_url(spec_location)?;
        spec_url.set_fragment(None);
        let resolved = spec_url.join(base).map_err(|e| {
            OpenApiToolsError::Config(format!(
                "invalid base URL '{base}': {e} (set baseUrl explicitly)"
            ))
        })?;
        return Ok(resolved.to_string());
    }

    Err(OpenApiToolsError::Config(format!(
        "invalid base URL '{base}': must be an absolute http(s) URL (set baseUrl explicitly)"
    )))
}

fn parse_url(location: &str) -> Result<Url> {
    Url::parse(location)
        .map_err(|e| OpenApiToolsError::Config(format!("invalid spec URL '{location}': {e}")))
}

fn is_http_url(s: &str) -> bool {
    s.starts_with("http://") || s.starts_with("https://")
}
