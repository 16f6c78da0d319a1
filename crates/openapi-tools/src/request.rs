//! Argument mapping -> HTTP request.
//!
//! [`build_request`] is pure: it validates required arguments and assembles the URL,
//! headers and body without touching the network. [`dispatch`] performs exactly one
//! outbound call, bounded only by the caller's cancellation token.

use crate::descriptor::{OperationDescriptor, ParamLocation};
use crate::error::{OpenApiToolsError, Result};
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Method, StatusCode};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tokio_util::sync::CancellationToken;
use url::Url;

/// A fully assembled request, ready to send.
#[derive(Debug, Clone)]
pub struct RequestPlan {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Option<Value>,
}

/// A completed exchange. Any status, including non-2xx.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: StatusCode,
    pub body: Vec<u8>,
}

impl HttpResponse {
    #[must_use]
    pub fn status_text(&self) -> &'static str {
        self.status.canonical_reason().unwrap_or("")
    }
}

/// Validate `args` against `op` and assemble the outbound request.
///
/// # Errors
///
/// - [`OpenApiToolsError::MissingRequiredArgument`] when a required path, query or header
///   parameter, or a required body field, is absent or `null`.
/// - [`OpenApiToolsError::InvalidRequest`] when the URL or a header cannot be built.
pub fn build_request(
    op: &OperationDescriptor,
    base_url: &str,
    args: &Map<String, Value>,
    static_headers: &BTreeMap<String, String>,
) -> Result<RequestPlan> {
    let mut path = op.path.clone();
    let mut query: Vec<(String, String)> = Vec::new();
    let mut param_headers: Vec<(&str, String)> = Vec::new();

    for param in &op.parameters {
        let Some(value) = argument(args, &param.name) else {
            if param.required {
                return Err(OpenApiToolsError::MissingRequiredArgument {
                    name: param.name.clone(),
                });
            }
            continue;
        };

        match param.location {
            ParamLocation::Path => {
                path = path.replace(&format!("{{{}}}", param.name), &value_to_string(value));
            }
            ParamLocation::Query => match value {
                Value::Array(items) => query.extend(
                    items
                        .iter()
                        .map(|item| (param.name.clone(), value_to_string(item))),
                ),
                other => query.push((param.name.clone(), value_to_string(other))),
            },
            ParamLocation::Header => {
                param_headers.push((param.name.as_str(), value_to_string(value)));
            }
        }
    }

    let body = match &op.request_body {
        Some(spec) => {
            let required = spec.required();
            if let Some(missing) = spec
                .fields()
                .find(|f| required.iter().any(|r| r == *f) && argument(args, f).is_none())
            {
                return Err(OpenApiToolsError::MissingRequiredArgument {
                    name: missing.to_string(),
                });
            }
            let fields: Map<String, Value> = spec
                .fields()
                .filter_map(|f| argument(args, f).map(|v| (f.to_string(), v.clone())))
                .collect();
            Some(Value::Object(fields))
        }
        None => None,
    };

    let url = build_url(base_url, &path, &query)?;

    let mut headers = HeaderMap::new();
    if body.is_some() {
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    }
    for (name, value) in static_headers {
        insert_header(&mut headers, name, value)?;
    }
    for (name, value) in &param_headers {
        insert_header(&mut headers, name, value)?;
    }

    Ok(RequestPlan {
        method: op.method.clone(),
        url,
        headers,
        body,
    })
}

/// Send one request. Cancelling `cancel` aborts the in-flight exchange.
///
/// # Errors
///
/// Returns [`OpenApiToolsError::UpstreamTransport`] if the exchange does not complete.
pub async fn dispatch(
    client: &Client,
    plan: RequestPlan,
    cancel: &CancellationToken,
) -> Result<HttpResponse> {
    tracing::debug!(method = %plan.method, url = %redact_url(&plan.url), "dispatching request");

    let mut request = client
        .request(plan.method, plan.url)
        .headers(plan.headers);
    if let Some(body) = &plan.body {
        request = request.body(serde_json::to_vec(body)?);
    }

    let exchange = async {
        let response = request
            .send()
            .await
            .map_err(|e| OpenApiToolsError::UpstreamTransport(sanitize_reqwest_error(&e)))?;
        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| OpenApiToolsError::UpstreamTransport(sanitize_reqwest_error(&e)))?;
        Ok::<_, OpenApiToolsError>(HttpResponse {
            status,
            body: body.to_vec(),
        })
    };

    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(OpenApiToolsError::UpstreamTransport(
            "request cancelled".to_string(),
        )),
        result = exchange => result,
    }
}

/// [`build_request`] followed by [`dispatch`].
///
/// # Errors
///
/// See [`build_request`] and [`dispatch`].
pub async fn synthesize(
    client: &Client,
    op: &OperationDescriptor,
    base_url: &str,
    args: &Map<String, Value>,
    static_headers: &BTreeMap<String, String>,
    cancel: &CancellationToken,
) -> Result<HttpResponse> {
    let plan = build_request(op, base_url, args, static_headers)?;
    dispatch(client, plan, cancel).await
}

/// `null` counts as absent.
fn argument<'a>(args: &'a Map<String, Value>, name: &str) -> Option<&'a Value> {
    args.get(name).filter(|v| !v.is_null())
}

/// Strings unquoted; everything else as compact JSON text.
fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => String::new(),
        _ => value.to_string(),
    }
}

fn build_url(base_url: &str, path: &str, query: &[(String, String)]) -> Result<Url> {
    let mut url = Url::parse(base_url)
        .map_err(|e| OpenApiToolsError::InvalidRequest(format!("invalid base URL: {e}")))?;

    let joined = format!(
        "{}/{}",
        url.path().trim_end_matches('/'),
        path.trim_start_matches('/')
    );
    url.set_path(&joined);

    if !query.is_empty() {
        let encoded = query
            .iter()
            .map(|(k, v)| format!("{}={}", encode_query_component(k), encode_query_component(v)))
            .collect::<Vec<_>>()
            .join("&");
        let combined = match url.query() {
            Some(existing) if !existing.is_empty() => format!("{existing}&{encoded}"),
            _ => encoded,
        };
        url.set_query(Some(&combined));
    }

    Ok(url)
}

fn insert_header(headers: &mut HeaderMap, name: &str, value: &str) -> Result<()> {
    let header_name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
        OpenApiToolsError::InvalidRequest(format!("invalid header name '{name}': {e}"))
    })?;
    let header_value = HeaderValue::from_str(value).map_err(|e| {
        OpenApiToolsError::InvalidRequest(format!("invalid value for header '{name}': {e}"))
    })?;
    headers.insert(header_name, header_value);
    Ok(())
}

/// Percent-encode everything except RFC 3986 unreserved bytes.
fn encode_query_component(s: &str) -> String {
    const HEX: &[u8; 16] = b"0123456789ABCDEF";
    let mut out = String::with_capacity(s.len());
    for &b in s.as_bytes() {
        if matches!(b, b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~') {
            out.push(b as char);
        } else {
            out.push('%');
            out.push(HEX[(b >> 4) as usize] as char);
            out.push(HEX[(b & 0x0F) as usize] as char);
        }
    }
    out
}

/// Drop credentials, query and fragment before a URL reaches a log line or error.
pub(crate) fn redact_url(url: &Url) -> String {
    let mut u = url.clone();
    let _ = u.set_username("");
    let _ = u.set_password(None);
    u.set_query(None);
    u.set_fragment(None);
    u.to_string()
}

pub(crate) fn sanitize_reqwest_error(e: &reqwest::Error) -> String {
    let mut msg = e.to_string();
    if let Some(u) = e.url() {
        msg = msg.replace(u.as_str(), &redact_url(u));
    }
    msg
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{ParameterSpec, RequestBodySpec};
    use crate::schema::{SchemaKind, SchemaNode};
    use crate::test_server::EchoServer;
    use serde_json::json;
    use std::time::Duration;

    fn param(name: &str, location: ParamLocation, required: bool) -> ParameterSpec {
        ParameterSpec {
            name: name.to_string(),
            location,
            required,
            schema: SchemaNode::string(),
            description: None,
        }
    }

    fn object_body(fields: &[&str], required: &[&str]) -> RequestBodySpec {
        let mut schema = SchemaNode::primitive("object");
        schema.kind = SchemaKind::Object {
            properties: fields
                .iter()
                .map(|f| ((*f).to_string(), SchemaNode::string()))
                .collect(),
            required: required.iter().map(|r| (*r).to_string()).collect(),
            compositions: Vec::new(),
        };
        RequestBodySpec {
            media_type: "application/json".to_string(),
            schema,
        }
    }

    fn operation(
        method: Method,
        path: &str,
        parameters: Vec<ParameterSpec>,
        request_body: Option<RequestBodySpec>,
    ) -> OperationDescriptor {
        OperationDescriptor {
            method,
            path: path.to_string(),
            operation_id: None,
            summary: None,
            description: None,
            parameters,
            request_body,
        }
    }

    fn args(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn substitutes_path_and_appends_query() {
        let op = operation(
            Method::GET,
            "/users/{id}/posts/{id}",
            vec![
                param("id", ParamLocation::Path, true),
                param("tag", ParamLocation::Query, false),
                param("limit", ParamLocation::Query, false),
                param("verbose", ParamLocation::Query, false),
            ],
            None,
        );
        let plan = build_request(
            &op,
            "https://api.example.com/v1/",
            &args(json!({"id": 42, "tag": ["a b", "c&d"], "limit": null, "verbose": true})),
            &BTreeMap::new(),
        )
        .unwrap();

        assert_eq!(plan.url.path(), "/v1/users/42/posts/42");
        assert_eq!(plan.url.query(), Some("tag=a%20b&tag=c%26d&verbose=true"));
        assert!(plan.body.is_none());
        assert!(plan.headers.get(CONTENT_TYPE).is_none());
    }

    #[test]
    fn query_is_appended_to_an_existing_one() {
        let op = operation(
            Method::GET,
            "/search",
            vec![param("q", ParamLocation::Query, true)],
            None,
        );
        let plan = build_request(
            &op,
            "https://api.example.com?key=abc",
            &args(json!({"q": "rust"})),
            &BTreeMap::new(),
        )
        .unwrap();
        assert_eq!(plan.url.query(), Some("key=abc&q=rust"));
        assert_eq!(plan.url.path(), "/search");
    }

    #[test]
    fn null_required_arguments_count_as_missing() {
        let op = operation(
            Method::GET,
            "/users/{id}",
            vec![param("id", ParamLocation::Path, true)],
            None,
        );
        let err = build_request(
            &op,
            "http://localhost",
            &args(json!({"id": null})),
            &BTreeMap::new(),
        )
        .unwrap_err();
        assert!(
            matches!(&err, OpenApiToolsError::MissingRequiredArgument { name } if name == "id"),
            "{err}"
        );
        assert!(err.is_pre_dispatch());
    }

    #[test]
    fn missing_required_query_header_and_body_fields_fail() {
        let query = operation(
            Method::GET,
            "/a",
            vec![param("q", ParamLocation::Query, true)],
            None,
        );
        let header = operation(
            Method::GET,
            "/a",
            vec![param("X-Key", ParamLocation::Header, true)],
            None,
        );
        let body = operation(
            Method::POST,
            "/a",
            vec![],
            Some(object_body(&["name"], &["name"])),
        );

        for (op, expected) in [(query, "q"), (header, "X-Key"), (body, "name")] {
            let err =
                build_request(&op, "http://localhost", &Map::new(), &BTreeMap::new()).unwrap_err();
            let reported = match &err {
                OpenApiToolsError::MissingRequiredArgument { name } => name.as_str(),
                other => panic!("unexpected error: {other}"),
            };
            assert_eq!(reported, expected);
        }
    }

    #[test]
    fn required_name_without_declared_property_is_not_checked() {
        let op = operation(
            Method::POST,
            "/a",
            vec![],
            Some(object_body(&["name"], &["ghost"])),
        );
        let args = json!({"name": "x"}).as_object().cloned().unwrap();

        let plan = build_request(&op, "http://localhost", &args, &BTreeMap::new()).unwrap();
        assert_eq!(plan.body, Some(json!({"name": "x"})));
    }

    #[test]
    fn parameter_headers_override_static_headers() {
        let op = operation(
            Method::POST,
            "/a",
            vec![param("X-Api-Key", ParamLocation::Header, false)],
            Some(object_body(&["name", "note"], &[])),
        );
        let mut static_headers = BTreeMap::new();
        static_headers.insert("x-api-key".to_string(), "static".to_string());
        static_headers.insert("x-client".to_string(), "cli".to_string());

        let plan = build_request(
            &op,
            "http://localhost",
            &args(json!({"X-Api-Key": "param", "name": "rex", "extra": 1})),
            &static_headers,
        )
        .unwrap();

        assert_eq!(plan.headers.get_all("x-api-key").iter().count(), 1);
        assert_eq!(plan.headers["x-api-key"], "param");
        assert_eq!(plan.headers["x-client"], "cli");
        assert_eq!(plan.headers[CONTENT_TYPE], "application/json");
        assert_eq!(plan.body, Some(json!({"name": "rex"})));
    }

    #[test]
    fn static_content_type_overrides_default() {
        let op = operation(Method::POST, "/a", vec![], Some(object_body(&["x"], &[])));
        let mut static_headers = BTreeMap::new();
        static_headers.insert(
            "Content-Type".to_string(),
            "application/merge-patch+json".to_string(),
        );
        let plan =
            build_request(&op, "http://localhost", &Map::new(), &static_headers).unwrap();
        assert_eq!(plan.headers[CONTENT_TYPE], "application/merge-patch+json");
        assert_eq!(plan.body, Some(json!({})));
    }

    #[test]
    fn invalid_header_value_is_rejected_before_dispatch() {
        let op = operation(
            Method::GET,
            "/a",
            vec![param("X-Bad", ParamLocation::Header, false)],
            None,
        );
        let err = build_request(
            &op,
            "http://localhost",
            &args(json!({"X-Bad": "line\nbreak"})),
            &BTreeMap::new(),
        )
        .unwrap_err();
        assert!(matches!(err, OpenApiToolsError::InvalidRequest(_)), "{err}");
    }

    #[test]
    fn redacts_credentials_and_query() {
        let url = Url::parse("https://user:pw@api.example.com/x?token=secret#frag").unwrap();
        assert_eq!(redact_url(&url), "https://api.example.com/x");
    }

    #[tokio::test]
    async fn dispatch_sends_headers_query_and_body() {
        let server = EchoServer::start().await;
        let op = operation(
            Method::PUT,
            "/pets/{petId}",
            vec![
                param("petId", ParamLocation::Path, true),
                param("dryRun", ParamLocation::Query, false),
                param("X-Trace", ParamLocation::Header, false),
            ],
            Some(object_body(&["name", "tags"], &["name"])),
        );
        let mut static_headers = BTreeMap::new();
        static_headers.insert("x-static".to_string(), "1".to_string());

        let response = synthesize(
            &Client::new(),
            &op,
            &server.base_url,
            &args(json!({
                "petId": "p-1",
                "dryRun": false,
                "X-Trace": "abc",
                "name": "rex",
                "tags": ["good", "dog"]
            })),
            &static_headers,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(response.status, StatusCode::OK);
        let echoed: Value = serde_json::from_slice(&response.body).unwrap();
        assert_eq!(echoed["method"], "PUT");
        assert_eq!(echoed["path"], "/pets/p-1");
        assert_eq!(echoed["query"], "dryRun=false");
        assert_eq!(echoed["headers"]["x-trace"], "abc");
        assert_eq!(echoed["headers"]["x-static"], "1");
        assert_eq!(echoed["headers"]["content-type"], "application/json");
        assert_eq!(echoed["body"], json!({"name": "rex", "tags": ["good", "dog"]}));
        assert_eq!(server.hits(), 1);
    }

    #[tokio::test]
    async fn missing_argument_makes_no_network_call() {
        let server = EchoServer::start().await;
        let op = operation(
            Method::GET,
            "/users/{id}",
            vec![param("id", ParamLocation::Path, true)],
            None,
        );

        let err = synthesize(
            &Client::new(),
            &op,
            &server.base_url,
            &Map::new(),
            &BTreeMap::new(),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, OpenApiToolsError::MissingRequiredArgument { .. }));
        assert_eq!(server.hits(), 0);
    }

    #[tokio::test]
    async fn cancellation_aborts_in_flight_call() {
        let server = EchoServer::start().await;
        let op = operation(Method::GET, "/slow", vec![], None);
        let cancel = CancellationToken::new();

        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            canceller.cancel();
        });

        let started = std::time::Instant::now();
        let err = synthesize(
            &Client::new(),
            &op,
            &server.base_url,
            &Map::new(),
            &BTreeMap::new(),
            &cancel,
        )
        .await
        .unwrap_err();

        assert!(matches!(err, OpenApiToolsError::UpstreamTransport(_)), "{err}");
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn connection_failure_is_a_transport_error() {
        // Bind then drop to get a port with nothing listening.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let op = operation(Method::GET, "/a", vec![], None);
        let err = synthesize(
            &Client::new(),
            &op,
            &format!("http://{addr}"),
            &Map::new(),
            &BTreeMap::new(),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, OpenApiToolsError::UpstreamTransport(_)), "{err}");
        assert!(!err.is_pre_dispatch());
    }
}
