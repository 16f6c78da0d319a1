//! Tool annotations derived from HTTP method semantics (RFC 9110).

use reqwest::Method;
use rmcp::model::ToolAnnotations;

/// `(read_only, destructive, idempotent)`; `None` where the method does not say.
fn method_hints(method: &Method) -> (Option<bool>, Option<bool>, Option<bool>) {
    match method.as_str() {
        "GET" | "HEAD" | "OPTIONS" | "TRACE" => (Some(true), Some(false), Some(true)),
        "POST" => (Some(false), Some(false), Some(false)),
        "PUT" | "DELETE" => (Some(false), Some(true), Some(true)),
        // PATCH may or may not be idempotent.
        "PATCH" => (Some(false), Some(true), None),
        _ => (None, None, None),
    }
}

/// Annotations for an operation tool. Every tool talks to an external API, so
/// `openWorldHint` is always set.
#[must_use]
pub fn annotations_for_operation(method: &Method, title: Option<&str>) -> ToolAnnotations {
    let (read_only_hint, destructive_hint, idempotent_hint) = method_hints(method);
    ToolAnnotations {
        title: title.filter(|t| !t.is_empty()).map(str::to_string),
        read_only_hint,
        destructive_hint,
        idempotent_hint,
        open_world_hint: Some(true),
    }
}
