//! HTTP status/body -> caller-facing text.

use serde::Serialize;
use serde_json::Value;
use serde_json::ser::PrettyFormatter;

/// `Status: <code> <text>`, a blank line, then the body.
///
/// JSON bodies are pretty-printed with a two-space indent; anything else is passed
/// through as (lossy) UTF-8. An empty body yields only the status line. Never fails.
#[must_use]
pub fn format_response(status_code: u16, status_text: &str, body: &[u8]) -> String {
    let status_line = format!("Status: {status_code} {status_text}");
    let status_line = status_line.trim_end();

    if body.is_empty() {
        return status_line.to_string();
    }

    let body_text = match serde_json::from_slice::<Value>(body) {
        Ok(json) => {
            pretty_json(&json).unwrap_or_else(|| String::from_utf8_lossy(body).into_owned())
        }
        Err(_) => String::from_utf8_lossy(body).into_owned(),
    };

    format!("{status_line}\n\n{body_text}")
}

fn pretty_json(value: &Value) -> Option<String> {
    let mut out = Vec::new();
    let mut ser =
        serde_json::Serializer::with_formatter(&mut out, PrettyFormatter::with_indent(b"  "));
    value.serialize(&mut ser).ok()?;
    String::from_utf8(out).ok()
}
