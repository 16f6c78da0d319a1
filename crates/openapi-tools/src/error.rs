//! Error types for `openapi-mcp-tools`.

use thiserror::Error;

/// Main error type for `OpenAPI` tool compilation and invocation.
#[derive(Error, Debug)]
pub enum OpenApiToolsError {
    /// Configuration errors (invalid config, missing base URL, bad static headers).
    #[error("Configuration error: {0}")]
    Config(String),

    /// `OpenAPI` errors (unsupported constructs, malformed documents).
    #[error("OpenAPI error: {0}")]
    OpenApi(String),

    #[error("OpenAPI error: failed to fetch spec from '{url}': {message}")]
    SpecFetch { url: String, message: String },

    #[error("OpenAPI error: failed to read spec file '{path}': {source}")]
    SpecReadFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("OpenAPI error: failed to parse OpenAPI spec from '{location}': {message}")]
    SpecParse { location: String, message: String },

    /// A `$ref` for a parameter, request body or path item could not be resolved.
    #[error("Unresolved $ref '{reference}': {message}")]
    UnresolvedReference { reference: String, message: String },

    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    /// A required argument was absent (or `null`). No request was sent.
    #[error("Missing required argument: {name}")]
    MissingRequiredArgument { name: String },

    /// The request could not be assembled (bad URL, bad header value).
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The outbound call did not complete (DNS, connect, body read, cancellation).
    #[error("Upstream request failed: {0}")]
    UpstreamTransport(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl OpenApiToolsError {
    /// True for errors that fail a single tool invocation (as opposed to load-time errors).
    #[must_use]
    pub fn is_invocation_failure(&self) -> bool {
        matches!(
            self,
            Self::ToolNotFound(_)
                | Self::MissingRequiredArgument { .. }
                | Self::InvalidRequest(_)
                | Self::UpstreamTransport(_)
        )
    }

    /// True when no network call was attempted for the failed invocation.
    #[must_use]
    pub fn is_pre_dispatch(&self) -> bool {
        matches!(
            self,
            Self::ToolNotFound(_) | Self::MissingRequiredArgument { .. } | Self::InvalidRequest(_)
        )
    }
}

/// Result type alias for `OpenAPI` tooling operations.
pub type Result<T> = std::result::Result<T, OpenApiToolsError>;
