use crate::error::{OpenApiToolsError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Configuration for compiling one `OpenAPI` document into tools.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiToolsConfig {
    /// Where to load the document from: `http(s)` URL or filesystem path.
    #[serde(default)]
    pub spec: String,

    /// Expected `sha256:<hex>` of the raw document.
    #[serde(default)]
    pub spec_hash: Option<String>,

    /// What a hash mismatch does.
    #[serde(default)]
    pub spec_hash_policy: HashPolicy,

    /// Takes precedence over `servers[0]` and the spec URL's origin.
    #[serde(default)]
    pub base_url: Option<String>,

    /// Static headers sent with every request (header parameters may override them).
    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    /// Which operations become tools.
    #[serde(default)]
    pub auto_discover: AutoDiscoverConfig,

    /// What happens when a request-body field has the same name as a parameter.
    #[serde(default)]
    pub body_collision: BodyCollisionPolicy,
}

impl ApiToolsConfig {
    /// Load a config file (YAML or JSON).
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content =
            std::fs::read_to_string(path).map_err(|e| OpenApiToolsError::SpecReadFile {
                path: path.display().to_string(),
                source: e,
            })?;
        // JSON is a valid subset of YAML.
        let cfg: Self = serde_yaml::from_str(&content).map_err(|e| {
            OpenApiToolsError::Config(format!("failed to parse config '{}': {e}", path.display()))
        })?;
        Ok(cfg)
    }

    /// Start from a bare spec location with all defaults.
    #[must_use]
    pub fn for_spec(spec: impl Into<String>) -> Self {
        Self {
            spec: spec.into(),
            ..Self::default()
        }
    }
}

/// Reaction to a `specHash` mismatch.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HashPolicy {
    #[default]
    Warn,
    /// Abort loading.
    Fail,
    Ignore,
}

/// Collision policy for body fields that share a name with a parameter.
///
/// Both entries consume the same argument at call time; the policy only decides which
/// schema is advertised in the flat input schema.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum BodyCollisionPolicy {
    /// Body is applied after parameters and overwrites the parameter entry.
    #[default]
    BodyWins,
    /// The parameter entry is kept; the body field's schema is dropped.
    ParameterWins,
}

/// `true`/`false`, or include/exclude globs over `"<METHOD> <path>"`.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum AutoDiscoverConfig {
    /// Simple boolean: true = discover all, false = nothing.
    Enabled(bool),
    /// Detailed configuration with include/exclude (`"GET /users/*"` style globs).
    Detailed {
        #[serde(default)]
        include: Vec<String>,
        #[serde(default)]
        exclude: Vec<String>,
    },
}

impl Default for AutoDiscoverConfig {
    fn default() -> Self {
        AutoDiscoverConfig::Enabled(true)
    }
}

impl AutoDiscoverConfig {
    /// Whether `"<METHOD> <path>"` should become a tool. Exclude patterns win.
    #[must_use]
    pub fn allows(&self, method: &str, path: &str) -> bool {
        let (include, exclude) = match self {
            AutoDiscoverConfig::Enabled(enabled) => return *enabled,
            AutoDiscoverConfig::Detailed { include, exclude } => {
                (include.as_slice(), exclude.as_slice())
            }
        };

        let operation = format!("{} {path}", method.to_uppercase());
        let matches = |patterns: &[String]| patterns.iter().any(|p| glob_match(p, &operation));

        !matches(exclude) && (include.is_empty() || matches(include))
    }
}

/// `*` matches any sequence, `?` any single byte; everything else is literal.
fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern = pattern.as_bytes();
    let text = text.as_bytes();

    let (mut p, mut t) = (0usize, 0usize);
    let mut backtrack: Option<(usize, usize)> = None;

    while t < text.len() {
        match pattern.get(p) {
            Some(b'*') => {
                backtrack = Some((p, t));
                p += 1;
            }
            Some(b'?') => {
                p += 1;
                t += 1;
            }
            Some(&b) if b == text[t] => {
                p += 1;
                t += 1;
            }
            _ => {
                let Some((star_p, star_t)) = backtrack else {
                    return false;
                };
                p = star_p + 1;
                t = star_t + 1;
                backtrack = Some((star_p, star_t + 1));
            }
        }
    }

    while pattern.get(p) == Some(&b'*') {
        p += 1;
    }
    p == pattern.len()
}
