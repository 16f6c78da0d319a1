use anyhow::{Context as _, bail};
use clap::{Args, Parser, Subcommand, ValueEnum};
use openapi_mcp_tools::{ApiToolsConfig, ToolCatalog};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Compile an `OpenAPI` 3 document into MCP tools, list them, or call one.
#[derive(Debug, Parser)]
#[command(name = "openapi-mcp", version)]
struct Cli {
    /// Log filter directives (falls back to `RUST_LOG`).
    #[arg(long, global = true, env = "OPENAPI_MCP_LOG")]
    log_level: Option<String>,

    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print the compiled tools as JSON.
    List {
        #[command(flatten)]
        spec: SpecArgs,
    },
    /// Invoke one tool and print the formatted response.
    Call {
        /// Tool name as printed by `list`.
        tool: String,

        /// Arguments as a JSON object.
        #[arg(long, default_value = "{}")]
        args: String,

        /// Cancel the call after this many seconds.
        #[arg(long)]
        timeout_secs: Option<u64>,

        #[command(flatten)]
        spec: SpecArgs,
    },
}

#[derive(Debug, Args)]
struct SpecArgs {
    /// Spec file path or http(s) URL. Overrides `spec` from --config.
    #[arg(long, env = "OPENAPI_MCP_SPEC")]
    spec: Option<String>,

    /// YAML or JSON config file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the base URL derived from the spec.
    #[arg(long)]
    base_url: Option<String>,

    /// Static header sent with every request (`Name=value`, repeatable).
    #[arg(long = "header", value_parser = parse_header)]
    headers: Vec<(String, String)>,
}

impl SpecArgs {
    fn into_config(self) -> anyhow::Result<ApiToolsConfig> {
        let mut cfg = match &self.config {
            Some(path) => {
                let mut cfg = ApiToolsConfig::from_file(path)
                    .with_context(|| format!("load config {}", path.display()))?;
                cfg.spec = relative_to_config(&cfg.spec, path);
                cfg
            }
            None => ApiToolsConfig::default(),
        };

        if let Some(spec) = self.spec {
            cfg.spec = spec;
        }
        if cfg.spec.trim().is_empty() {
            bail!("no spec given: pass --spec or set `spec` in the config file");
        }
        if let Some(base_url) = self.base_url {
            cfg.base_url = Some(base_url);
        }
        cfg.headers.extend(self.headers);

        Ok(cfg)
    }
}

/// Relative spec paths in a config file are relative to that file.
fn relative_to_config(spec: &str, config_path: &Path) -> String {
    let is_url = spec.starts_with("http://") || spec.starts_with("https://");
    if spec.is_empty() || is_url || Path::new(spec).is_absolute() {
        return spec.to_string();
    }
    match config_path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.join(spec).display().to_string(),
        _ => spec.to_string(),
    }
}

fn parse_header(s: &str) -> Result<(String, String), String> {
    let (name, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected Name=value, got '{s}'"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("empty header name in '{s}'"));
    }
    Ok((name.to_string(), value.to_string()))
}

fn parse_arguments(raw: &str) -> anyhow::Result<Map<String, Value>> {
    match serde_json::from_str::<Value>(raw).context("--args is not valid JSON")? {
        Value::Object(map) => Ok(map),
        other => bail!("--args must be a JSON object, got {other}"),
    }
}

fn init_tracing(level: Option<&str>, format: LogFormat) {
    let filter = level
        .map(EnvFilter::new)
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new("openapi_mcp=info,openapi_mcp_tools=info"));

    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Text => registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init(),
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_level.as_deref(), cli.log_format);

    match cli.command {
        Command::List { spec } => {
            let catalog = ToolCatalog::load(&spec.into_config()?)
                .await
                .context("compile tools")?;
            let tools = catalog.list_tools();
            println!("{}", serde_json::to_string_pretty(&tools)?);
        }
        Command::Call {
            tool,
            args,
            timeout_secs,
            spec,
        } => {
            let arguments = parse_arguments(&args)?;
            let catalog = ToolCatalog::load(&spec.into_config()?)
                .await
                .context("compile tools")?;

            let cancel = CancellationToken::new();
            if let Some(secs) = timeout_secs {
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_secs(secs)).await;
                    tracing::warn!(timeout_secs = secs, "timeout reached, cancelling call");
                    cancel.cancel();
                });
            }
            {
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        cancel.cancel();
                    }
                });
            }

            let text = catalog
                .invoke(&tool, &arguments, &cancel)
                .await
                .with_context(|| format!("call tool '{tool}'"))?;
            println!("{text}");
        }
    }

    Ok(())
}
