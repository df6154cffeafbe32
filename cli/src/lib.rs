use anyhow::Context;
use anyhow::Result;
use clap::Parser;
use clap::Subcommand;
use file_registry_core::CrawlRequest;
use file_registry_core::Registry;
use file_registry_core::RegistryConfig;
use file_registry_core::RegistryError;
use file_registry_core::ops::EmbedPendingRequest;
use file_registry_embeddings::UsageLedger;
use file_registry_embeddings::UsageSink;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing::warn;

/// File metadata registry.
///
/// Results are printed to stdout as JSON; logs go to stderr (`RUST_LOG`).
#[derive(Debug, Parser)]
#[command(name = "file-registry", version)]
pub struct Cli {
    /// Configuration file (defaults to ~/.file-registry/config.toml)
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run a named operation with a JSON argument object
    Call(CallArgs),

    /// Register every new file under a directory
    Crawl(CrawlArgs),

    /// Embed all records that have content but no vector
    EmbedPending(EmbedPendingArgs),

    /// List operation names accepted by `call`
    Ops,
}

#[derive(Debug, Parser)]
pub struct CallArgs {
    /// Operation name, e.g. `register` or `search`
    #[arg(value_name = "OPERATION")]
    pub operation: String,

    /// Arguments as a JSON object
    #[arg(value_name = "JSON", default_value = "{}")]
    pub args: String,
}

#[derive(Debug, Parser)]
pub struct CrawlArgs {
    /// Directory to walk; `~/` is expanded
    #[arg(value_name = "PATH")]
    pub path: String,

    /// Regex file names must match
    #[arg(long)]
    pub pattern: Option<String>,

    /// Regex excluding matching file names
    #[arg(long)]
    pub exclude: Option<String>,

    /// Directory levels below the root to descend; 0 keeps root files only
    #[arg(long, allow_negative_numbers = true)]
    pub max_depth: Option<i64>,

    /// Include dot files and dot directories
    #[arg(long)]
    pub hidden: bool,

    /// Report what would be registered without writing anything
    #[arg(long)]
    pub dry_run: bool,

    /// Tag to attach to every registered file (repeatable)
    #[arg(long = "tag", value_name = "TAG")]
    pub tags: Vec<String>,
}

#[derive(Debug, Parser)]
pub struct EmbedPendingArgs {
    /// Records per embedding pass
    #[arg(long)]
    pub batch_size: Option<usize>,
}

/// Outcome of a command: the JSON to print and whether it is an error body.
pub struct Output {
    pub body: Value,
    pub is_error: bool,
}

impl Output {
    fn ok(body: Value) -> Self {
        Self {
            body,
            is_error: false,
        }
    }

    fn from_result(result: std::result::Result<Value, RegistryError>) -> Self {
        match result {
            Ok(body) => Self::ok(body),
            Err(err) => {
                warn!(reason = err.reason(), "Operation failed: {err}");
                Self {
                    body: err.to_json(),
                    is_error: true,
                }
            }
        }
    }
}

impl Cli {
    pub async fn run(self) -> Result<Output> {
        if matches!(self.command, Command::Ops) {
            return Ok(operations());
        }

        let config = RegistryConfig::load_or_default(self.config.as_deref())
            .context("Failed to load configuration")?;
        let ledger = Arc::new(UsageLedger::new());
        let sink: Arc<dyn UsageSink> = ledger.clone();
        let registry =
            Registry::from_config(config, Some(sink)).context("Failed to open the registry")?;

        let cancel = registry.cancellation_token();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted; letting running items finish");
                cancel.cancel();
            }
        });

        let output = match self.command {
            Command::Call(args) => {
                let parsed: Value = serde_json::from_str(&args.args)
                    .with_context(|| format!("arguments are not valid JSON: {}", args.args))?;
                Output::from_result(registry.call(&args.operation, parsed).await)
            }
            Command::Crawl(args) => {
                let request = CrawlRequest {
                    path: args.path,
                    pattern: args.pattern,
                    exclude_pattern: args.exclude,
                    max_depth: args.max_depth,
                    include_hidden: args.hidden,
                    dry_run: args.dry_run,
                    tags: args.tags,
                };
                let result = registry
                    .crawl(request)
                    .await
                    .and_then(|report| Ok(serde_json::to_value(report)?));
                Output::from_result(result)
            }
            Command::EmbedPending(args) => {
                Output::from_result(embed_all_pending(&registry, args.batch_size).await)
            }
            Command::Ops => operations(),
        };

        let tokens = ledger.total_tokens();
        if tokens > 0 {
            info!(tokens, "Embedding usage for this run");
        }
        Ok(output)
    }
}

fn operations() -> Output {
    Output::ok(serde_json::json!({ "operations": Registry::operation_names() }))
}

async fn embed_all_pending(
    registry: &Registry,
    batch_size: Option<usize>,
) -> std::result::Result<Value, RegistryError> {
    let cancel = registry.cancellation_token();
    let mut total = 0;
    loop {
        if cancel.is_cancelled() {
            return Err(RegistryError::Cancelled);
        }
        let pass = registry
            .embed_pending(EmbedPendingRequest { batch_size })
            .await?;
        if pass.processed == 0 {
            break;
        }
        total += pass.processed;
        info!(processed = pass.processed, total, "Embedding pass complete");
    }
    Ok(serde_json::json!({ "processed": total }))
}
