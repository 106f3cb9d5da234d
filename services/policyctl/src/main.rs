//! Operator CLI for a casbin policy stored in a single KV record.
//!
//! # Commands
//! - `dump`: print the stored record and its modification index.
//! - `push`: load a model + CSV policy file and save it with compare-and-swap.
//! - `check`: evaluate one request against the stored policy.
//! - `migrate`: rewrite the record into another record format.
//!
//! # Notes
//! Commands return their output as a string so they can be exercised against
//! an in-memory store in tests; `main` only prints.
mod observability;

use anyhow::{Context, Result};
use casbin::{Adapter, CoreApi, DefaultModel, Enforcer, FileAdapter};
use clap::{Parser, Subcommand};
use policy_adapter::{
    AdapterConfig, KvAdapter, PolicyStoreError, RecordFormat, StoredRecord, rbac_model,
};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "policyctl")]
#[command(about = "Inspect and update a casbin policy stored in a KV record")]
struct Cli {
    /// YAML file overriding POLICY_KV_* environment settings
    #[arg(long, global = true)]
    config: Option<String>,

    /// Store address (host or host:port)
    #[arg(long, global = true)]
    address: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the stored policy record as JSON
    Dump,
    /// Replace the stored policy with the rules of a CSV policy file
    Push {
        /// Casbin model configuration
        #[arg(long)]
        model: PathBuf,
        /// Casbin CSV policy file
        #[arg(long)]
        policy: PathBuf,
    },
    /// Evaluate a request against the stored policy
    Check {
        /// Casbin model configuration (defaults to the bundled RBAC model)
        #[arg(long)]
        model: Option<PathBuf>,
        subject: String,
        object: String,
        action: String,
    },
    /// Rewrite the stored record into another record format
    Migrate {
        #[arg(long)]
        to: RecordFormat,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing();
    let cli = Cli::parse();
    let adapter = build_adapter(&cli)?;
    let output = run(cli.command, adapter).await?;
    println!("{output}");
    Ok(())
}

fn build_adapter(cli: &Cli) -> Result<KvAdapter> {
    let mut config = AdapterConfig::from_env_or_yaml(cli.config.as_deref())?;
    if let Some(address) = &cli.address {
        config.address = address.clone();
    }
    tracing::debug!(?config, "policy store configuration");
    KvAdapter::connect(&config).context("build policy adapter")
}

async fn run(command: Command, adapter: KvAdapter) -> Result<String> {
    match command {
        Command::Dump => dump(&adapter).await,
        Command::Push { model, policy } => push(adapter, model, policy).await,
        Command::Check {
            model,
            subject,
            object,
            action,
        } => check(adapter, model, &subject, &object, &action).await,
        Command::Migrate { to } => migrate(&adapter, to).await,
    }
}

async fn dump(adapter: &KvAdapter) -> Result<String> {
    let record = adapter
        .read_record()
        .await
        .context("read policy record")?
        .unwrap_or(StoredRecord {
            rules: Vec::new(),
            modify_index: 0,
        });
    let rendered = serde_json::to_string_pretty(&serde_json::json!({
        "modify_index": record.modify_index,
        "rules": record.rules,
    }))?;
    Ok(rendered)
}

async fn push(mut adapter: KvAdapter, model: PathBuf, policy: PathBuf) -> Result<String> {
    let mut model = DefaultModel::from_file(&model)
        .await
        .map_err(casbin_error)
        .with_context(|| format!("load model {}", model.display()))?;
    let mut source = FileAdapter::new(policy.clone());
    source
        .load_policy(&mut model)
        .await
        .map_err(casbin_error)
        .with_context(|| format!("load policy {}", policy.display()))?;
    adapter
        .save_policy(&mut model)
        .await
        .map_err(casbin_error)
        .context("save policy")?;
    let record = adapter.read_record().await.context("read back policy record")?;
    let (rules, index) = record
        .map(|record| (record.rules.len(), record.modify_index))
        .unwrap_or_default();
    Ok(format!("saved {rules} rules at index {index}"))
}

async fn check(
    adapter: KvAdapter,
    model: Option<PathBuf>,
    subject: &str,
    object: &str,
    action: &str,
) -> Result<String> {
    let model = match model {
        Some(path) => DefaultModel::from_file(&path)
            .await
            .map_err(casbin_error)
            .with_context(|| format!("load model {}", path.display()))?,
        None => rbac_model().await.map_err(casbin_error)?,
    };
    let enforcer = Enforcer::new(model, adapter)
        .await
        .map_err(casbin_error)
        .context("build enforcer")?;
    let allowed = enforcer
        .enforce((subject, object, action))
        .map_err(casbin_error)?;
    Ok(if allowed { "allow" } else { "deny" }.to_string())
}

async fn migrate(adapter: &KvAdapter, to: RecordFormat) -> Result<String> {
    let from = adapter.options().format;
    let rows = adapter.rewrite_format(to).await.context("rewrite policy record")?;
    Ok(format!(
        "rewrote {rows} rules from {from} to {to}; set POLICY_KV_FORMAT={to} for readers"
    ))
}

fn casbin_error(err: casbin::Error) -> anyhow::Error {
    match PolicyStoreError::from_casbin(&err) {
        Some(inner @ PolicyStoreError::ConcurrentModification { .. }) => {
            anyhow::anyhow!("{inner}; another writer saved first, reload and retry")
        }
        Some(inner) => anyhow::anyhow!("{inner}"),
        None => anyhow::anyhow!("{err}"),
    }
}
