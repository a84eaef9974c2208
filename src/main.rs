use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use rhizome::agent::regenerator_for;
use rhizome::config::AppConfig;
use rhizome::context::RunContext;
use rhizome::healing::{HealRequest, HealingPipeline};
use rhizome::outcome::aggregator::{aggregate, Evidence};
use rhizome::outcome::classifier::{classify_detailed, ClassificationContext};
use rhizome::outcome::StepExecutionResult;
use rhizome::workspace::LocalFileStore;

#[derive(Parser)]
#[command(name = "rhizome", about = "Resilience core for generation-assisted pipelines")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Classify an error message into a step outcome
    Classify {
        error: String,
        /// Step that produced the error
        #[arg(long)]
        step: Option<String>,
        /// Path written by the pipeline (repeatable)
        #[arg(long = "generated")]
        generated_paths: Vec<String>,
        /// Module generated by the pipeline (repeatable)
        #[arg(long = "first-party")]
        first_party_modules: Vec<String>,
    },
    /// Aggregate a JSON array of step results into a workflow status
    Aggregate {
        results: PathBuf,
        /// JSON object of substitute evidence keyed by step
        #[arg(long)]
        evidence: Option<PathBuf>,
    },
    /// Heal the artifacts behind failed steps, in repair order
    Heal {
        #[arg(required = true)]
        steps: Vec<String>,
        /// Workspace root (defaults to healing.workspace_root)
        #[arg(long)]
        root: Option<PathBuf>,
        /// Error output of the failed steps
        #[arg(long)]
        error: Option<String>,
    },
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

async fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    let config = AppConfig::load(cli.config.as_deref())?;

    match cli.command {
        Command::Classify {
            error,
            step,
            generated_paths,
            first_party_modules,
        } => {
            let context = ClassificationContext {
                step,
                generated_paths,
                first_party_modules,
            };
            let classification = classify_detailed(&error, &context);
            println!("{}", serde_json::to_string_pretty(&classification)?);
        }
        Command::Aggregate { results, evidence } => {
            let results: Vec<StepExecutionResult> = read_json(&results).await?;
            let evidence: Option<Evidence> = match evidence {
                Some(path) => Some(read_json(&path).await?),
                None => None,
            };
            let aggregation = aggregate(&results, evidence.as_ref());
            println!("{}", serde_json::to_string_pretty(&aggregation)?);
        }
        Command::Heal { steps, root, error } => {
            let root = root.unwrap_or_else(|| config.healing.workspace_root.clone());
            let regenerator = regenerator_for(&config, Arc::new(LocalFileStore::new()));
            let ctx = RunContext::with_config(config);
            let mut pipeline = HealingPipeline::local(root, regenerator);

            let requests = steps
                .into_iter()
                .map(|step| {
                    let request = HealRequest::new(step);
                    match &error {
                        Some(error) => request.with_error(error.clone()),
                        None => request,
                    }
                })
                .collect();
            let report = pipeline.heal_all(&ctx, requests).await;

            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "healed": &report.healed,
                    "still_failed": &report.still_failed,
                    "history": pipeline.history(),
                }))?
            );
            if !report.all_healed() {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}
