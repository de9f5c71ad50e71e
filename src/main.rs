use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dataset_transform::ingestion::{self, DelimitedMode};
use dataset_transform::prompt::build_plan_prompt;
use dataset_transform::{
    CannedModel, Dataset, LlmClient, LlmConfig, PipelineConfig, PlanModel, TransformPipeline,
};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "dataset-transform")]
#[command(about = "Transform tabular data with natural-language instructions")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Ask the model for a plan and apply it
    Transform {
        /// CSV or JSON file, or an http(s) URL
        #[arg(short, long)]
        data: String,

        /// What to do with the data
        #[arg(short, long)]
        instruction: String,

        /// Split rows on newlines and cells on commas, ignoring quotes
        #[arg(long)]
        naive_csv: bool,

        /// Print single-line JSON
        #[arg(long)]
        compact: bool,

        /// Model name (or set OPENAI_MODEL)
        #[arg(long)]
        model: Option<String>,
    },
    /// Print the prompt that would be sent, without calling the model
    Prompt {
        #[arg(short, long)]
        data: PathBuf,

        #[arg(short, long)]
        instruction: String,

        #[arg(long)]
        naive_csv: bool,
    },
    /// Apply a saved model reply to a dataset, offline
    Apply {
        #[arg(short, long)]
        data: PathBuf,

        /// File holding the raw model reply
        #[arg(short, long)]
        response: PathBuf,

        #[arg(long, default_value = "apply saved response")]
        instruction: String,

        #[arg(long)]
        naive_csv: bool,

        #[arg(long)]
        compact: bool,
    },
}

fn csv_mode(naive: bool) -> DelimitedMode {
    if naive {
        DelimitedMode::Naive
    } else {
        DelimitedMode::Quoted
    }
}

fn load_local(path: &Path, naive: bool) -> Result<Dataset> {
    ingestion::load_path(path, csv_mode(naive))
        .with_context(|| format!("Failed to load dataset from {}", path.display()))
}

async fn load_any(source: &str, naive: bool) -> Result<Dataset> {
    if source.starts_with("http://") || source.starts_with("https://") {
        let client = reqwest::Client::new();
        ingestion::fetch_dataset(&client, source, csv_mode(naive))
            .await
            .with_context(|| format!("Failed to fetch dataset from {}", source))
    } else {
        load_local(Path::new(source), naive)
    }
}

async fn run_and_print<M: PlanModel>(
    pipeline: TransformPipeline<M>,
    dataset: &Dataset,
    instruction: &str,
    compact: bool,
) -> Result<()> {
    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c.cancel();
        }
    });

    let response = pipeline.respond(dataset, instruction, cancel).await;
    let rendered = if compact {
        serde_json::to_string(&response)?
    } else {
        serde_json::to_string_pretty(&response)?
    };
    println!("{}", rendered);

    if let Some(error) = &response.error {
        anyhow::bail!("{}: {}", error.kind.as_str(), error.detail);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let pipeline_config = PipelineConfig::from_env();

    match args.command {
        Command::Transform {
            data,
            instruction,
            naive_csv,
            compact,
            model,
        } => {
            let dataset = load_any(&data, naive_csv).await?;
            info!(
                "Loaded {} rows x {} columns from {}",
                dataset.row_count(),
                dataset.column_count(),
                data
            );

            let mut llm_config = LlmConfig::from_env();
            if let Some(model) = model {
                llm_config = llm_config.with_model(model);
            }
            if llm_config.is_offline() {
                info!("OPENAI_API_KEY not set, running in offline mode");
            }
            let client = LlmClient::new(llm_config).context("Failed to build HTTP client")?;
            run_and_print(TransformPipeline::new(client, pipeline_config), &dataset, &instruction, compact).await
        }
        Command::Prompt {
            data,
            instruction,
            naive_csv,
        } => {
            let dataset = load_local(&data, naive_csv)?;
            let registry = dataset_transform::ToolRegistry::new();
            println!("{}", build_plan_prompt(&dataset, &instruction, &pipeline_config, &registry));
            Ok(())
        }
        Command::Apply {
            data,
            response,
            instruction,
            naive_csv,
            compact,
        } => {
            let dataset = load_local(&data, naive_csv)?;
            let reply = std::fs::read_to_string(&response)
                .with_context(|| format!("Failed to read model reply from {}", response.display()))?;
            let pipeline = TransformPipeline::new(CannedModel::new(reply), pipeline_config);
            run_and_print(pipeline, &dataset, &instruction, compact).await
        }
    }
}
