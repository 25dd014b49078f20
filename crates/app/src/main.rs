use anyhow::Context;
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use originality_core::clients::arxiv::DEFAULT_ARXIV_ENDPOINT;
use originality_core::clients::gemini::{DEFAULT_GEMINI_ENDPOINT, DEFAULT_GEMINI_MODEL};
use originality_core::{
    index_folder, ArxivClient, Evaluation, EvidenceStore, GeminiGenerator, InMemoryEvidenceStore, MediaConverter,
    OriginalityPipeline, PipelineConfig, ProgressEvent, ProgressObserver, QdrantEvidenceStore,
};
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "originality", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Qdrant base URL of a pre-indexed corpus; without it only papers fetched
    /// during the run are searched.
    #[arg(long, env = "ORIGINALITY_QDRANT_URL", global = true)]
    qdrant_url: Option<String>,

    /// Qdrant collection
    #[arg(
        long,
        env = "ORIGINALITY_QDRANT_COLLECTION",
        default_value = "originality_evidence",
        global = true
    )]
    qdrant_collection: String,
}

#[derive(Subcommand)]
enum Command {
    /// Score the originality of a research idea and print the report as JSON.
    Evaluate {
        /// Idea text.
        #[arg(long, required_unless_present = "idea_file", conflicts_with = "idea_file")]
        idea: Option<String>,
        /// File containing the idea text.
        #[arg(long)]
        idea_file: Option<PathBuf>,

        #[command(flatten)]
        pipeline: PipelineArgs,

        #[command(flatten)]
        services: ServiceArgs,
    },
    /// Index a local folder of PDF, markdown and text files into Qdrant.
    Index {
        /// Folder searched recursively.
        #[arg(long)]
        folder: PathBuf,
    },
}

#[derive(Args)]
struct ServiceArgs {
    /// Gemini API base URL
    #[arg(long, env = "ORIGINALITY_GEMINI_ENDPOINT", default_value = DEFAULT_GEMINI_ENDPOINT)]
    gemini_endpoint: String,

    /// Gemini model name
    #[arg(long, env = "ORIGINALITY_GEMINI_MODEL", default_value = DEFAULT_GEMINI_MODEL)]
    gemini_model: String,

    /// arXiv query API URL
    #[arg(long, env = "ORIGINALITY_ARXIV_ENDPOINT", default_value = DEFAULT_ARXIV_ENDPOINT)]
    arxiv_endpoint: String,

    /// USD per million prompt tokens, for the cost estimate.
    #[arg(long, env = "ORIGINALITY_INPUT_PRICE", default_value = "0.30")]
    input_price_per_million: f64,

    /// USD per million generated tokens, for the cost estimate.
    #[arg(long, env = "ORIGINALITY_OUTPUT_PRICE", default_value = "2.50")]
    output_price_per_million: f64,
}

/// Logs pipeline progress through `tracing`.
struct LogProgress;

impl ProgressObserver for LogProgress {
    fn on_progress(&self, event: &ProgressEvent) {
        let percent = (event.fraction() * 100.0).round() as u8;
        match event {
            ProgressEvent::StageStarted { stage } => info!(%stage, percent, "stage started"),
            ProgressEvent::StageFinished { stage, usage } => info!(
                %stage,
                percent,
                calls = usage.calls,
                failed_calls = usage.failed_calls,
                tokens = usage.tokens.total(),
                "stage finished"
            ),
            ProgressEvent::PaperAssessed {
                paper_id,
                completed,
                total,
            } => info!(%paper_id, completed, total, percent, "paper assessed"),
        }
    }
}

#[derive(Args)]
struct PipelineArgs {
    /// Papers selected for assessment (K).
    #[arg(long, env = "ORIGINALITY_NUM_PAPERS", default_value = "5")]
    num_papers: usize,
    #[arg(long, env = "ORIGINALITY_MAX_QUERY_COUNT", default_value = "5")]
    max_query_count: usize,
    /// Candidates submitted to the ranking judgment (M).
    #[arg(long, env = "ORIGINALITY_CANDIDATE_POOL_SIZE", default_value = "20")]
    candidate_pool_size: usize,
    #[arg(long, env = "ORIGINALITY_PER_CALL_TIMEOUT_SECS", default_value = "60")]
    per_call_timeout_secs: u64,
    #[arg(long, env = "ORIGINALITY_RETRY_BUDGET", default_value = "2")]
    retry_budget: u32,
    #[arg(long, env = "ORIGINALITY_INITIAL_BACKOFF_MS", default_value = "500")]
    initial_backoff_ms: u64,
    #[arg(long, env = "ORIGINALITY_BACKOFF_MULTIPLIER", default_value = "2.0")]
    backoff_multiplier: f64,
    #[arg(long, env = "ORIGINALITY_MAX_BACKOFF_MS", default_value = "8000")]
    max_backoff_ms: u64,
    /// Sampling temperature, at most 0.2.
    #[arg(long, env = "ORIGINALITY_TEMPERATURE", default_value = "0.0")]
    temperature: f32,
    #[arg(long, env = "ORIGINALITY_RESULTS_PER_QUERY", default_value = "10")]
    results_per_query: usize,
    #[arg(long, env = "ORIGINALITY_STORE_TOP_N", default_value = "20")]
    store_top_n: usize,
    /// Full-text passages shown to each assessment.
    #[arg(long, env = "ORIGINALITY_CONTEXT_PASSAGES", default_value = "5")]
    context_passages: usize,
    #[arg(long, env = "ORIGINALITY_MAX_CONCURRENT_ASSESSMENTS", default_value = "5")]
    max_concurrent_assessments: usize,
}

impl From<PipelineArgs> for PipelineConfig {
    fn from(args: PipelineArgs) -> Self {
        Self {
            num_papers: args.num_papers,
            max_query_count: args.max_query_count,
            candidate_pool_size: args.candidate_pool_size,
            per_call_timeout: Duration::from_secs(args.per_call_timeout_secs),
            retry_budget: args.retry_budget,
            initial_backoff: Duration::from_millis(args.initial_backoff_ms),
            backoff_multiplier: args.backoff_multiplier,
            max_backoff: Duration::from_millis(args.max_backoff_ms),
            temperature: args.temperature,
            results_per_query: args.results_per_query,
            store_top_n: args.store_top_n,
            context_passages: args.context_passages,
            max_concurrent_assessments: args.max_concurrent_assessments,
        }
    }
}

async fn evaluate_with<S>(
    store: S,
    services: &ServiceArgs,
    config: PipelineConfig,
    idea: &str,
) -> anyhow::Result<Evaluation>
where
    S: EvidenceStore + Send + Sync,
{
    let api_key = std::env::var("GEMINI_API_KEY").context("GEMINI_API_KEY is not set")?;
    let generator = GeminiGenerator::with_endpoint(&services.gemini_endpoint, &services.gemini_model, api_key);
    let literature = ArxivClient::new(&services.arxiv_endpoint);
    let pipeline = OriginalityPipeline::new(generator, literature, store, MediaConverter::default(), config)?;

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling evaluation");
            on_interrupt.cancel();
        }
    });

    Ok(pipeline.evaluate_with_observer(idea, &cancel, &LogProgress).await?)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app_version = env!("CARGO_PKG_VERSION");

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    info!(
        version = app_version,
        started_at = %Utc::now().to_rfc3339(),
        "originality boot"
    );

    match cli.command {
        Command::Evaluate {
            idea,
            idea_file,
            pipeline,
            services,
        } => {
            let idea = match (idea, idea_file) {
                (Some(idea), _) => idea,
                (None, Some(path)) => tokio::fs::read_to_string(&path)
                    .await
                    .with_context(|| format!("reading idea from {}", path.display()))?,
                (None, None) => anyhow::bail!("either --idea or --idea-file is required"),
            };
            let config = PipelineConfig::from(pipeline);

            let Evaluation { report, usage } = match cli.qdrant_url {
                Some(url) => {
                    let store = QdrantEvidenceStore::new(url, &cli.qdrant_collection);
                    store.ensure_collection().await?;
                    evaluate_with(store, &services, config, &idea).await?
                }
                None => evaluate_with(InMemoryEvidenceStore::default(), &services, config, &idea).await?,
            };

            let tokens = usage.tokens();
            info!(
                score = report.score,
                band = ?report.band(),
                calls = usage.calls(),
                input_tokens = tokens.input_tokens,
                output_tokens = tokens.output_tokens,
                estimated_cost_usd = usage.estimated_cost(
                    services.input_price_per_million,
                    services.output_price_per_million
                ),
                "evaluation finished"
            );
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Index { folder } => {
            let url = cli
                .qdrant_url
                .context("--qdrant-url (or ORIGINALITY_QDRANT_URL) is required to index a folder")?;
            let store = QdrantEvidenceStore::new(url, &cli.qdrant_collection);
            store.ensure_collection().await?;

            let report = index_folder(&folder, &MediaConverter::default(), &store).await?;
            for skipped in &report.skipped {
                warn!(path = %skipped.path.display(), reason = %skipped.reason, "skipped file");
            }

            println!(
                "{} documents indexed, {} skipped, at {}",
                report.indexed.len(),
                report.skipped.len(),
                report.finished_at.to_rfc3339()
            );
        }
    }

    Ok(())
}
