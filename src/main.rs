use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use imsearch_eval::config::{Config, LoggingConfig, StoreBackend};
use imsearch_eval::dataset::JsonlDatasetLoader;
use imsearch_eval::error::Result;
use imsearch_eval::eval::{BenchmarkEvaluator, EvaluatorSettings};
use imsearch_eval::ingest::{load_collection, ImageRecordBuilder};
use imsearch_eval::model::TritonProvider;
use imsearch_eval::traits::{ClientParams, DatasetLoader, ModelProvider, VectorDbAdapter};
use imsearch_eval::{metrics, output, store, upload};

#[derive(Parser)]
#[command(name = "imsearch-eval", version, about = "Hybrid image-retrieval benchmark")]
struct Cli {
    /// TOML config file; environment variables override it.
    #[arg(long, env = "IMSEARCH_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Load the dataset into the collection, then evaluate it.
    Run {
        /// Leave the collection in place after the run.
        #[arg(long)]
        keep_collection: bool,
    },
    /// Load the dataset into the collection.
    Load,
    /// Query an existing collection and write the artifacts.
    Evaluate,
}

/// `RUST_LOG` wins over the configured level; `format = "json"` emits one
/// JSON object per event for log shipping from benchmark hosts.
fn init_logging(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let events = tracing_subscriber::fmt().with_env_filter(filter);
    if logging.format == "json" {
        events.json().init();
    } else {
        events.init();
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    // Benchmark credentials and endpoints may live in a local .env file.
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    // Logging is not up yet, so configuration errors go straight to stderr.
    let config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("imsearch-eval: {e}");
            return ExitCode::from(e.exit_code());
        }
    };

    init_logging(&config.logging);
    metrics::init();
    tracing::info!(
        backend = ?config.vector_store.backend,
        collection = %config.vector_store.collection,
        dataset = %config.dataset.name,
        "imsearch-eval starting"
    );

    let code = match execute(cli.command, &config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, kind = ?e.kind(), "run failed");
            ExitCode::from(e.exit_code())
        }
    };
    tracing::debug!(metrics = %metrics::render(), "final metrics");
    code
}

async fn execute(command: Command, config: &Config) -> Result<()> {
    let provider: Arc<dyn ModelProvider> =
        Arc::new(TritonProvider::connect(config.inference.clone()).await?);
    let store = store::connect(ClientParams {
        store: config.vector_store.clone(),
        query: config.query.clone(),
        model_provider: Arc::clone(&provider),
    })
    .await?;
    let loader: Arc<dyn DatasetLoader> = Arc::new(JsonlDatasetLoader::from_config(&config.dataset));

    let result = match command {
        Command::Load => load(&store, provider.as_ref(), loader.as_ref(), config).await,
        Command::Evaluate => {
            if config.vector_store.backend == StoreBackend::Memory {
                tracing::warn!("the memory backend starts empty; use `run` to load and evaluate");
            }
            evaluate(&store, &loader, config).await
        }
        Command::Run { keep_collection } => {
            let outcome = match load(&store, provider.as_ref(), loader.as_ref(), config).await {
                Ok(()) => evaluate(&store, &loader, config).await,
                Err(e) => Err(e),
            };
            if !keep_collection {
                if let Err(e) = store.delete_collection(&config.vector_store.collection).await {
                    tracing::warn!(error = %e, "failed to delete collection");
                }
            }
            outcome
        }
    };

    if let Err(e) = store.close().await {
        tracing::warn!(error = %e, "failed to close vector store");
    }
    result
}

async fn load(
    store: &Arc<dyn VectorDbAdapter>,
    provider: &dyn ModelProvider,
    loader: &dyn DatasetLoader,
    config: &Config,
) -> Result<()> {
    let options = EvaluatorSettings::from_config(config).load;
    let dataset = loader.load(&config.dataset.split, &options).await?;
    let builder = ImageRecordBuilder::new(loader.columns(), &config.inference);
    let report = load_collection(
        store.as_ref(),
        provider,
        &builder,
        &dataset,
        &config.vector_store.collection,
        config,
    )
    .await?;
    for failed in &report.failed {
        tracing::warn!(index = failed.index, id = ?failed.id, reason = %failed.reason, "record not loaded");
    }
    Ok(())
}

async fn evaluate(
    store: &Arc<dyn VectorDbAdapter>,
    loader: &Arc<dyn DatasetLoader>,
    config: &Config,
) -> Result<()> {
    let evaluator = BenchmarkEvaluator::new(
        Arc::clone(store),
        Arc::clone(loader),
        EvaluatorSettings::from_config(config),
    );
    let report = evaluator.run().await?;
    let artifacts = output::write_report(&report, &config.output)?;

    match upload::upload_artifacts(&config.upload, &artifacts.paths(), report.started_at).await {
        upload::UploadOutcome::Uploaded { keys } => {
            tracing::info!(objects = keys.len(), "uploaded artifacts")
        }
        upload::UploadOutcome::Failed { .. } | upload::UploadOutcome::Disabled => {}
    }
    Ok(())
}
