use clap::Parser;
use similarity_service::cli::{Cli, Command};
use similarity_service::jobs::{
    presentation_embeddings, presentation_neighbors, user_embeddings, user_preferences,
    PresentationEmbeddingsConfig, PresentationNeighborsConfig, UserEmbeddingsConfig,
    UserPreferencesConfig,
};
use similarity_service::services::embedding::{EmbeddingProvider, HttpEmbeddingProvider};
use similarity_service::{Config, JobContext, PgStore, Result, TextCanonicalizer};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// A fully validated job, ready to run
enum Job {
    Neighbors(PresentationNeighborsConfig),
    PresentationEmbeddings(PresentationEmbeddingsConfig, Arc<dyn EmbeddingProvider>),
    UserEmbeddings(UserEmbeddingsConfig, Arc<dyn EmbeddingProvider>),
    UserPreferences(UserPreferencesConfig),
}

fn init_tracing(log_format: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    if log_format.eq_ignore_ascii_case("json") {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }
}

fn provider(config: &Config) -> Result<Arc<dyn EmbeddingProvider>> {
    Ok(Arc::new(HttpEmbeddingProvider::new(config.provider_config()?)?))
}

/// Validate arguments and provider settings before anything is touched.
fn resolve(command: &Command, config: &Config) -> Result<Job> {
    Ok(match command {
        Command::RecomputePresentationNeighbors(args) => Job::Neighbors(args.to_config(config)?),
        Command::ComputePresentationEmbeddings(args) => {
            Job::PresentationEmbeddings(args.to_config(config)?, provider(config)?)
        }
        Command::ComputeUserEmbeddings(args) => {
            Job::UserEmbeddings(args.to_config(config)?, provider(config)?)
        }
        Command::RecomputeUserPreferences(args) => Job::UserPreferences(args.to_config(config)?),
    })
}

async fn run(job: Job, config: &Config) -> Result<()> {
    let store = Arc::new(
        PgStore::connect(&config.database_url, config.database_max_connections).await?,
    );
    let ctx = JobContext::from_store(
        store,
        Arc::new(TextCanonicalizer::default()),
        config.commit_chunk_size,
    );

    match job {
        Job::Neighbors(job) => {
            presentation_neighbors::run(&ctx, &job).await?;
        }
        Job::PresentationEmbeddings(job, provider) => {
            presentation_embeddings::run(&ctx, provider, &job).await?;
        }
        Job::UserEmbeddings(job, provider) => {
            user_embeddings::run(&ctx, provider, &job).await?;
        }
        Job::UserPreferences(job) => {
            user_preferences::run(&ctx, &job).await?;
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    // Malformed flags exit here with clap's usage error
    let cli = Cli::parse();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::from(e.exit_code());
        }
    };

    init_tracing(&config.log_format);

    let job = match resolve(&cli.command, &config) {
        Ok(job) => job,
        Err(e) => {
            error!(error = %e, "Invalid job configuration");
            return ExitCode::from(e.exit_code());
        }
    };

    info!(
        model = %config.embedding_model,
        dims = config.embedding_dims,
        command = ?cli.command,
        "Starting job"
    );

    match run(job, &config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Job failed");
            ExitCode::from(e.exit_code())
        }
    }
}
