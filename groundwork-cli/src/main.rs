//! `groundwork`: operator command line for the retrieval store.
//!
//! ```text
//! groundwork init                      # create and seed the collection if absent
//! groundwork reset                     # drop everything, re-seed
//! groundwork ingest "ข้อความ" ...        # add texts
//! groundwork query "สวัสดี" -k 2        # print grounding context
//! groundwork status                    # show the collection lifecycle state
//! ```
//!
//! Configuration comes from `--config <file.json>` with `GROUNDWORK_*`
//! variables layered on top. Embedding requires `OPENAI_API_KEY`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use groundwork_rag::milvus::MilvusVectorStore;
use groundwork_rag::openai::OpenAIEmbeddingProvider;
use groundwork_rag::{
    CollectionStatus, InMemoryBackend, InMemoryVectorStore, InitOutcome, QueryOutcome,
    RetrievalConfig, RetrievalService, VectorStore,
};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

/// Reference texts ingested by `init` and `reset` when no `--seed` is given.
const BUNDLED_SEED: &str = include_str!("../seed/thai_corpus.txt");

#[derive(Parser, Debug)]
#[command(name = "groundwork", version, about = "Manage and query the groundwork retrieval store")]
struct Cli {
    /// JSON configuration file. GROUNDWORK_* variables override its values.
    #[arg(long, global = true, env = "GROUNDWORK_CONFIG")]
    config: Option<PathBuf>,

    /// Seed corpus, one text per line. Defaults to the bundled Thai corpus.
    #[arg(long, global = true, env = "GROUNDWORK_SEED_FILE")]
    seed: Option<PathBuf>,

    /// Vector store backend. `memory` is seeded fresh on every run.
    #[arg(long, global = true, value_enum, default_value_t = StoreKind::Milvus)]
    store: StoreKind,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum StoreKind {
    Milvus,
    Memory,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create the database and collection if absent and ingest the seed corpus.
    Init,
    /// Drop the database, recreate it empty, and re-ingest the seed corpus.
    Reset,
    /// Preprocess, embed, and store texts.
    Ingest {
        #[arg(required = true)]
        texts: Vec<String>,
    },
    /// Retrieve grounding context for a query.
    Query {
        query: String,
        /// Number of results. Defaults to the configured top_k.
        #[arg(short = 'k', long)]
        top_k: Option<usize>,
        /// Print hits as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Show the collection's schema and lifecycle state.
    Status,
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_config(path: Option<&Path>) -> Result<RetrievalConfig> {
    let Some(path) = path else {
        return Ok(RetrievalConfig::from_env()?);
    };
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let config: RetrievalConfig = serde_json::from_str(&raw)
        .with_context(|| format!("invalid config file {}", path.display()))?;
    Ok(config.with_env_overrides()?)
}

/// One text per non-blank line; lines starting with `#` are comments.
fn parse_seed(raw: &str) -> Vec<String> {
    raw.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(String::from)
        .collect()
}

fn load_seed(path: Option<&Path>) -> Result<Vec<String>> {
    let raw = match path {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("failed to read seed corpus {}", path.display()))?,
        None => BUNDLED_SEED.to_string(),
    };
    Ok(parse_seed(&raw))
}

fn build_store(kind: StoreKind, config: &RetrievalConfig) -> Result<Arc<dyn VectorStore>> {
    Ok(match kind {
        StoreKind::Milvus => Arc::new(MilvusVectorStore::from_config(config)?),
        StoreKind::Memory => {
            Arc::new(InMemoryVectorStore::from_config(Arc::new(InMemoryBackend::new()), config))
        }
    })
}

fn build_service(
    config: RetrievalConfig,
    store: Arc<dyn VectorStore>,
    seed: Vec<String>,
) -> Result<RetrievalService> {
    let api_key = std::env::var("OPENAI_API_KEY").context("OPENAI_API_KEY must be set")?;
    let embedder = OpenAIEmbeddingProvider::from_config(api_key, &config)?;
    Ok(RetrievalService::builder()
        .config(config)
        .embedding_provider(Arc::new(embedder))
        .vector_store(store)
        .seed_corpus(seed)
        .build()?)
}

fn print_init(outcome: &InitOutcome) {
    match outcome {
        InitOutcome::Reused(info) => println!(
            "Reusing collection '{}' in '{}' (dimension {})",
            info.name, info.database, info.dimension
        ),
        InitOutcome::Seeded(report) => {
            println!("Seeded collection with {} texts (index {:?})", report.inserted(), report.index)
        }
    }
}

fn print_query(outcome: &QueryOutcome, json: bool) -> Result<()> {
    match outcome {
        QueryOutcome::Context(hits) if json => {
            println!("{}", serde_json::to_string_pretty(hits)?);
        }
        QueryOutcome::Context(hits) => {
            for (rank, hit) in hits.iter().enumerate() {
                println!("{}. [{:.4}] {}", rank + 1, hit.distance, hit.text);
            }
        }
        QueryOutcome::NoContext => println!("No relevant context found."),
        QueryOutcome::Unavailable(e) => bail!("retrieval is unavailable: {e}"),
    }
    Ok(())
}

fn print_status(status: &CollectionStatus) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(status)?);
    println!("state: {:?}", status.state());
    Ok(())
}

async fn run(service: &RetrievalService, command: Command) -> Result<()> {
    match command {
        Command::Init => print_init(&service.initialize().await?),
        Command::Reset => {
            let report = service.reset().await?;
            println!("Reset complete: {} texts ingested", report.inserted());
        }
        Command::Ingest { texts } => {
            for text in &texts {
                let id = service.ingest(text).await?;
                println!("{id}\t{text}");
            }
            info!(count = texts.len(), "ingestion finished");
        }
        Command::Query { query, top_k, json } => {
            let outcome = service.answer_query(&query, top_k).await?;
            print_query(&outcome, json)?;
        }
        Command::Status => print_status(&service.status().await?)?,
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let config = load_config(cli.config.as_deref())?;
    debug!(
        store = %config.store_url(),
        database = %config.database,
        collection = %config.collection,
        model = %config.embedding_model,
        "loaded configuration"
    );
    let store = build_store(cli.store, &config)?;

    // Status needs no embedder, so it works without an API key.
    if let Command::Status = cli.command {
        return print_status(&store.status().await?);
    }

    let seed = load_seed(cli.seed.as_deref())?;
    let service = build_service(config, store, seed)?;

    // A fresh in-memory store holds nothing until it is seeded.
    if cli.store == StoreKind::Memory && !matches!(cli.command, Command::Init | Command::Reset) {
        service.initialize().await?;
    }

    run(&service, cli.command).await
}
