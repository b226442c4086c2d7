use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use chrono::Utc;
use clap::{Parser, Subcommand};
use hybrid_search_core::{
    CharacterNgramEmbedder, Chunker, ChunkerConfig, DefaultExtractor, Embedder, HybridParams,
    IndexError, IndexKind, Indexer, IndexerConfig, JobState, LexicalIndex, MemoryChunkStore,
    MemoryLexicalIndex, OpenSearchIndex, Retriever, ScriptAwareTokenizer, SearchMode,
    VectorIndexStore,
};
use tokio::sync::RwLock;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "hybrid-search", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Directory for the vector index artifact pair.
    #[arg(long, default_value = ".hybrid-search")]
    data_dir: PathBuf,

    /// Embedding dimension.
    #[arg(long, default_value = "128")]
    dimension: usize,

    /// Vector index variant: flat, graph, or clustered.
    #[arg(long, default_value = "flat")]
    index_kind: String,

    /// Chunk window size in tokens.
    #[arg(long, default_value = "800")]
    chunk_size: usize,

    /// Token overlap between adjacent chunks.
    #[arg(long, default_value = "150")]
    chunk_overlap: usize,

    /// Base URL of an OpenSearch lexical backend. Defaults to the in-process
    /// term index when omitted.
    #[arg(long)]
    opensearch_url: Option<String>,

    /// OpenSearch index name.
    #[arg(long, default_value = "hybrid_chunks")]
    opensearch_index: String,
}

#[derive(Subcommand)]
enum Command {
    /// Index a folder of pdf, txt, and md documents.
    Index {
        /// Folder to scan recursively.
        #[arg(long)]
        folder: PathBuf,
        /// Re-index every document regardless of modification time.
        #[arg(long, default_value_t = false)]
        force: bool,
    },
    /// Index a folder, then answer a query against it.
    Search {
        /// Folder to scan recursively.
        #[arg(long)]
        folder: PathBuf,
        /// Search query.
        #[arg(long)]
        query: String,
        /// Retrieval mode: keyword, semantic, or hybrid.
        #[arg(long, default_value = "hybrid")]
        mode: String,
        /// Number of hits to return.
        #[arg(long, default_value = "10")]
        top_k: usize,
        /// Weight of the keyword side in hybrid fusion.
        #[arg(long, default_value = "0.5")]
        keyword_weight: f64,
        /// Weight of the semantic side in hybrid fusion.
        #[arg(long, default_value = "0.5")]
        semantic_weight: f64,
    },
    /// Rebuild the persisted vector index from live vectors only.
    Compact,
}

struct Engine<L>
where
    L: LexicalIndex + 'static,
{
    indexer: Indexer<L, MemoryChunkStore>,
    retriever: Retriever<L, MemoryChunkStore>,
    vectors: Arc<RwLock<VectorIndexStore>>,
    config: IndexerConfig,
}

fn build_engine<L>(cli: &Cli, lexical: Arc<L>) -> anyhow::Result<Engine<L>>
where
    L: LexicalIndex + 'static,
{
    std::fs::create_dir_all(&cli.data_dir)?;

    let kind = IndexKind::from_str(&cli.index_kind)
        .map_err(|error| anyhow::anyhow!(error.to_string()))?;
    let embedder = Arc::new(CharacterNgramEmbedder::new(cli.dimension));
    let chunks = Arc::new(MemoryChunkStore::new());
    let vectors = Arc::new(RwLock::new(VectorIndexStore::new(
        cli.dimension,
        kind,
        embedder.model_id(),
    )));
    let chunker = Arc::new(
        Chunker::new(
            ChunkerConfig {
                size: cli.chunk_size,
                overlap: cli.chunk_overlap,
            },
            Arc::new(ScriptAwareTokenizer::default()),
        )
        .map_err(|error| anyhow::anyhow!(error.to_string()))?,
    );
    let config = IndexerConfig::new(&cli.data_dir);

    let indexer = Indexer::new(
        lexical.clone(),
        chunks.clone(),
        embedder.clone() as Arc<dyn Embedder>,
        Arc::new(DefaultExtractor::default()),
        vectors.clone(),
        chunker,
        config.clone(),
    );
    let retriever = Retriever::new(
        lexical,
        chunks,
        embedder as Arc<dyn Embedder>,
        vectors.clone(),
    );

    Ok(Engine {
        indexer,
        retriever,
        vectors,
        config,
    })
}

async fn run_index<L>(engine: &Engine<L>, folder: &std::path::Path, force: bool) -> anyhow::Result<()>
where
    L: LexicalIndex + 'static,
{
    let mut handle = engine
        .indexer
        .start(folder, force)
        .map_err(|error| anyhow::anyhow!(error.to_string()))?;

    while let Some(progress) = handle.next_progress().await {
        println!(
            "[{}/{}] {} (errors: {})",
            progress.done,
            progress.total,
            progress.current_path.display(),
            progress.error_count
        );
    }

    let job = handle
        .wait()
        .await
        .map_err(|error| anyhow::anyhow!(error.to_string()))?;

    for error in &job.errors {
        warn!(path = %error.path.display(), reason = %error.reason, "document skipped");
    }

    match job.state {
        JobState::Completed => {
            println!(
                "indexed {}/{} documents ({} errors) at {}",
                job.done - job.error_count,
                job.total,
                job.error_count,
                Utc::now().to_rfc3339()
            );
            Ok(())
        }
        JobState::Cancelled => Err(anyhow::anyhow!(IndexError::JobCancelled.to_string())),
        state => Err(anyhow::anyhow!("index job ended in state {state:?}")),
    }
}

async fn run_command<L>(cli: &Cli, engine: Engine<L>) -> anyhow::Result<()>
where
    L: LexicalIndex + 'static,
{
    match &cli.command {
        Command::Index { folder, force } => run_index(&engine, folder, *force).await,
        Command::Search {
            folder,
            query,
            mode,
            top_k,
            keyword_weight,
            semantic_weight,
        } => {
            run_index(&engine, folder, false).await?;

            let mode = match mode.as_str() {
                "keyword" => SearchMode::Keyword,
                "semantic" => SearchMode::Semantic,
                "hybrid" => SearchMode::Hybrid,
                other => anyhow::bail!("unknown search mode: {other}"),
            };

            let hits = match mode {
                SearchMode::Hybrid => {
                    let params = HybridParams {
                        keyword_limit: (*top_k).max(20),
                        semantic_limit: (*top_k).max(20),
                        keyword_weight: *keyword_weight,
                        semantic_weight: *semantic_weight,
                    };
                    engine
                        .retriever
                        .hybrid_search(query, *top_k, params)
                        .await
                }
                mode => engine.retriever.search(query, mode, *top_k).await,
            }
            .map_err(|error| anyhow::anyhow!(error.to_string()))?;

            if hits.is_empty() {
                println!("no results");
                return Ok(());
            }

            for hit in &hits {
                let page = hit
                    .chunk
                    .page
                    .map(|p| format!(" p.{p}"))
                    .unwrap_or_default();
                println!("{:>3}. [{:.4}] chunk={}{}", hit.rank, hit.score, hit.chunk.id, page);
                println!("     {}", hit.snippet(query, 200));
            }
            println!("\n{} result(s)", hits.len());
            Ok(())
        }
        Command::Compact => {
            let mut vectors = engine.vectors.write().await;
            vectors
                .load(&engine.config.index_path, &engine.config.map_path)
                .map_err(|error| anyhow::anyhow!(error.to_string()))?;
            let before = vectors.len();
            vectors.compact();
            vectors
                .save(&engine.config.index_path, &engine.config.map_path)
                .map_err(|error| anyhow::anyhow!(error.to_string()))?;
            println!("compacted vector index: {} live vectors", before);
            Ok(())
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();
    info!(
        version = env!("CARGO_PKG_VERSION"),
        started_at = %Utc::now().to_rfc3339(),
        "hybrid-search boot"
    );

    match cli.opensearch_url.clone() {
        Some(endpoint) => {
            let lexical = Arc::new(
                OpenSearchIndex::new(&endpoint, cli.opensearch_index.clone())
                    .map_err(|error| anyhow::anyhow!(error.to_string()))?,
            );
            lexical
                .ensure_index()
                .await
                .map_err(|error| anyhow::anyhow!(error.to_string()))?;
            let engine = build_engine(&cli, lexical)?;
            run_command(&cli, engine).await
        }
        None => {
            let engine = build_engine(&cli, Arc::new(MemoryLexicalIndex::new()))?;
            run_command(&cli, engine).await
        }
    }
}
