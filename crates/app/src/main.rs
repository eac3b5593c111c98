use chrono::Utc;
use clap::{Parser, Subcommand};
use docrag_core::{
    AnswerComposer, BatchDiscovery, ChunkingConfig, DistanceMetric, Embedder, ExtractorRegistry,
    FsDocumentStore, HashEmbedder, HttpOcrEngine, IngestionWorker, InMemoryQueue, OcrEngine,
    OpenAiChatModel, OpenAiEmbedder, QdrantVectorStore, TaskOutcome, VectorStore,
};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "docrag", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Directory holding the source documents
    #[arg(long, default_value = "./documents")]
    docs_dir: String,

    /// Qdrant base URL
    #[arg(long, default_value = "http://localhost:6333")]
    qdrant_url: String,

    /// Qdrant collection
    #[arg(long, default_value = "document_embeddings")]
    qdrant_collection: String,

    /// Days before a stored entry expires
    #[arg(long, default_value = "30")]
    retention_days: i64,

    /// OpenAI-compatible base URL for embeddings and chat
    #[arg(long, env = "OPENAI_BASE_URL", default_value = "http://localhost:11434/v1")]
    openai_url: String,

    /// API key for the embeddings/chat endpoint
    #[arg(long, env = "OPENAI_API_KEY")]
    openai_api_key: Option<String>,

    /// Embedding model identifier
    #[arg(long, default_value = "text-embedding-ada-002")]
    embedding_model: String,

    /// Dimensionality of the embedding vectors
    #[arg(long, default_value = "1536")]
    embedding_dimension: usize,

    /// Chat model identifier
    #[arg(long, default_value = "gpt-4o-mini")]
    chat_model: String,

    /// Use the deterministic local embedder instead of the HTTP provider
    #[arg(long, default_value_t = false)]
    local_embedder: bool,

    /// OCR endpoint for image files; images are skipped when unset
    #[arg(long, env = "OCR_ENDPOINT")]
    ocr_endpoint: Option<String>,

    /// API key for the OCR endpoint
    #[arg(long, env = "OCR_API_KEY")]
    ocr_api_key: Option<String>,

    /// Maximum characters per chunk
    #[arg(long, default_value = "1000")]
    chunk_size: usize,

    /// Characters of overlap between consecutive chunks
    #[arg(long, default_value = "100")]
    chunk_overlap: usize,
}

#[derive(Subcommand)]
enum Command {
    /// Create the vector index (idempotent, run once per deployment)
    Setup,
    /// Scan the document store and report unprocessed files
    Discover,
    /// Discover unprocessed files and ingest them in-process
    Ingest,
    /// Ask a question against the indexed documents
    Ask {
        #[arg(long)]
        question: String,
    },
    /// List stored document ids
    List {
        #[arg(long)]
        prefix: Option<String>,
        #[arg(long, default_value = "100")]
        limit: usize,
    },
    /// Show one stored entry
    Get {
        #[arg(long)]
        document_id: String,
    },
    /// Delete one stored entry
    Delete {
        #[arg(long)]
        document_id: String,
    },
    /// Remove entries past their retention window
    PurgeExpired,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();

    let vectors = Arc::new(QdrantVectorStore::new(
        &cli.qdrant_url,
        &cli.qdrant_collection,
        cli.retention_days,
    )?);
    let documents = Arc::new(FsDocumentStore::new(&cli.docs_dir));
    let embedder: Arc<dyn Embedder> = if cli.local_embedder {
        Arc::new(HashEmbedder::new(cli.embedding_dimension))
    } else {
        Arc::new(OpenAiEmbedder::new(
            &cli.openai_url,
            &cli.embedding_model,
            cli.embedding_dimension,
            cli.openai_api_key.clone(),
        ))
    };

    info!(
        version = env!("CARGO_PKG_VERSION"),
        started_at = %Utc::now().to_rfc3339(),
        "docrag boot"
    );

    match cli.command {
        Command::Setup => {
            vectors
                .create_index(cli.embedding_dimension, DistanceMetric::Cosine)
                .await?;
            println!(
                "index ready: collection={} dimension={}",
                cli.qdrant_collection, cli.embedding_dimension
            );
        }
        Command::Discover => {
            let queue = Arc::new(InMemoryQueue::new());
            let discovery = BatchDiscovery::new(documents.clone(), queue.clone());
            let report = discovery.run().await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Ingest => {
            let queue = Arc::new(InMemoryQueue::new());
            let discovery = BatchDiscovery::new(documents.clone(), queue.clone());
            let report = discovery.run().await?;
            println!("{}", serde_json::to_string_pretty(&report)?);

            let ocr: Option<Arc<dyn OcrEngine>> = cli
                .ocr_endpoint
                .as_ref()
                .map(|endpoint| {
                    Arc::new(HttpOcrEngine::new(endpoint, cli.ocr_api_key.clone()))
                        as Arc<dyn OcrEngine>
                });
            let worker = IngestionWorker::new(
                documents.clone(),
                embedder.clone(),
                vectors.clone(),
                ExtractorRegistry::standard(ocr),
                ChunkingConfig {
                    chunk_size: cli.chunk_size,
                    overlap: cli.chunk_overlap,
                },
            );

            // The queue drain stands in for the hosting trigger infrastructure:
            // one worker invocation per task, failures left for the next run.
            while let Some(task) = queue.dequeue() {
                match worker.run(&task).await {
                    Ok(TaskOutcome::Indexed {
                        document_id,
                        chunks_embedded,
                        chunks_total,
                    }) => {
                        println!(
                            "indexed {document_id} ({chunks_embedded}/{chunks_total} chunks)"
                        );
                    }
                    Ok(TaskOutcome::NothingToIndex { reason }) => {
                        println!("skipped {}: {reason}", task.file_name);
                    }
                    Err(error) => {
                        warn!(file = %task.file_name, %error, "ingestion failed, file left for the next run");
                    }
                }
            }
        }
        Command::Ask { question } => {
            let chat = OpenAiChatModel::new(
                &cli.openai_url,
                &cli.chat_model,
                cli.openai_api_key.clone(),
            );
            let composer = AnswerComposer::new(embedder, vectors, chat);
            println!("{}", composer.answer(&question).await);
        }
        Command::List { prefix, limit } => {
            let ids = vectors.list(prefix.as_deref(), limit).await?;
            for id in ids {
                println!("{id}");
            }
        }
        Command::Get { document_id } => match vectors.get(&document_id).await? {
            Some(entry) => println!("{}", serde_json::to_string_pretty(&entry)?),
            None => println!("not found: {document_id}"),
        },
        Command::Delete { document_id } => {
            if vectors.delete(&document_id).await? {
                println!("deleted {document_id}");
            } else {
                println!("not found: {document_id}");
            }
        }
        Command::PurgeExpired => {
            vectors.purge_expired().await?;
            println!("expired entries purged");
        }
    }

    Ok(())
}
