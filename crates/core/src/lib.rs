pub mod answer;
pub mod chat;
pub mod chunking;
pub mod discovery;
pub mod embeddings;
pub mod error;
pub mod extract;
pub mod identity;
pub mod models;
pub mod stores;
pub mod traits;
pub mod worker;

pub use answer::{
    AnswerComposer, RetrievalContext, CONTEXT_TOP_K, FALLBACK_ANSWER, RELEVANCE_THRESHOLD,
    SNIPPET_MAX_CHARS,
};
pub use chat::{ChatModel, OpenAiChatModel};
pub use chunking::{chunk_text, clean_text};
pub use discovery::BatchDiscovery;
pub use embeddings::{Embedder, HashEmbedder, OpenAiEmbedder, DEFAULT_EMBEDDING_DIMENSIONS};
pub use error::{BackendError, IngestError};
pub use extract::{
    ContentExtractor, ExtractorRegistry, HttpOcrEngine, ImageExtractor, OcrEngine, PdfExtractor,
    PlainTextExtractor, WordExtractor,
};
pub use identity::{digest_bytes, generate_document_id};
pub use models::{
    Chunk, ChunkingConfig, DiscoveryReport, DistanceMetric, EmbeddingRecord, IngestionTask,
    SearchHit, SourceFile, VectorEntry,
};
pub use stores::{FsDocumentStore, InMemoryQueue, InMemoryVectorStore, QdrantVectorStore};
pub use traits::{DocumentStore, TaskQueue, VectorStore};
pub use worker::{average_vector, IngestionWorker, TaskOutcome};

pub type Result<T, E = IngestError> = std::result::Result<T, E>;
