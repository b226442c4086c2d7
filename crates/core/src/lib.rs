pub mod chunking;
pub mod embeddings;
pub mod error;
pub mod extract;
pub mod job;
pub mod models;
pub mod retriever;
pub mod stores;
pub mod tokenize;
pub mod traits;
pub mod vector_store;

pub use chunking::{content_hash, dedup_chunks, normalize_whitespace, Chunker, ChunkerConfig};
pub use embeddings::{CharacterNgramEmbedder, Embedder, DEFAULT_EMBEDDING_DIMENSIONS};
pub use error::{IndexError, SearchError};
pub use extract::{DefaultExtractor, Extraction, LopdfExtractor, PageText, PlainTextExtractor};
pub use job::{Indexer, IndexerConfig, JobHandle, JobProgress};
pub use models::{
    Chunk, Document, DocumentStatus, IndexJob, JobError, JobState, SearchHit, SearchMode,
    VectorEntry,
};
pub use retriever::{HybridParams, Retriever};
pub use stores::{MemoryChunkStore, MemoryLexicalIndex, OpenSearchIndex};
pub use tokenize::{ScriptAwareTokenizer, Token, Tokenizer};
pub use traits::{ChunkStore, LexicalIndex};
pub use vector_store::{IndexKind, VectorIndexStore};
