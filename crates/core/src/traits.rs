use std::path::Path;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::SearchError;
use crate::models::{Chunk, Document};

/// Term index collaborator. Ranks chunks for a query with tf-idf style
/// scoring; chunk text reaches it whenever a chunk is persisted.
#[async_trait]
pub trait LexicalIndex: Send + Sync {
    async fn index_chunks(&self, chunks: &[Chunk]) -> Result<(), SearchError>;

    async fn delete_document(&self, document_id: Uuid) -> Result<(), SearchError>;

    /// Ranked `(chunk_id, score)` pairs, best first.
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<(Uuid, f64)>, SearchError>;
}

/// Persistence collaborator for documents and their chunks.
///
/// A document exclusively owns its chunks: deleting the document cascades.
#[async_trait]
pub trait ChunkStore: Send + Sync {
    async fn add_chunks(&self, chunks: &[Chunk]) -> Result<(), SearchError>;

    async fn chunk(&self, chunk_id: Uuid) -> Result<Option<Chunk>, SearchError>;

    /// A document's chunks in insertion order.
    async fn chunks_by_document(&self, document_id: Uuid) -> Result<Vec<Chunk>, SearchError>;

    async fn delete_chunks_by_document(&self, document_id: Uuid) -> Result<(), SearchError>;

    async fn upsert_document(&self, document: &Document) -> Result<(), SearchError>;

    async fn document_by_path(&self, path: &Path) -> Result<Option<Document>, SearchError>;

    async fn documents(&self) -> Result<Vec<Document>, SearchError>;

    /// Removes the document row and cascades to its chunks.
    async fn remove_document(&self, document_id: Uuid) -> Result<(), SearchError>;
}
