use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::SearchError;
use crate::models::{Chunk, Document};
use crate::traits::{ChunkStore, LexicalIndex};

/// In-process document and chunk persistence.
#[derive(Default)]
pub struct MemoryChunkStore {
    inner: RwLock<ChunkStoreInner>,
}

#[derive(Default)]
struct ChunkStoreInner {
    documents: HashMap<Uuid, Document>,
    by_path: HashMap<PathBuf, Uuid>,
    chunks: HashMap<Uuid, Chunk>,
    by_document: HashMap<Uuid, Vec<Uuid>>,
}

impl MemoryChunkStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ChunkStore for MemoryChunkStore {
    async fn add_chunks(&self, chunks: &[Chunk]) -> Result<(), SearchError> {
        let mut inner = self.inner.write().await;
        for chunk in chunks {
            inner
                .by_document
                .entry(chunk.document_id)
                .or_default()
                .push(chunk.id);
            inner.chunks.insert(chunk.id, chunk.clone());
        }
        Ok(())
    }

    async fn chunk(&self, chunk_id: Uuid) -> Result<Option<Chunk>, SearchError> {
        Ok(self.inner.read().await.chunks.get(&chunk_id).cloned())
    }

    async fn chunks_by_document(&self, document_id: Uuid) -> Result<Vec<Chunk>, SearchError> {
        let inner = self.inner.read().await;
        let ids = inner.by_document.get(&document_id).cloned().unwrap_or_default();
        Ok(ids
            .iter()
            .filter_map(|id| inner.chunks.get(id).cloned())
            .collect())
    }

    async fn delete_chunks_by_document(&self, document_id: Uuid) -> Result<(), SearchError> {
        let mut inner = self.inner.write().await;
        if let Some(ids) = inner.by_document.remove(&document_id) {
            for id in ids {
                inner.chunks.remove(&id);
            }
        }
        Ok(())
    }

    async fn upsert_document(&self, document: &Document) -> Result<(), SearchError> {
        let mut inner = self.inner.write().await;
        if let Some(existing) = inner.documents.get(&document.id) {
            let old_path = existing.path.clone();
            if old_path != document.path {
                inner.by_path.remove(&old_path);
            }
        }
        inner.by_path.insert(document.path.clone(), document.id);
        inner.documents.insert(document.id, document.clone());
        Ok(())
    }

    async fn document_by_path(&self, path: &Path) -> Result<Option<Document>, SearchError> {
        let inner = self.inner.read().await;
        Ok(inner
            .by_path
            .get(path)
            .and_then(|id| inner.documents.get(id))
            .cloned())
    }

    async fn documents(&self) -> Result<Vec<Document>, SearchError> {
        let inner = self.inner.read().await;
        let mut documents: Vec<Document> = inner.documents.values().cloned().collect();
        documents.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(documents)
    }

    async fn remove_document(&self, document_id: Uuid) -> Result<(), SearchError> {
        let mut inner = self.inner.write().await;
        if let Some(document) = inner.documents.remove(&document_id) {
            inner.by_path.remove(&document.path);
        }
        if let Some(ids) = inner.by_document.remove(&document_id) {
            for id in ids {
                inner.chunks.remove(&id);
            }
        }
        Ok(())
    }
}

/// In-process term index with tf-idf ranking.
#[derive(Default)]
pub struct MemoryLexicalIndex {
    inner: RwLock<LexicalInner>,
}

#[derive(Default)]
struct LexicalInner {
    postings: HashMap<Uuid, Posting>,
    doc_freq: HashMap<String, usize>,
}

struct Posting {
    document_id: Uuid,
    term_counts: HashMap<String, usize>,
    token_count: usize,
}

impl MemoryLexicalIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

fn lexical_terms(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|term| !term.is_empty())
        .map(str::to_string)
        .collect()
}

impl LexicalInner {
    fn remove_posting(&mut self, chunk_id: Uuid) {
        if let Some(posting) = self.postings.remove(&chunk_id) {
            for term in posting.term_counts.keys() {
                if let Some(freq) = self.doc_freq.get_mut(term) {
                    *freq -= 1;
                    if *freq == 0 {
                        self.doc_freq.remove(term);
                    }
                }
            }
        }
    }
}

#[async_trait]
impl LexicalIndex for MemoryLexicalIndex {
    async fn index_chunks(&self, chunks: &[Chunk]) -> Result<(), SearchError> {
        let mut inner = self.inner.write().await;
        for chunk in chunks {
            inner.remove_posting(chunk.id);

            let terms = lexical_terms(&chunk.text);
            let token_count = terms.len();
            let mut term_counts: HashMap<String, usize> = HashMap::new();
            for term in terms {
                *term_counts.entry(term).or_insert(0) += 1;
            }
            for term in term_counts.keys() {
                *inner.doc_freq.entry(term.clone()).or_insert(0) += 1;
            }
            inner.postings.insert(
                chunk.id,
                Posting {
                    document_id: chunk.document_id,
                    term_counts,
                    token_count,
                },
            );
        }
        Ok(())
    }

    async fn delete_document(&self, document_id: Uuid) -> Result<(), SearchError> {
        let mut inner = self.inner.write().await;
        let doomed: Vec<Uuid> = inner
            .postings
            .iter()
            .filter(|(_, posting)| posting.document_id == document_id)
            .map(|(id, _)| *id)
            .collect();
        for chunk_id in doomed {
            inner.remove_posting(chunk_id);
        }
        Ok(())
    }

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<(Uuid, f64)>, SearchError> {
        let terms = lexical_terms(query);
        if terms.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let inner = self.inner.read().await;
        let total_docs = inner.postings.len();
        if total_docs == 0 {
            return Ok(Vec::new());
        }

        let mut scored: Vec<(Uuid, f64)> = Vec::new();
        for (chunk_id, posting) in &inner.postings {
            if posting.token_count == 0 {
                continue;
            }
            let mut score = 0.0;
            for term in &terms {
                let count = posting.term_counts.get(term).copied().unwrap_or(0);
                if count == 0 {
                    continue;
                }
                let df = inner.doc_freq.get(term).copied().unwrap_or(0);
                let idf = (1.0 + total_docs as f64 / (1.0 + df as f64)).ln();
                score += (count as f64 / posting.token_count as f64) * idf;
            }
            if score > 0.0 {
                scored.push((*chunk_id, score));
            }
        }

        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        scored.truncate(limit);
        Ok(scored)
    }
}
