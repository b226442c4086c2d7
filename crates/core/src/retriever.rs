use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::warn;
use uuid::Uuid;

use crate::embeddings::Embedder;
use crate::error::SearchError;
use crate::models::{Chunk, SearchHit, SearchMode};
use crate::traits::{ChunkStore, LexicalIndex};
use crate::vector_store::VectorIndexStore;

/// Tuning for hybrid fusion: how many candidates to pull from each side and
/// how to weight them.
#[derive(Debug, Clone, Copy)]
pub struct HybridParams {
    pub keyword_limit: usize,
    pub semantic_limit: usize,
    pub keyword_weight: f64,
    pub semantic_weight: f64,
}

impl Default for HybridParams {
    fn default() -> Self {
        Self {
            keyword_limit: 20,
            semantic_limit: 20,
            keyword_weight: 0.5,
            semantic_weight: 0.5,
        }
    }
}

/// Answers queries against the lexical index and the vector index, fusing
/// their rankings into one ordered hit list.
///
/// All three modes are read-only: searches may run concurrently with each
/// other and with an in-progress indexing job, which serializes its own
/// writes behind the store's write lock.
pub struct Retriever<L, C>
where
    L: LexicalIndex,
    C: ChunkStore,
{
    lexical: Arc<L>,
    chunks: Arc<C>,
    embedder: Arc<dyn Embedder>,
    vectors: Arc<RwLock<VectorIndexStore>>,
}

impl<L, C> Retriever<L, C>
where
    L: LexicalIndex,
    C: ChunkStore,
{
    pub fn new(
        lexical: Arc<L>,
        chunks: Arc<C>,
        embedder: Arc<dyn Embedder>,
        vectors: Arc<RwLock<VectorIndexStore>>,
    ) -> Self {
        Self {
            lexical,
            chunks,
            embedder,
            vectors,
        }
    }

    /// Unified entry point over the three retrieval modes.
    pub async fn search(
        &self,
        query: &str,
        mode: SearchMode,
        limit: usize,
    ) -> Result<Vec<SearchHit>, SearchError> {
        match mode {
            SearchMode::Keyword => self.keyword_search(query, limit).await,
            SearchMode::Semantic => self.semantic_search(query, limit).await,
            SearchMode::Hybrid => {
                self.hybrid_search(query, limit, HybridParams::default()).await
            }
        }
    }

    /// Term-index ranking with chunk metadata attached.
    pub async fn keyword_search(
        &self,
        query: &str,
        limit: usize,
    ) -> Result<Vec<SearchHit>, SearchError> {
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }
        let raw = self.lexical.search(query, limit).await?;
        self.hydrate(raw).await
    }

    /// Embeds the query and ranks by cosine similarity.
    pub async fn semantic_search(
        &self,
        query: &str,
        limit: usize,
    ) -> Result<Vec<SearchHit>, SearchError> {
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }
        let raw = self.raw_semantic(query, limit).await?;
        self.hydrate(raw).await
    }

    /// Fetches both candidate lists, min-max normalizes each independently,
    /// and combines `keyword_weight * kw + semantic_weight * sem`, with
    /// absence from a list contributing zero. Ties break by keyword rank,
    /// then semantic rank, then chunk id, so the order is total.
    pub async fn hybrid_search(
        &self,
        query: &str,
        limit: usize,
        params: HybridParams,
    ) -> Result<Vec<SearchHit>, SearchError> {
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }

        let keyword = self.lexical.search(query, params.keyword_limit).await?;
        let semantic = self.raw_semantic(query, params.semantic_limit).await?;
        if keyword.is_empty() && semantic.is_empty() {
            return Ok(Vec::new());
        }

        let keyword_norm = normalize_scores(&keyword.iter().map(|(_, s)| *s).collect::<Vec<_>>());
        let semantic_norm = normalize_scores(&semantic.iter().map(|(_, s)| *s).collect::<Vec<_>>());

        struct Fused {
            combined: f64,
            keyword_rank: usize,
            semantic_rank: usize,
        }

        let mut fused: HashMap<Uuid, Fused> = HashMap::new();
        for (rank, (chunk_id, _)) in keyword.iter().enumerate() {
            fused.insert(
                *chunk_id,
                Fused {
                    combined: params.keyword_weight * keyword_norm[rank],
                    keyword_rank: rank,
                    semantic_rank: usize::MAX,
                },
            );
        }
        for (rank, (chunk_id, _)) in semantic.iter().enumerate() {
            let entry = fused.entry(*chunk_id).or_insert(Fused {
                combined: 0.0,
                keyword_rank: usize::MAX,
                semantic_rank: usize::MAX,
            });
            entry.combined += params.semantic_weight * semantic_norm[rank];
            entry.semantic_rank = rank;
        }

        let mut ranked: Vec<(Uuid, Fused)> = fused.into_iter().collect();
        ranked.sort_by(|(a_id, a), (b_id, b)| {
            b.combined
                .total_cmp(&a.combined)
                .then_with(|| a.keyword_rank.cmp(&b.keyword_rank))
                .then_with(|| a.semantic_rank.cmp(&b.semantic_rank))
                .then_with(|| a_id.cmp(b_id))
        });
        ranked.truncate(limit);

        self.hydrate(
            ranked
                .into_iter()
                .map(|(chunk_id, fused)| (chunk_id, fused.combined))
                .collect(),
        )
        .await
    }

    /// Surrounding chunks of the same document, for citation display.
    pub async fn chunk_context(
        &self,
        chunk: &Chunk,
        before: usize,
        after: usize,
    ) -> Result<Vec<Chunk>, SearchError> {
        let siblings = self.chunks.chunks_by_document(chunk.document_id).await?;
        let Some(position) = siblings.iter().position(|c| c.id == chunk.id) else {
            return Ok(vec![chunk.clone()]);
        };

        let start = position.saturating_sub(before);
        let end = (position + after + 1).min(siblings.len());
        Ok(siblings[start..end].to_vec())
    }

    async fn raw_semantic(
        &self,
        query: &str,
        limit: usize,
    ) -> Result<Vec<(Uuid, f64)>, SearchError> {
        let vectors = self.vectors.read().await;
        if vectors.is_empty() {
            warn!("vector index is empty, semantic candidates unavailable");
            return Ok(Vec::new());
        }

        let query_vector = self.embedder.embed(query).map_err(SearchError::Index)?;
        let hits = vectors
            .search(&query_vector, limit)
            .map_err(SearchError::Index)?;
        Ok(hits
            .into_iter()
            .map(|(chunk_id, score)| (chunk_id, score as f64))
            .collect())
    }

    async fn hydrate(&self, raw: Vec<(Uuid, f64)>) -> Result<Vec<SearchHit>, SearchError> {
        let mut hits = Vec::with_capacity(raw.len());
        let mut rank = 0;
        for (chunk_id, score) in raw {
            if let Some(chunk) = self.chunks.chunk(chunk_id).await? {
                rank += 1;
                hits.push(SearchHit { chunk, score, rank });
            }
        }
        Ok(hits)
    }
}

/// Min-max scaling to [0, 1]. A non-empty flat list maps to all ones so that
/// a method returning uniform scores is not penalized in fusion.
fn normalize_scores(scores: &[f64]) -> Vec<f64> {
    if scores.is_empty() {
        return Vec::new();
    }

    let min = scores.iter().cloned().fold(f64::INFINITY, f64::min);
    let max = scores.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    if max == min {
        return vec![1.0; scores.len()];
    }

    scores.iter().map(|s| (s - min) / (max - min)).collect()
}
