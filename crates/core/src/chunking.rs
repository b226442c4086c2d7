use std::collections::HashSet;
use std::sync::Arc;

use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::IndexError;
use crate::extract::PageText;
use crate::models::Chunk;
use crate::tokenize::Tokenizer;

/// Window size and overlap, both in tokens.
#[derive(Debug, Clone, Copy)]
pub struct ChunkerConfig {
    pub size: usize,
    pub overlap: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            size: 800,
            overlap: 150,
        }
    }
}

impl ChunkerConfig {
    pub fn validate(&self) -> Result<(), IndexError> {
        if self.size == 0 {
            return Err(IndexError::InvalidChunkConfig(
                "chunk size must be greater than zero".to_string(),
            ));
        }
        if self.overlap >= self.size {
            return Err(IndexError::InvalidChunkConfig(format!(
                "overlap {} must be smaller than chunk size {}",
                self.overlap, self.size
            )));
        }
        Ok(())
    }
}

pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .replace('\u{a0}', " ")
}

/// Deterministic fingerprint of a chunk: SHA-256 over the normalized text
/// plus the page tag. Equal hashes mean duplicate chunks.
pub fn content_hash(text: &str, page: Option<u32>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize_whitespace(text).as_bytes());
    if let Some(page) = page {
        hasher.update(page.to_le_bytes());
    }
    format!("{:x}", hasher.finalize())
}

/// Splits extracted page text into overlapping token windows.
pub struct Chunker {
    config: ChunkerConfig,
    tokenizer: Arc<dyn Tokenizer>,
}

impl Chunker {
    pub fn new(config: ChunkerConfig, tokenizer: Arc<dyn Tokenizer>) -> Result<Self, IndexError> {
        config.validate()?;
        Ok(Self { config, tokenizer })
    }

    /// Chunk one page's text into windows of `size` tokens stepping by
    /// `size - overlap`. The final window may be shorter and is still
    /// emitted; text of up to `size` tokens yields exactly one chunk.
    pub fn chunk_text(&self, document_id: Uuid, text: &str, page: Option<u32>) -> Vec<Chunk> {
        let tokens = self.tokenizer.tokenize(text);
        if tokens.is_empty() {
            return Vec::new();
        }

        let step = self.config.size - self.config.overlap;
        let mut chunks = Vec::new();
        let mut start = 0;

        loop {
            let end = (start + self.config.size).min(tokens.len());
            let span_start = tokens[start].start;
            let span_end = tokens[end - 1].end;
            let span = &text[span_start..span_end];

            chunks.push(Chunk {
                id: Uuid::new_v4(),
                document_id,
                page,
                start_offset: span_start,
                end_offset: span_end,
                text: span.to_string(),
                text_hash: content_hash(span, page),
            });

            if end == tokens.len() {
                break;
            }
            start += step;
        }

        chunks
    }

    /// Chunk each page independently, concatenating in page order.
    /// Chunk boundaries never cross a page boundary.
    pub fn chunk_pages(&self, document_id: Uuid, pages: &[PageText]) -> Vec<Chunk> {
        pages
            .iter()
            .flat_map(|page| self.chunk_text(document_id, &page.text, page.number))
            .collect()
    }
}

/// First-wins dedup on content hash, preserving the order of survivors.
/// Expected across a whole indexing run, not per document.
pub fn dedup_chunks(chunks: Vec<Chunk>) -> Vec<Chunk> {
    let mut seen = HashSet::new();
    chunks
        .into_iter()
        .filter(|chunk| seen.insert(chunk.text_hash.clone()))
        .collect()
}
