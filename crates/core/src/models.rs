use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum DocumentStatus {
    Pending,
    Indexed,
    Error,
}

/// One row per source file, unique by path. Owned by the job controller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: Uuid,
    pub path: PathBuf,
    pub title: String,
    pub ext: String,
    pub mtime: DateTime<Utc>,
    pub size: u64,
    pub status: DocumentStatus,
    pub error_message: Option<String>,
}

/// A bounded span of a document's text, the retrieval unit.
///
/// Immutable once created; a document's chunks are replaced wholesale when
/// the document is re-indexed. `text_hash` determines equivalence: two chunks
/// with equal hash are duplicates and only the first survives an indexing run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub id: Uuid,
    pub document_id: Uuid,
    pub page: Option<u32>,
    /// Byte offset of the first token in the page text. Best-effort after
    /// tokenization, usable for citation display only.
    pub start_offset: usize,
    pub end_offset: usize,
    pub text: String,
    pub text_hash: String,
}

/// Link between a chunk and its slot in the vector index.
///
/// At most one live entry per (chunk, model); the store's live vector count
/// equals the number of non-tombstoned entries.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VectorEntry {
    pub chunk_id: Uuid,
    pub vector_id: u32,
    pub model_id: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum JobState {
    Created,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobError {
    pub path: PathBuf,
    pub reason: String,
}

/// One bounded execution of the indexing pipeline over a target scope.
///
/// Created at job start, mutated only by the controller task that owns it,
/// immutable once finished.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexJob {
    pub id: Uuid,
    pub target_path: PathBuf,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub total: usize,
    pub done: usize,
    pub error_count: usize,
    pub errors: Vec<JobError>,
    pub state: JobState,
}

impl IndexJob {
    pub fn new(target_path: PathBuf) -> Self {
        Self {
            id: Uuid::new_v4(),
            target_path,
            started_at: Utc::now(),
            finished_at: None,
            total: 0,
            done: 0,
            error_count: 0,
            errors: Vec::new(),
            state: JobState::Created,
        }
    }

    pub fn record_error(&mut self, path: PathBuf, reason: String) {
        self.errors.push(JobError { path, reason });
        self.error_count += 1;
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum SearchMode {
    Keyword,
    Semantic,
    Hybrid,
}

/// A ranked retrieval hit with its chunk hydrated for citation display.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub chunk: Chunk,
    pub score: f64,
    pub rank: usize,
}

impl SearchHit {
    /// Excerpt of the chunk centered on the first query-term occurrence.
    pub fn snippet(&self, query: &str, max_len: usize) -> String {
        let text = &self.chunk.text;
        if text.len() <= max_len {
            return text.clone();
        }

        let lowered = text.to_lowercase();
        let mut start = 0;
        for word in query.to_lowercase().split_whitespace() {
            if let Some(pos) = lowered.find(word) {
                start = pos.saturating_sub(max_len / 2);
                break;
            }
        }

        while start < text.len() && !text.is_char_boundary(start) {
            start += 1;
        }
        let mut end = (start + max_len).min(text.len());
        while end < text.len() && !text.is_char_boundary(end) {
            end += 1;
        }

        let mut snippet = text[start..end].to_string();
        if start > 0 {
            snippet = format!("...{snippet}");
        }
        if end < text.len() {
            snippet.push_str("...");
        }
        snippet
    }
}
