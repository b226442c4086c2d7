use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;
use walkdir::WalkDir;

use crate::chunking::Chunker;
use crate::embeddings::Embedder;
use crate::error::{IndexError, SearchError};
use crate::extract::Extraction;
use crate::models::{Document, DocumentStatus, IndexJob, JobState};
use crate::traits::{ChunkStore, LexicalIndex};
use crate::vector_store::VectorIndexStore;

#[derive(Debug, Clone)]
pub struct IndexerConfig {
    pub allowed_extensions: Vec<String>,
    /// Chunks embedded per batch, bounding peak memory.
    pub embed_batch_size: usize,
    pub index_path: PathBuf,
    pub map_path: PathBuf,
}

impl IndexerConfig {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            allowed_extensions: vec!["pdf".to_string(), "txt".to_string(), "md".to_string()],
            embed_batch_size: 32,
            index_path: data_dir.join("embeddings.index"),
            map_path: data_dir.join("embeddings.map"),
        }
    }
}

/// Progress snapshot emitted after each document completes. Delivery is
/// per-document; consumers must not assume anything finer.
#[derive(Debug, Clone)]
pub struct JobProgress {
    pub job_id: Uuid,
    pub done: usize,
    pub total: usize,
    pub error_count: usize,
    pub current_path: PathBuf,
}

/// Handle to a running job: progress stream, cooperative cancellation, and
/// the finished [`IndexJob`] on completion.
pub struct JobHandle {
    pub job_id: Uuid,
    progress: mpsc::Receiver<JobProgress>,
    cancel: Arc<AtomicBool>,
    task: JoinHandle<IndexJob>,
}

impl JobHandle {
    /// Requests cancellation; observed at the next document boundary, never
    /// mid-document. Already-committed work is kept.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    pub async fn next_progress(&mut self) -> Option<JobProgress> {
        self.progress.recv().await
    }

    pub async fn wait(self) -> Result<IndexJob, IndexError> {
        self.task
            .await
            .map_err(|error| IndexError::Task(error.to_string()))
    }
}

/// Drives indexing runs over a target folder, coordinating extraction,
/// chunking, embedding, the vector index, and chunk persistence.
///
/// Jobs are single-flight per scope: a second start against a running target
/// fails with `JobAlreadyRunning` instead of queuing silently.
pub struct Indexer<L, C>
where
    L: LexicalIndex + 'static,
    C: ChunkStore + 'static,
{
    lexical: Arc<L>,
    store: Arc<C>,
    embedder: Arc<dyn Embedder>,
    extractor: Arc<dyn Extraction>,
    vectors: Arc<RwLock<VectorIndexStore>>,
    chunker: Arc<Chunker>,
    config: IndexerConfig,
    running: Arc<Mutex<HashSet<PathBuf>>>,
}

impl<L, C> Indexer<L, C>
where
    L: LexicalIndex + 'static,
    C: ChunkStore + 'static,
{
    pub fn new(
        lexical: Arc<L>,
        store: Arc<C>,
        embedder: Arc<dyn Embedder>,
        extractor: Arc<dyn Extraction>,
        vectors: Arc<RwLock<VectorIndexStore>>,
        chunker: Arc<Chunker>,
        config: IndexerConfig,
    ) -> Self {
        Self {
            lexical,
            store,
            embedder,
            extractor,
            vectors,
            chunker,
            config,
            running: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Spawns an indexing run on a worker task so the caller stays
    /// responsive. `force` re-indexes every document regardless of mtime.
    pub fn start(&self, target: &Path, force: bool) -> Result<JobHandle, IndexError> {
        let scope = target
            .canonicalize()
            .unwrap_or_else(|_| target.to_path_buf());

        {
            let mut running = self.running.lock().unwrap_or_else(|e| e.into_inner());
            if !running.insert(scope.clone()) {
                return Err(IndexError::JobAlreadyRunning(scope));
            }
        }

        let job = IndexJob::new(target.to_path_buf());
        let job_id = job.id;
        let (progress_tx, progress_rx) = mpsc::channel(256);
        let cancel = Arc::new(AtomicBool::new(false));

        let worker = JobWorker {
            lexical: self.lexical.clone(),
            store: self.store.clone(),
            embedder: self.embedder.clone(),
            extractor: self.extractor.clone(),
            vectors: self.vectors.clone(),
            chunker: self.chunker.clone(),
            config: self.config.clone(),
            force,
            cancel: cancel.clone(),
            progress: progress_tx,
            _scope: ScopeGuard {
                running: self.running.clone(),
                scope,
            },
        };
        let task = tokio::spawn(worker.run(job));

        Ok(JobHandle {
            job_id,
            progress: progress_rx,
            cancel,
            task,
        })
    }
}

/// Frees the scope slot when the worker finishes, however it finishes.
struct ScopeGuard {
    running: Arc<Mutex<HashSet<PathBuf>>>,
    scope: PathBuf,
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        let mut running = self.running.lock().unwrap_or_else(|e| e.into_inner());
        running.remove(&self.scope);
    }
}

struct JobWorker<L, C> {
    lexical: Arc<L>,
    store: Arc<C>,
    embedder: Arc<dyn Embedder>,
    extractor: Arc<dyn Extraction>,
    vectors: Arc<RwLock<VectorIndexStore>>,
    chunker: Arc<Chunker>,
    config: IndexerConfig,
    force: bool,
    cancel: Arc<AtomicBool>,
    progress: mpsc::Sender<JobProgress>,
    _scope: ScopeGuard,
}

struct ScannedFile {
    path: PathBuf,
    mtime: DateTime<Utc>,
    size: u64,
}

impl<L, C> JobWorker<L, C>
where
    L: LexicalIndex,
    C: ChunkStore,
{
    async fn run(self, mut job: IndexJob) -> IndexJob {
        job.state = JobState::Running;
        info!(job = %job.id, target = %job.target_path.display(), "index job started");

        if let Err(err) = self.execute(&mut job).await {
            error!(job = %job.id, error = %err, "index job failed");
            job.state = JobState::Failed;
        }
        if !job.state.is_terminal() {
            job.state = JobState::Completed;
        }
        job.finished_at = Some(Utc::now());

        if job.state != JobState::Failed {
            let vectors = self.vectors.read().await;
            if let Err(err) = vectors.save(&self.config.index_path, &self.config.map_path) {
                warn!(job = %job.id, error = %err, "failed to persist vector index");
            }
        }

        info!(
            job = %job.id,
            state = ?job.state,
            done = job.done,
            total = job.total,
            errors = job.error_count,
            "index job finished"
        );
        job
    }

    async fn execute(&self, job: &mut IndexJob) -> Result<(), IndexError> {
        let scanned = scan_target(&job.target_path, &self.config.allowed_extensions)?;

        self.remove_missing(&job.target_path, &scanned).await?;
        let work = self.build_worklist(&scanned).await?;
        job.total = work.len();

        let mut seen_hashes: HashSet<String> = HashSet::new();
        for mut document in work {
            if self.cancel.load(Ordering::Relaxed) {
                info!(job = %job.id, done = job.done, "index job cancelled");
                job.state = JobState::Cancelled;
                break;
            }

            match self.index_document(&document, &mut seen_hashes).await {
                Ok(chunk_count) => {
                    document.status = DocumentStatus::Indexed;
                    document.error_message = None;
                    info!(path = %document.path.display(), chunk_count, "indexed document");
                }
                Err(err) => {
                    warn!(path = %document.path.display(), error = %err, "document failed, continuing");
                    document.status = DocumentStatus::Error;
                    document.error_message = Some(err.to_string());
                    job.record_error(document.path.clone(), err.to_string());
                }
            }
            self.store
                .upsert_document(&document)
                .await
                .map_err(store_error)?;

            job.done += 1;
            let _ = self.progress.try_send(JobProgress {
                job_id: job.id,
                done: job.done,
                total: job.total,
                error_count: job.error_count,
                current_path: document.path.clone(),
            });
        }

        Ok(())
    }

    /// Documents in the store but no longer on disk go away along with their
    /// chunks and vector entries.
    async fn remove_missing(
        &self,
        scope: &Path,
        scanned: &[ScannedFile],
    ) -> Result<(), IndexError> {
        let scanned_paths: HashSet<&Path> =
            scanned.iter().map(|file| file.path.as_path()).collect();

        for document in self.store.documents().await.map_err(store_error)? {
            if !document.path.starts_with(scope) || scanned_paths.contains(document.path.as_path())
            {
                continue;
            }

            info!(path = %document.path.display(), "removing vanished document");
            self.delete_document_data(&document).await?;
            self.store
                .remove_document(document.id)
                .await
                .map_err(store_error)?;
        }
        Ok(())
    }

    /// New files become pending documents; files whose mtime changed are
    /// marked for re-indexing; unchanged files are skipped entirely.
    async fn build_worklist(&self, scanned: &[ScannedFile]) -> Result<Vec<Document>, IndexError> {
        let mut work = Vec::new();

        for file in scanned {
            let existing = self
                .store
                .document_by_path(&file.path)
                .await
                .map_err(store_error)?;

            match existing {
                None => {
                    let document = Document {
                        id: Uuid::new_v4(),
                        path: file.path.clone(),
                        title: file
                            .path
                            .file_name()
                            .map(|name| name.to_string_lossy().to_string())
                            .unwrap_or_default(),
                        ext: file
                            .path
                            .extension()
                            .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
                            .unwrap_or_default(),
                        mtime: file.mtime,
                        size: file.size,
                        status: DocumentStatus::Pending,
                        error_message: None,
                    };
                    self.store
                        .upsert_document(&document)
                        .await
                        .map_err(store_error)?;
                    work.push(document);
                }
                Some(mut document) => {
                    // A Pending row means an earlier run was cancelled before
                    // reaching it; pick it up again even with an equal mtime.
                    if self.force
                        || document.mtime != file.mtime
                        || document.status == DocumentStatus::Pending
                    {
                        document.mtime = file.mtime;
                        document.size = file.size;
                        document.status = DocumentStatus::Pending;
                        document.error_message = None;
                        self.store
                            .upsert_document(&document)
                            .await
                            .map_err(store_error)?;
                        work.push(document);
                    }
                }
            }
        }

        Ok(work)
    }

    /// The per-document pipeline. Every failure here is caught by the run
    /// loop and downgrades only this document.
    async fn index_document(
        &self,
        document: &Document,
        seen_hashes: &mut HashSet<String>,
    ) -> Result<usize, IndexError> {
        // Replace wholesale if the document was indexed before.
        let existing = self
            .store
            .chunks_by_document(document.id)
            .await
            .map_err(store_error)?;
        if !existing.is_empty() {
            let chunk_ids: Vec<Uuid> = existing.iter().map(|chunk| chunk.id).collect();
            self.vectors.write().await.remove(&chunk_ids);
            self.lexical
                .delete_document(document.id)
                .await
                .map_err(store_error)?;
            self.store
                .delete_chunks_by_document(document.id)
                .await
                .map_err(store_error)?;
        }

        let pages = self.extractor.extract(&document.path)?;
        let mut chunks = self.chunker.chunk_pages(document.id, &pages);
        // Job-wide dedup: a chunk whose hash already appeared this run is a
        // duplicate, silently dropped.
        chunks.retain(|chunk| seen_hashes.insert(chunk.text_hash.clone()));
        if chunks.is_empty() {
            return Ok(0);
        }

        let texts: Vec<String> = chunks.iter().map(|chunk| chunk.text.clone()).collect();
        let embedded = self
            .embedder
            .embed_batch(&texts, self.config.embed_batch_size)?;
        let chunk_ids: Vec<Uuid> = chunks.iter().map(|chunk| chunk.id).collect();
        self.vectors.write().await.add(&chunk_ids, embedded)?;

        self.store.add_chunks(&chunks).await.map_err(store_error)?;
        self.lexical
            .index_chunks(&chunks)
            .await
            .map_err(store_error)?;

        Ok(chunks.len())
    }

    async fn delete_document_data(&self, document: &Document) -> Result<(), IndexError> {
        let chunks = self
            .store
            .chunks_by_document(document.id)
            .await
            .map_err(store_error)?;
        if !chunks.is_empty() {
            let chunk_ids: Vec<Uuid> = chunks.iter().map(|chunk| chunk.id).collect();
            self.vectors.write().await.remove(&chunk_ids);
        }
        self.lexical
            .delete_document(document.id)
            .await
            .map_err(store_error)?;
        self.store
            .delete_chunks_by_document(document.id)
            .await
            .map_err(store_error)?;
        Ok(())
    }
}

fn store_error(error: SearchError) -> IndexError {
    IndexError::Store(error.to_string())
}

/// Enumerates indexable files under the target, sorted by path. An
/// unreadable target fails the job before any document is attempted.
fn scan_target(target: &Path, extensions: &[String]) -> Result<Vec<ScannedFile>, IndexError> {
    target.metadata()?;

    let mut files = Vec::new();
    for entry in WalkDir::new(target).into_iter().filter_map(|item| item.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }

        let allowed = entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| {
                extensions
                    .iter()
                    .any(|allowed| allowed.eq_ignore_ascii_case(ext))
            });
        if !allowed {
            continue;
        }

        let metadata = entry.metadata().map_err(std::io::Error::from)?;
        let mtime = metadata
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());
        files.push(ScannedFile {
            path: entry.path().to_path_buf(),
            mtime,
            size: metadata.len(),
        });
    }

    files.sort_unstable_by(|a, b| a.path.cmp(&b.path));
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunking::ChunkerConfig;
    use crate::embeddings::CharacterNgramEmbedder;
    use crate::extract::DefaultExtractor;
    use crate::stores::{MemoryChunkStore, MemoryLexicalIndex};
    use crate::tokenize::ScriptAwareTokenizer;
    use crate::vector_store::IndexKind;
    use tempfile::TempDir;

    struct Fixture {
        indexer: Indexer<MemoryLexicalIndex, MemoryChunkStore>,
        lexical: Arc<MemoryLexicalIndex>,
        store: Arc<MemoryChunkStore>,
        vectors: Arc<RwLock<VectorIndexStore>>,
        corpus: TempDir,
        _data: TempDir,
    }

    fn fixture() -> Fixture {
        let corpus = tempfile::tempdir().unwrap();
        let data = tempfile::tempdir().unwrap();

        let embedder = Arc::new(CharacterNgramEmbedder::new(64));
        let lexical = Arc::new(MemoryLexicalIndex::new());
        let store = Arc::new(MemoryChunkStore::new());
        let vectors = Arc::new(RwLock::new(VectorIndexStore::new(
            64,
            IndexKind::Flat,
            embedder.model_id(),
        )));
        let chunker = Arc::new(
            Chunker::new(
                ChunkerConfig {
                    size: 16,
                    overlap: 4,
                },
                Arc::new(ScriptAwareTokenizer::default()),
            )
            .unwrap(),
        );

        let indexer = Indexer::new(
            lexical.clone(),
            store.clone(),
            embedder as Arc<dyn Embedder>,
            Arc::new(DefaultExtractor::default()),
            vectors.clone(),
            chunker,
            IndexerConfig::new(data.path()),
        );

        Fixture {
            indexer,
            lexical,
            store,
            vectors,
            corpus,
            _data: data,
        }
    }

    fn write_file(fx: &Fixture, name: &str, content: &str) -> PathBuf {
        let path = fx.corpus.path().join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    async fn run_job(fx: &Fixture) -> IndexJob {
        fx.indexer
            .start(fx.corpus.path(), false)
            .unwrap()
            .wait()
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn indexes_new_documents_end_to_end() {
        let fx = fixture();
        write_file(&fx, "pumps.txt", "hydraulic pump maintenance and pressure checks");
        write_file(&fx, "valves.txt", "relief valve inspection intervals");

        let job = run_job(&fx).await;

        assert_eq!(job.state, JobState::Completed);
        assert_eq!(job.total, 2);
        assert_eq!(job.done, 2);
        assert_eq!(job.error_count, 0);

        let documents = fx.store.documents().await.unwrap();
        assert_eq!(documents.len(), 2);
        assert!(documents
            .iter()
            .all(|doc| doc.status == DocumentStatus::Indexed));

        assert!(fx.vectors.read().await.len() > 0);
        let hits = fx.lexical.search("hydraulic pump", 10).await.unwrap();
        assert!(!hits.is_empty());

        // Vector artifacts were persisted as a pair.
        assert!(fx.indexer.config.index_path.exists());
        assert!(fx.indexer.config.map_path.exists());
    }

    #[tokio::test]
    async fn one_bad_document_does_not_abort_the_run() {
        let fx = fixture();
        write_file(&fx, "a.txt", "alpha document about pumps");
        // A pdf that lopdf cannot parse: extraction fails for this one only.
        write_file(&fx, "b.pdf", "%PDF-1.4 this is not a real pdf");
        write_file(&fx, "c.txt", "charlie document about valves");

        let job = run_job(&fx).await;

        assert_eq!(job.state, JobState::Completed);
        assert_eq!(job.done, 3);
        assert_eq!(job.total, 3);
        assert_eq!(job.error_count, 1);
        assert_eq!(job.errors.len(), 1);
        assert!(job.errors[0].path.ends_with("b.pdf"));

        let documents = fx.store.documents().await.unwrap();
        let by_name = |name: &str| {
            documents
                .iter()
                .find(|doc| doc.path.ends_with(name))
                .unwrap()
        };
        assert_eq!(by_name("a.txt").status, DocumentStatus::Indexed);
        assert_eq!(by_name("b.pdf").status, DocumentStatus::Error);
        assert!(by_name("b.pdf").error_message.is_some());
        assert_eq!(by_name("c.txt").status, DocumentStatus::Indexed);

        // The healthy documents are searchable.
        assert!(!fx.lexical.search("pumps", 10).await.unwrap().is_empty());
        assert!(!fx.lexical.search("valves", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn rerun_over_unchanged_corpus_is_a_no_op() {
        let fx = fixture();
        write_file(&fx, "a.txt", "stable content one");
        write_file(&fx, "b.txt", "stable content two");

        let first = run_job(&fx).await;
        assert_eq!(first.state, JobState::Completed);

        let docs_before = fx.store.documents().await.unwrap();
        let chunks_before: Vec<Uuid> = {
            let mut ids = Vec::new();
            for doc in &docs_before {
                ids.extend(
                    fx.store
                        .chunks_by_document(doc.id)
                        .await
                        .unwrap()
                        .iter()
                        .map(|c| c.id),
                );
            }
            ids
        };
        let live_before = fx.vectors.read().await.len();

        let second = run_job(&fx).await;
        assert_eq!(second.state, JobState::Completed);
        assert_eq!(second.total, 0);
        assert_eq!(second.done, second.total);
        assert_eq!(second.error_count, 0);

        let docs_after = fx.store.documents().await.unwrap();
        assert_eq!(
            docs_before.iter().map(|d| d.id).collect::<Vec<_>>(),
            docs_after.iter().map(|d| d.id).collect::<Vec<_>>()
        );
        let chunks_after: Vec<Uuid> = {
            let mut ids = Vec::new();
            for doc in &docs_after {
                ids.extend(
                    fx.store
                        .chunks_by_document(doc.id)
                        .await
                        .unwrap()
                        .iter()
                        .map(|c| c.id),
                );
            }
            ids
        };
        assert_eq!(chunks_before, chunks_after);
        assert_eq!(fx.vectors.read().await.len(), live_before);
    }

    #[tokio::test]
    async fn modified_document_is_reindexed_with_fresh_chunks() {
        let fx = fixture();
        let path = write_file(&fx, "a.txt", "original content about pumps");
        write_file(&fx, "b.txt", "unrelated stable file");

        let first = run_job(&fx).await;
        assert_eq!(first.state, JobState::Completed);

        let doc_before = fx
            .store
            .document_by_path(&path)
            .await
            .unwrap()
            .unwrap();
        let old_chunks = fx.store.chunks_by_document(doc_before.id).await.unwrap();
        assert!(!old_chunks.is_empty());

        // Give the filesystem time to produce a distinct mtime.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        std::fs::write(&path, "rewritten content about turbines instead").unwrap();

        let second = run_job(&fx).await;
        assert_eq!(second.state, JobState::Completed);
        assert_eq!(second.total, 1);
        assert_eq!(second.done, 1);

        let doc_after = fx.store.document_by_path(&path).await.unwrap().unwrap();
        assert_eq!(doc_after.id, doc_before.id);
        let new_chunks = fx.store.chunks_by_document(doc_after.id).await.unwrap();
        assert!(!new_chunks.is_empty());
        assert!(new_chunks.iter().all(|c| !old_chunks.iter().any(|o| o.id == c.id)));

        // Old vectors are gone; stale text no longer matches.
        for old in &old_chunks {
            assert!(!fx.vectors.read().await.contains(&old.id));
        }
        assert!(fx.lexical.search("original", 10).await.unwrap().is_empty());
        assert!(!fx.lexical.search("turbines", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn vanished_documents_are_fully_removed() {
        let fx = fixture();
        let doomed = write_file(&fx, "doomed.txt", "ephemeral text about flywheels");
        write_file(&fx, "keeper.txt", "permanent text about bearings");

        let first = run_job(&fx).await;
        assert_eq!(first.state, JobState::Completed);

        let doc = fx.store.document_by_path(&doomed).await.unwrap().unwrap();
        let doomed_chunks = fx.store.chunks_by_document(doc.id).await.unwrap();
        assert!(!doomed_chunks.is_empty());

        std::fs::remove_file(&doomed).unwrap();
        let second = run_job(&fx).await;
        assert_eq!(second.state, JobState::Completed);

        assert!(fx.store.document_by_path(&doomed).await.unwrap().is_none());
        for chunk in &doomed_chunks {
            assert!(!fx.vectors.read().await.contains(&chunk.id));
        }
        assert!(fx.lexical.search("flywheels", 10).await.unwrap().is_empty());
        assert!(!fx.lexical.search("bearings", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn second_job_on_same_scope_is_rejected() {
        let fx = fixture();
        write_file(&fx, "a.txt", "some content for the job");

        // Current-thread runtime: the first worker has not run yet, so its
        // scope is still held when the second start arrives.
        let first = fx.indexer.start(fx.corpus.path(), false).unwrap();
        let second = fx.indexer.start(fx.corpus.path(), false);
        assert!(matches!(second, Err(IndexError::JobAlreadyRunning(_))));

        let job = first.wait().await.unwrap();
        assert_eq!(job.state, JobState::Completed);

        // Scope is freed after completion.
        let third = fx.indexer.start(fx.corpus.path(), false).unwrap();
        third.wait().await.unwrap();
    }

    #[tokio::test]
    async fn cancellation_stops_before_the_next_document() {
        let fx = fixture();
        for i in 0..5 {
            write_file(&fx, &format!("doc{i}.txt"), &format!("content number {i}"));
        }

        let handle = fx.indexer.start(fx.corpus.path(), false).unwrap();
        handle.cancel();
        let job = handle.wait().await.unwrap();

        assert_eq!(job.state, JobState::Cancelled);
        assert!(job.done < job.total);

        // Re-running after a cancel is safe and picks up the remainder.
        let job = run_job(&fx).await;
        assert_eq!(job.state, JobState::Completed);
        let documents = fx.store.documents().await.unwrap();
        assert!(documents
            .iter()
            .all(|doc| doc.status == DocumentStatus::Indexed));
    }

    #[tokio::test]
    async fn unreadable_target_fails_the_job() {
        let fx = fixture();
        let missing = fx.corpus.path().join("no-such-dir");

        let handle = fx.indexer.start(&missing, false).unwrap();
        let job = handle.wait().await.unwrap();

        assert_eq!(job.state, JobState::Failed);
        assert_eq!(job.done, 0);
    }

    #[tokio::test]
    async fn force_reindexes_unchanged_documents() {
        let fx = fixture();
        write_file(&fx, "a.txt", "force target content");

        run_job(&fx).await;
        let handle = fx.indexer.start(fx.corpus.path(), true).unwrap();
        let job = handle.wait().await.unwrap();

        assert_eq!(job.state, JobState::Completed);
        assert_eq!(job.total, 1);
        assert_eq!(job.done, 1);
    }

    #[tokio::test]
    async fn duplicate_content_across_files_is_deduplicated() {
        let fx = fixture();
        write_file(&fx, "a.txt", "identical duplicated body text");
        write_file(&fx, "b.txt", "identical duplicated body text");

        let job = run_job(&fx).await;
        assert_eq!(job.state, JobState::Completed);
        assert_eq!(job.error_count, 0);

        // Only the first occurrence survives the job-wide dedup pass.
        let documents = fx.store.documents().await.unwrap();
        let mut total_chunks = 0;
        for doc in &documents {
            total_chunks += fx.store.chunks_by_document(doc.id).await.unwrap().len();
        }
        assert_eq!(total_chunks, 1);
        assert_eq!(fx.vectors.read().await.len(), 1);
    }

    #[tokio::test]
    async fn progress_is_reported_per_document() {
        let fx = fixture();
        write_file(&fx, "a.txt", "first progress document");
        write_file(&fx, "b.txt", "second progress document");

        let mut handle = fx.indexer.start(fx.corpus.path(), false).unwrap();

        let mut events = Vec::new();
        while let Some(event) = handle.next_progress().await {
            events.push(event);
        }
        let job = handle.wait().await.unwrap();

        assert_eq!(job.state, JobState::Completed);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].done, 1);
        assert_eq!(events[1].done, 2);
        assert!(events.iter().all(|e| e.total == 2));
    }
}
