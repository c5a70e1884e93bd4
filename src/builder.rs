//! Background index-build job.
//!
//! Drives extraction → chunking → batched embedding → incremental index merge
//! for one document at a time, publishing progress through a process-wide
//! [`BuildState`] snapshot and honoring cooperative cancellation at batch
//! boundaries.
//!
//! State machine: `idle → processing → {ready, error, cancelled}`, and any
//! terminal state back to `processing` when the next build starts. At most
//! one build is in flight: a `submit` while processing is rejected
//! immediately rather than queued. Errors inside a build never escape to a
//! status poller — they terminate the build with status `error`.
//!
//! A fully completed batch is merged into the in-memory index only; durable
//! persistence happens once, after the final batch. A cancelled or failed
//! build therefore leaves the previously persisted index untouched.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use serde::Serialize;
use tracing::{info, warn};

use crate::chunk;
use crate::config::Config;
use crate::embedding::Embedder;
use crate::error::{Error, Result};
use crate::extract;
use crate::index::VectorIndex;

/// Lifecycle phase of the build job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildStatus {
    Idle,
    Processing,
    Ready,
    Error,
    Cancelled,
}

/// Snapshot of the build job, taken atomically as one struct.
#[derive(Debug, Clone, Serialize)]
pub struct BuildState {
    pub status: BuildStatus,
    pub progress: u8,
    pub elapsed_seconds: f64,
}

impl BuildState {
    fn idle() -> Self {
        Self {
            status: BuildStatus::Idle,
            progress: 0,
            elapsed_seconds: 0.0,
        }
    }
}

/// Owns the build job state. One instance per process, injected into both the
/// submitter (HTTP/CLI) and status pollers.
pub struct IndexBuilder {
    config: Arc<Config>,
    embedder: Arc<dyn Embedder>,
    state: Mutex<BuildState>,
    cancel: AtomicBool,
    busy: AtomicBool,
}

impl IndexBuilder {
    pub fn new(config: Arc<Config>, embedder: Arc<dyn Embedder>) -> Self {
        Self {
            config,
            embedder,
            state: Mutex::new(BuildState::idle()),
            cancel: AtomicBool::new(false),
            busy: AtomicBool::new(false),
        }
    }

    /// Read-only snapshot; safe to call concurrently with an in-flight build.
    pub fn status(&self) -> BuildState {
        self.lock_state().clone()
    }

    /// Request cooperative cancellation. Observed at the next batch boundary
    /// of an in-flight build; idempotent; a no-op when nothing is processing.
    pub fn request_cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    /// Submit a build to run in the background. Returns immediately; progress
    /// and the terminal outcome are observed via [`IndexBuilder::status`].
    ///
    /// Rejects with [`Error::BuildInProgress`] while another build is
    /// processing.
    pub fn submit(self: &Arc<Self>, document: PathBuf) -> Result<()> {
        self.claim()?;
        let builder = Arc::clone(self);
        tokio::spawn(async move {
            builder.execute(&document).await;
            builder.release();
        });
        Ok(())
    }

    /// Run a build on the current task, returning the terminal state.
    /// Used by the CLI, where there is no poller.
    pub async fn run_blocking(&self, document: &Path) -> Result<BuildState> {
        self.claim()?;
        self.execute(document).await;
        self.release();
        Ok(self.status())
    }

    /// Claim the single build slot and reset the job state.
    fn claim(&self) -> Result<()> {
        if self
            .busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(Error::BuildInProgress);
        }
        self.cancel.store(false, Ordering::SeqCst);
        self.set_state(|s| {
            s.status = BuildStatus::Processing;
            s.progress = 0;
            s.elapsed_seconds = 0.0;
        });
        Ok(())
    }

    fn release(&self) {
        self.busy.store(false, Ordering::SeqCst);
    }

    /// Run one build; all failures terminate with status `error`.
    async fn execute(&self, document: &Path) {
        let started = Instant::now();
        match self.run_build(document, started).await {
            Ok(()) => {}
            Err(e) => {
                warn!(document = %document.display(), error = %e, "index build failed");
                self.set_state(|s| s.status = BuildStatus::Error);
            }
        }
    }

    async fn run_build(&self, document: &Path, started: Instant) -> Result<()> {
        let text = extract::read_document(document)?;
        if text.is_empty() {
            return Err(Error::UnreadableDocument(
                "extraction produced no text".to_string(),
            ));
        }

        let chunking = &self.config.chunking;
        let chunks = chunk::split(&text, chunking.chunk_size, chunking.overlap)?;
        let texts: Vec<String> = chunks.into_iter().map(|c| c.text).collect();
        let total = texts.len();

        let index_path = &self.config.storage.index_path;
        let mut index = VectorIndex::load(index_path)?
            .unwrap_or_else(|| VectorIndex::new(self.embedder.dims()));

        info!(
            document = %document.display(),
            chunks = total,
            existing_vectors = index.len(),
            "starting index build"
        );

        let mut processed = 0usize;
        for batch in texts.chunks(self.config.embedding.batch_size) {
            // Cancellation is checked at batch boundaries only; the current
            // batch always completes before the flag is observed.
            if self.cancel.load(Ordering::SeqCst) {
                info!(processed, total, "index build cancelled");
                self.set_state(|s| {
                    s.status = BuildStatus::Cancelled;
                    s.progress = 0;
                });
                return Ok(());
            }

            let vectors = self.embedder.embed(batch).await?;
            index.merge(vectors, batch);

            processed += batch.len();
            let progress = (processed * 100 / total) as u8;
            self.set_state(|s| s.progress = progress);
        }

        index.save(index_path)?;

        let elapsed = (started.elapsed().as_secs_f64() * 100.0).round() / 100.0;
        self.set_state(|s| {
            s.status = BuildStatus::Ready;
            s.progress = 100;
            s.elapsed_seconds = elapsed;
        });
        info!(total, elapsed_seconds = elapsed, "index build complete");
        Ok(())
    }

    fn set_state(&self, f: impl FnOnce(&mut BuildState)) {
        f(&mut self.lock_state());
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, BuildState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        ChunkingConfig, EmbeddingConfig, GenerationConfig, RetrievalConfig, ServerConfig,
        StorageConfig,
    };
    use crate::embedding::HashEmbedder;
    use async_trait::async_trait;
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tokio::sync::Mutex as AsyncMutex;

    fn test_config(dir: &Path, chunk_size: usize, overlap: usize, batch_size: usize) -> Config {
        Config {
            storage: StorageConfig {
                db_path: dir.join("docuchat.sqlite"),
                index_path: dir.join("index.json"),
            },
            chunking: ChunkingConfig {
                chunk_size,
                overlap,
            },
            retrieval: RetrievalConfig::default(),
            embedding: EmbeddingConfig {
                batch_size,
                dims: 64,
                ..EmbeddingConfig::default()
            },
            generation: GenerationConfig::default(),
            server: ServerConfig {
                bind: "127.0.0.1:0".to_string(),
            },
        }
    }

    /// Embedder that signals when a batch arrives and waits for the test to
    /// release it, making batch boundaries observable.
    struct GateEmbedder {
        dims: usize,
        entered: mpsc::Sender<()>,
        gate: AsyncMutex<mpsc::Receiver<()>>,
    }

    #[async_trait]
    impl Embedder for GateEmbedder {
        async fn embed(&self, texts: &[String]) -> crate::error::Result<Vec<Vec<f32>>> {
            self.entered.send(()).await.ok();
            self.gate.lock().await.recv().await;
            Ok(texts.iter().map(|_| vec![1.0; self.dims]).collect())
        }

        fn dims(&self) -> usize {
            self.dims
        }
    }

    async fn wait_for(builder: &IndexBuilder, status: BuildStatus) -> BuildState {
        for _ in 0..200 {
            let state = builder.status();
            if state.status == status {
                return state;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("timed out waiting for {:?}, last: {:?}", status, builder.status());
    }

    #[tokio::test]
    async fn successful_build_reaches_ready_with_full_progress() {
        let tmp = tempfile::tempdir().unwrap();
        let config = Arc::new(test_config(tmp.path(), 10, 2, 8));
        let doc = tmp.path().join("notes.txt");
        std::fs::write(&doc, "The sky is blue. Grass is green.").unwrap();

        let builder = IndexBuilder::new(config.clone(), Arc::new(HashEmbedder::new(64)));
        let state = builder.run_blocking(&doc).await.unwrap();

        assert_eq!(state.status, BuildStatus::Ready);
        assert_eq!(state.progress, 100);
        assert!(state.elapsed_seconds >= 0.0);

        let index = VectorIndex::load(&config.storage.index_path)
            .unwrap()
            .unwrap();
        assert!(index.len() > 0);
    }

    #[tokio::test]
    async fn rebuild_merges_into_existing_index() {
        let tmp = tempfile::tempdir().unwrap();
        let config = Arc::new(test_config(tmp.path(), 100, 0, 8));
        let doc = tmp.path().join("notes.txt");
        std::fs::write(&doc, "The sky is blue.").unwrap();

        let builder = IndexBuilder::new(config.clone(), Arc::new(HashEmbedder::new(64)));
        builder.run_blocking(&doc).await.unwrap();
        let first = VectorIndex::load(&config.storage.index_path)
            .unwrap()
            .unwrap()
            .len();

        builder.run_blocking(&doc).await.unwrap();
        let second = VectorIndex::load(&config.storage.index_path)
            .unwrap()
            .unwrap()
            .len();
        assert_eq!(second, first * 2);
    }

    #[tokio::test]
    async fn missing_document_terminates_with_error() {
        let tmp = tempfile::tempdir().unwrap();
        let config = Arc::new(test_config(tmp.path(), 10, 2, 8));

        let builder = IndexBuilder::new(config.clone(), Arc::new(HashEmbedder::new(64)));
        let state = builder
            .run_blocking(&tmp.path().join("missing.txt"))
            .await
            .unwrap();

        assert_eq!(state.status, BuildStatus::Error);
        assert!(!config.storage.index_path.exists());
    }

    #[tokio::test]
    async fn whitespace_document_terminates_with_error() {
        let tmp = tempfile::tempdir().unwrap();
        let config = Arc::new(test_config(tmp.path(), 10, 2, 8));
        let doc = tmp.path().join("blank.txt");
        std::fs::write(&doc, "   \n\t  ").unwrap();

        let builder = IndexBuilder::new(config.clone(), Arc::new(HashEmbedder::new(64)));
        let state = builder.run_blocking(&doc).await.unwrap();

        assert_eq!(state.status, BuildStatus::Error);
        assert!(!config.storage.index_path.exists());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn second_submit_while_processing_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let config = Arc::new(test_config(tmp.path(), 4, 0, 1));
        let doc = tmp.path().join("notes.txt");
        std::fs::write(&doc, "aaaa bbbb cccc dddd").unwrap();

        let (entered_tx, mut entered_rx) = mpsc::channel(16);
        let (gate_tx, gate_rx) = mpsc::channel(16);
        let embedder = Arc::new(GateEmbedder {
            dims: 8,
            entered: entered_tx,
            gate: AsyncMutex::new(gate_rx),
        });

        let builder = Arc::new(IndexBuilder::new(config.clone(), embedder));
        builder.submit(doc.clone()).unwrap();
        entered_rx.recv().await.unwrap();

        let err = builder.submit(doc.clone()).unwrap_err();
        assert!(matches!(err, Error::BuildInProgress));

        // Release every batch and let the first build finish.
        for _ in 0..16 {
            gate_tx.send(()).await.ok();
        }
        wait_for(&builder, BuildStatus::Ready).await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn cancel_leaves_no_durable_trace() {
        let tmp = tempfile::tempdir().unwrap();
        // 3 batches of one chunk each.
        let config = Arc::new(test_config(tmp.path(), 8, 0, 1));
        let doc = tmp.path().join("notes.txt");
        std::fs::write(&doc, "aaaaaaaabbbbbbbbcccccccc").unwrap();

        let (entered_tx, mut entered_rx) = mpsc::channel(16);
        let (gate_tx, gate_rx) = mpsc::channel(16);
        let embedder = Arc::new(GateEmbedder {
            dims: 8,
            entered: entered_tx,
            gate: AsyncMutex::new(gate_rx),
        });

        let builder = Arc::new(IndexBuilder::new(config.clone(), embedder));
        builder.submit(doc.clone()).unwrap();

        // First batch is in flight; cancel, then let the batch complete.
        entered_rx.recv().await.unwrap();
        builder.request_cancel();
        gate_tx.send(()).await.unwrap();

        let state = wait_for(&builder, BuildStatus::Cancelled).await;
        assert_eq!(state.progress, 0);
        // The merged-but-unpersisted batch left no file behind.
        assert!(!config.storage.index_path.exists());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn progress_advances_per_batch_and_ends_at_100() {
        let tmp = tempfile::tempdir().unwrap();
        // 2 batches: 16 chars, chunk 8 no overlap, batch of 1.
        let config = Arc::new(test_config(tmp.path(), 8, 0, 1));
        let doc = tmp.path().join("notes.txt");
        std::fs::write(&doc, "aaaaaaaabbbbbbbb").unwrap();

        let (entered_tx, mut entered_rx) = mpsc::channel(16);
        let (gate_tx, gate_rx) = mpsc::channel(16);
        let embedder = Arc::new(GateEmbedder {
            dims: 8,
            entered: entered_tx,
            gate: AsyncMutex::new(gate_rx),
        });

        let builder = Arc::new(IndexBuilder::new(config.clone(), embedder));
        builder.submit(doc.clone()).unwrap();

        entered_rx.recv().await.unwrap();
        assert_eq!(builder.status().progress, 0);
        gate_tx.send(()).await.unwrap();

        // Second batch entered means the first one's progress is published.
        entered_rx.recv().await.unwrap();
        assert_eq!(builder.status().progress, 50);
        gate_tx.send(()).await.unwrap();

        let state = wait_for(&builder, BuildStatus::Ready).await;
        assert_eq!(state.progress, 100);
    }
}
