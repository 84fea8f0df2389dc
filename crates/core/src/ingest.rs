use crate::chunking::{ChunkingConfig, TextChunker};
use crate::corpus::Corpus;
use crate::embeddings::Embedder;
use crate::error::IngestError;
use crate::extractor::extract_document_text;
use crate::models::{ExtractedDocument, IngestionOptions, IngestionReport};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::sync::mpsc::{self, UnboundedSender};
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

/// Lists the files directly inside `folder`, sorted by path.
pub fn discover_source_files(folder: &Path) -> Result<Vec<PathBuf>, IngestError> {
    if !folder.is_dir() {
        return Err(IngestError::InvalidArgument(format!(
            "source folder does not exist: {}",
            folder.display()
        )));
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(folder).min_depth(1).max_depth(1) {
        let entry = entry.map_err(|error| {
            IngestError::InvalidArgument(format!("cannot list {}: {error}", folder.display()))
        })?;
        if entry.file_type().is_file() {
            files.push(entry.into_path());
        }
    }

    files.sort_unstable();
    Ok(files)
}

pub fn document_name(path: &Path) -> Result<String, IngestError> {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(str::to_string)
        .ok_or_else(|| {
            IngestError::MissingFileName(format!("path missing filename: {}", path.display()))
        })
}

pub fn extract_named_document(path: &Path) -> Result<ExtractedDocument, IngestError> {
    Ok(ExtractedDocument {
        name: document_name(path)?,
        text: extract_document_text(path)?,
    })
}

enum WorkerMessage {
    Extracted(ExtractedDocument),
    Failed(IngestError),
    Finished { worker: usize },
}

fn run_worker(
    worker: usize,
    queue: &Mutex<VecDeque<PathBuf>>,
    results: &UnboundedSender<WorkerMessage>,
) {
    loop {
        let next = match queue.lock() {
            Ok(mut pending) => pending.pop_front(),
            Err(poisoned) => poisoned.into_inner().pop_front(),
        };
        let Some(path) = next else {
            break;
        };

        let started = Instant::now();
        match extract_named_document(&path) {
            Ok(document) => {
                info!(
                    worker,
                    file = %path.display(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "finished reading file"
                );
                if results.send(WorkerMessage::Extracted(document)).is_err() {
                    break;
                }
            }
            Err(failure) => {
                error!(worker, file = %path.display(), error = %failure, "worker stopped on failure");
                let _ = results.send(WorkerMessage::Failed(failure));
                break;
            }
        }
    }

    let _ = results.send(WorkerMessage::Finished { worker });
}

/// Extracts `files` on `workers` parallel workers, the calling task being one
/// of them. Returns the documents in arrival order, or the first failure once
/// every worker has reported back.
pub async fn extract_documents(
    files: Vec<PathBuf>,
    workers: usize,
) -> Result<Vec<ExtractedDocument>, IngestError> {
    if files.is_empty() {
        return Ok(Vec::new());
    }

    let workers = workers.clamp(1, files.len());
    let queue = Arc::new(Mutex::new(VecDeque::from(files)));
    let (sender, mut receiver) = mpsc::unbounded_channel();

    let mut handles = Vec::with_capacity(workers);
    for worker in 1..workers {
        let queue = Arc::clone(&queue);
        let sender = sender.clone();
        handles.push(tokio::task::spawn_blocking(move || {
            run_worker(worker, &queue, &sender)
        }));
    }

    match Handle::current().runtime_flavor() {
        RuntimeFlavor::CurrentThread => {
            let queue = Arc::clone(&queue);
            let sender = sender.clone();
            handles.push(tokio::task::spawn_blocking(move || {
                run_worker(0, &queue, &sender)
            }));
        }
        _ => tokio::task::block_in_place(|| run_worker(0, &queue, &sender)),
    }
    drop(sender);

    let mut documents = Vec::new();
    let mut first_failure = None;
    let mut finished = 0usize;

    while finished < workers {
        match receiver.recv().await {
            Some(WorkerMessage::Extracted(document)) => documents.push(document),
            Some(WorkerMessage::Failed(failure)) => {
                first_failure.get_or_insert(failure);
            }
            Some(WorkerMessage::Finished { worker }) => {
                finished += 1;
                debug!(worker, finished, workers, "extraction worker finished");
            }
            None => break,
        }
    }

    for handle in handles {
        handle
            .await
            .map_err(|join_error| IngestError::WorkerFailed(join_error.to_string()))?;
    }

    if let Some(failure) = first_failure {
        return Err(failure);
    }
    if finished < workers {
        return Err(IngestError::WorkerFailed(format!(
            "{} of {workers} workers exited without finishing",
            workers - finished
        )));
    }

    Ok(documents)
}

/// A document split into chunks, each paired with its embedding.
#[derive(Debug, Clone)]
pub struct EmbeddedDocument {
    pub name: String,
    pub texts: Vec<String>,
    pub embeddings: Vec<Vec<f32>>,
}

pub struct IngestionPipeline {
    chunker: TextChunker,
    embedder: Arc<dyn Embedder>,
    num_of_workers: usize,
}

impl IngestionPipeline {
    pub fn new(options: &IngestionOptions, embedder: Arc<dyn Embedder>) -> Result<Self, IngestError> {
        let chunker = TextChunker::with_tiktoken(ChunkingConfig::from(options))?;
        Ok(Self::with_chunker(chunker, embedder, options.num_of_workers))
    }

    pub fn with_chunker(
        chunker: TextChunker,
        embedder: Arc<dyn Embedder>,
        num_of_workers: usize,
    ) -> Self {
        Self {
            chunker,
            embedder,
            num_of_workers: num_of_workers.max(1),
        }
    }

    pub fn embedder(&self) -> &Arc<dyn Embedder> {
        &self.embedder
    }

    /// Splits one document and embeds its chunks one call at a time.
    pub async fn embed_document(
        &self,
        document: &ExtractedDocument,
    ) -> Result<EmbeddedDocument, IngestError> {
        let texts = self.chunker.split_text(&document.text);
        let mut embeddings = Vec::with_capacity(texts.len());

        for (index, text) in texts.iter().enumerate() {
            let vector = self.embedder.embed_query(text).await.map_err(|failure| {
                error!(document = %document.name, chunk = index, error = %failure, "embedding failed");
                failure
            })?;
            embeddings.push(vector);
        }

        debug!(document = %document.name, chunk_count = texts.len(), "embedded document");
        Ok(EmbeddedDocument {
            name: document.name.clone(),
            texts,
            embeddings,
        })
    }

    /// Chunks and embeds every document into a fresh corpus. Documents with
    /// no text produce no chunks and are left out.
    pub async fn embed_documents(
        &self,
        documents: &[ExtractedDocument],
    ) -> Result<Corpus, IngestError> {
        info!(document_count = documents.len(), "creating embeddings");
        let mut corpus = Corpus::new();
        for document in documents {
            let embedded = self.embed_document(document).await?;
            if embedded.texts.is_empty() {
                warn!(document = %embedded.name, "document has no text, skipping");
                continue;
            }
            corpus.push_document(&embedded.name, embedded.texts, embedded.embeddings)?;
        }
        Ok(corpus)
    }

    /// Extracts, chunks and embeds every file in `folder` whose name is not yet
    /// in `corpus`, then appends the new chunks. On any failure `corpus` is
    /// left untouched.
    pub async fn ingest_folder(
        &self,
        folder: &Path,
        corpus: &mut Corpus,
    ) -> Result<IngestionReport, IngestError> {
        let known = corpus.document_names();
        let mut files = Vec::new();
        let mut skipped_known = 0usize;

        for path in discover_source_files(folder)? {
            if known.contains(&document_name(&path)?) {
                skipped_known += 1;
                continue;
            }
            info!(file = %path.display(), "reading file");
            files.push(path);
        }

        let mut documents = extract_documents(files, self.num_of_workers).await?;
        documents.sort_by(|left, right| left.name.cmp(&right.name));

        let additions = self.embed_documents(&documents).await?;
        let report = IngestionReport {
            documents: documents
                .into_iter()
                .map(|document| document.name)
                .filter(|name| additions.contains_document(name))
                .collect(),
            chunk_count: additions.len(),
            skipped_known,
        };
        corpus.merge(additions)?;

        info!(
            folder = %folder.display(),
            documents = report.documents.len(),
            chunk_count = report.chunk_count,
            skipped_known = report.skipped_known,
            "ingestion finished"
        );
        Ok(report)
    }
}
