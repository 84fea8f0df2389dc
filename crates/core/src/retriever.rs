use crate::corpus::Corpus;
use crate::embeddings::Embedder;
use crate::error::{EmbeddingError, IngestError};
use crate::extractor::SourceFormat;
use crate::ingest::{extract_named_document, IngestionPipeline};
use crate::models::{ExtractedDocument, IngestionReport, DEFAULT_NUM_OF_RELEVANT_CHUNKS};
use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Cosine of the angle between `a` and `b`. Zero-length, zero-norm and
/// mismatched vectors score 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a * norm_b)
}

/// Positions of `corpus` chunks ordered by descending similarity to `query`.
/// Equal scores keep corpus insertion order.
pub fn rank_positions(corpus: &Corpus, query: &[f32]) -> Vec<(usize, f32)> {
    let mut scored: Vec<(usize, f32)> = corpus
        .iter()
        .enumerate()
        .map(|(position, chunk)| {
            if chunk.embedding.len() != query.len() {
                debug!(
                    document = %chunk.name,
                    chunk = chunk.chunk,
                    stored = chunk.embedding.len(),
                    query = query.len(),
                    "embedding dimensions differ"
                );
            }
            (position, cosine_similarity(query, &chunk.embedding))
        })
        .collect();

    scored.sort_by(|left, right| match right.1.total_cmp(&left.1) {
        Ordering::Equal => left.0.cmp(&right.0),
        other => other,
    });
    scored
}

/// Owns the corpus and answers "which chunks are relevant to this query".
pub struct Retriever {
    corpus: Corpus,
    pipeline: IngestionPipeline,
    num_of_relevant_chunks: usize,
    database_location: Option<PathBuf>,
}

impl Retriever {
    pub fn new(corpus: Corpus, pipeline: IngestionPipeline) -> Self {
        info!(chunk_count = corpus.len(), "creating retriever");
        Self {
            corpus,
            pipeline,
            num_of_relevant_chunks: DEFAULT_NUM_OF_RELEVANT_CHUNKS,
            database_location: None,
        }
    }

    pub fn with_database_location(mut self, path: impl Into<PathBuf>) -> Self {
        self.database_location = Some(path.into());
        self
    }

    pub fn set_num_of_relevant_chunks(&mut self, num: usize) {
        self.num_of_relevant_chunks = num;
    }

    pub fn num_of_relevant_chunks(&self) -> usize {
        self.num_of_relevant_chunks
    }

    pub fn corpus(&self) -> &Corpus {
        &self.corpus
    }

    fn embedder(&self) -> &dyn Embedder {
        self.pipeline.embedder().as_ref()
    }

    /// Texts of the `top_k` chunks most similar to `query`, best first. Never
    /// more than the corpus holds.
    pub async fn rank(&self, query: &str, top_k: usize) -> Result<Vec<String>, EmbeddingError> {
        if self.corpus.is_empty() || top_k == 0 {
            return Ok(Vec::new());
        }

        let query_vector = self.embedder().embed_query(query).await?;
        let ranked = rank_positions(&self.corpus, &query_vector);
        let chunks = self.corpus.chunks();

        let texts = ranked
            .into_iter()
            .take(top_k)
            .map(|(position, score)| {
                let chunk = &chunks[position];
                info!(document = %chunk.name, chunk = chunk.chunk, score, "relevant chunk");
                chunk.text.clone()
            })
            .collect();
        Ok(texts)
    }

    /// The configured number of relevant chunks joined with newlines.
    pub async fn relevant_context(&self, query: &str) -> Result<String, EmbeddingError> {
        Ok(self
            .rank(query, self.num_of_relevant_chunks)
            .await?
            .join("\n"))
    }

    /// Chunks and embeds documents whose text is already extracted, such as
    /// raw rows found in an older database file.
    pub async fn add_extracted(
        &mut self,
        documents: &[ExtractedDocument],
    ) -> Result<usize, IngestError> {
        if documents.is_empty() {
            return Ok(0);
        }
        let additions = self.pipeline.embed_documents(documents).await?;
        let added = additions.len();
        self.corpus.merge(additions)?;
        self.persist()?;
        Ok(added)
    }

    /// Ingests every new file in `folder`, then writes the snapshot.
    pub async fn ingest_folder(&mut self, folder: &Path) -> Result<IngestionReport, IngestError> {
        let report = self.pipeline.ingest_folder(folder, &mut self.corpus).await?;
        self.persist()?;
        Ok(report)
    }

    /// Adds one PDF or text file. A document already stored under the same
    /// name has its chunk set replaced.
    pub async fn add_document(&mut self, path: &Path) -> Result<usize, IngestError> {
        info!(file = %path.display(), "adding document");
        if path.is_dir() {
            return Err(IngestError::InvalidArgument(format!(
                "got folder while adding single document: {}",
                path.display()
            )));
        }
        if SourceFormat::from_path(path).is_none() {
            return Err(IngestError::UnsupportedFormat(path.to_path_buf()));
        }

        let owned = path.to_path_buf();
        let document = tokio::task::spawn_blocking(move || extract_named_document(&owned))
            .await
            .map_err(|join_error| IngestError::WorkerFailed(join_error.to_string()))??;

        let embedded = self.pipeline.embed_document(&document).await?;
        if self.corpus.contains_document(&embedded.name) {
            warn!(document = %embedded.name, "replacing previously stored document");
        }
        let added = self
            .corpus
            .replace_document(&embedded.name, embedded.texts, embedded.embeddings)?;
        self.persist()?;

        info!(document = %document.name, chunk_count = added, "document added");
        Ok(added)
    }

    pub fn persist(&self) -> Result<(), IngestError> {
        if let Some(path) = &self.database_location {
            self.corpus.save(path)?;
        }
        Ok(())
    }
}
