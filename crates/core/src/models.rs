use serde::{Deserialize, Serialize};

pub const DEFAULT_MAX_TOKENS: usize = 256;
pub const DEFAULT_CHUNK_OVERLAP: usize = 5;
pub const DEFAULT_NUM_OF_RELEVANT_CHUNKS: usize = 2;

/// Normalized text of one source file, keyed by its file name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedDocument {
    pub name: String,
    pub text: String,
}

/// A bounded slice of a document's text together with its embedding.
///
/// `(name, chunk)` is unique within a corpus and `chunk` is a dense 0-based
/// ordinal per document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub name: String,
    pub chunk: u64,
    pub text: String,
    pub embedding: Vec<f32>,
}

#[derive(Debug, Clone)]
pub struct IngestionOptions {
    pub max_tokens: usize,
    pub overlap_tokens: usize,
    pub num_of_workers: usize,
}

impl Default for IngestionOptions {
    fn default() -> Self {
        Self {
            max_tokens: DEFAULT_MAX_TOKENS,
            overlap_tokens: DEFAULT_CHUNK_OVERLAP,
            num_of_workers: default_worker_count(),
        }
    }
}

pub fn default_worker_count() -> usize {
    std::thread::available_parallelism()
        .map(|count| count.get())
        .unwrap_or(1)
}

#[derive(Debug, Clone, Default)]
pub struct IngestionReport {
    pub documents: Vec<String>,
    pub chunk_count: usize,
    pub skipped_known: usize,
}
