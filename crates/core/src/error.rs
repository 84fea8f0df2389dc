use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unsupported document format: {}", .0.display())]
    UnsupportedFormat(PathBuf),

    #[error("failed to extract text from {}: {details}", path.display())]
    ExtractionFailure { path: PathBuf, details: String },

    #[error("regex error: {0}")]
    RegexError(#[from] regex::Error),

    #[error("path has no file name: {0}")]
    MissingFileName(String),

    #[error("invalid chunking config: {0}")]
    InvalidChunkConfig(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("extraction worker failed: {0}")]
    WorkerFailed(String),

    #[error(transparent)]
    Embedding(#[from] EmbeddingError),

    #[error(transparent)]
    Corpus(#[from] CorpusError),
}

#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("embedding service http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("embedding service url error: {0}")]
    Url(#[from] url::ParseError),

    #[error("invalid response from {backend}: {details}")]
    BackendResponse { backend: String, details: String },

    #[error("malformed embedding response: {0}")]
    MalformedResponse(String),
}

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("chat service http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("chat service url error: {0}")]
    Url(#[from] url::ParseError),

    #[error("invalid response from {backend}: {details}")]
    BackendResponse { backend: String, details: String },

    #[error("malformed chat response: {0}")]
    MalformedResponse(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("searcher config not found: {0}")]
    UnknownSearcher(String),

    #[error("searcher {searcher} is missing required option `{option}`")]
    MissingOption { searcher: String, option: String },

    #[error("unexpected chat model type: {0}")]
    UnknownModelType(String),

    #[error("failed to create embedder, name not found: {0}")]
    UnknownEmbedder(String),

    #[error("invalid option: {0}")]
    InvalidOption(String),
}

#[derive(Debug, Error)]
pub enum CorpusError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("embedding column error: {0}")]
    Embedding(#[from] serde_json::Error),

    #[error("duplicate chunk {chunk} for document {name}")]
    DuplicateChunk { name: String, chunk: u64 },

    #[error("document {name} has {chunks} chunks but its highest chunk number is {highest}")]
    ChunkGap {
        name: String,
        chunks: usize,
        highest: u64,
    },

    #[error("chunk and embedding counts differ for {name}: {chunks} chunks, {embeddings} embeddings")]
    CountMismatch {
        name: String,
        chunks: usize,
        embeddings: usize,
    },
}

/// Failure of a searcher-level operation: startup, ingestion, or a single question.
#[derive(Debug, Error)]
pub enum SearchError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Ingest(#[from] IngestError),

    #[error(transparent)]
    Embedding(#[from] EmbeddingError),

    #[error(transparent)]
    Chat(#[from] ChatError),

    #[error(transparent)]
    Corpus(#[from] CorpusError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),
}
