pub mod chat;
pub mod chunking;
pub mod config;
pub mod corpus;
pub mod embeddings;
pub mod error;
pub mod extractor;
pub mod ingest;
pub mod models;
pub mod orchestrator;
pub mod retriever;

pub use chat::{create_chat_model, ChatMessage, ChatModel, GigaChat, OllamaChat, PromptTemplate, Role};
pub use chunking::{ChunkingConfig, TextChunker, TiktokenCounter, TokenCounter, WhitespaceCounter};
pub use config::{LoggingConfig, SearcherConfig, SearcherProfile, DEFAULT_CONFIG_PATH};
pub use corpus::{Corpus, LoadedCorpus};
pub use embeddings::{
    CharacterNgramEmbedder, Embedder, EmbedderRegistry, OllamaEmbedder,
    DEFAULT_EMBEDDING_DIMENSIONS,
};
pub use error::{ChatError, ConfigError, CorpusError, EmbeddingError, IngestError, SearchError};
pub use extractor::{extract_document_text, normalize_text, SourceFormat};
pub use ingest::{discover_source_files, extract_documents, IngestionPipeline};
pub use models::{Chunk, ExtractedDocument, IngestionOptions, IngestionReport};
pub use orchestrator::{AnsweredQuestion, Searcher};
pub use retriever::{cosine_similarity, Retriever};
