use crate::chat::{create_chat_model, ChatModel};
use crate::config::SearcherProfile;
use crate::corpus::{Corpus, LoadedCorpus};
use crate::embeddings::EmbedderRegistry;
use crate::error::{ConfigError, SearchError};
use crate::ingest::IngestionPipeline;
use crate::models::IngestionReport;
use crate::retriever::Retriever;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::Path;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// A question answered by the batch runner, emitted as one JSON line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnsweredQuestion {
    pub question: String,
    pub answer: String,
    pub time_elapsed_s: f64,
}

#[derive(Debug, Deserialize)]
struct QuestionFile {
    questions: Vec<String>,
}

/// Ties a retriever to a chat backend: retrieve context, then ask.
pub struct Searcher {
    chat: Box<dyn ChatModel>,
    retriever: Retriever,
}

impl Searcher {
    pub fn new(chat: Box<dyn ChatModel>, retriever: Retriever) -> Self {
        Self { chat, retriever }
    }

    /// Builds everything a profile describes: chat backend, embedder, the
    /// stored corpus, and any new documents under `pdfs_location`.
    pub async fn from_profile(profile: &SearcherProfile) -> Result<Self, SearchError> {
        Self::from_profile_with(profile, &EmbedderRegistry::default()).await
    }

    pub async fn from_profile_with(
        profile: &SearcherProfile,
        registry: &EmbedderRegistry,
    ) -> Result<Self, SearchError> {
        info!(searcher = %profile.name, "creating searcher");
        let chat = create_chat_model(profile)?;
        let embedder = registry.create(profile)?;
        let options = profile.ingestion_options()?;
        let pipeline = IngestionPipeline::new(&options, embedder)?;

        let LoadedCorpus { corpus, pending } = match &profile.database_location {
            Some(path) => Corpus::load(path)?,
            None => LoadedCorpus::default(),
        };

        let mut retriever = Retriever::new(corpus, pipeline);
        if let Some(path) = &profile.database_location {
            retriever = retriever.with_database_location(path);
        }
        retriever.set_num_of_relevant_chunks(profile.num_of_relevant_chunks());

        if !pending.is_empty() {
            info!(documents = pending.len(), "embedding documents stored without chunks");
            retriever.add_extracted(&pending).await?;
        }

        match &profile.pdfs_location {
            Some(folder) => {
                retriever.ingest_folder(folder).await?;
            }
            None if profile.database_location.is_none() => {
                warn!("database or pdfs locations not given, chat model will answer only from its own knowledge");
            }
            None => {}
        }

        Ok(Self::new(chat, retriever))
    }

    pub fn retriever(&self) -> &Retriever {
        &self.retriever
    }

    pub async fn add_document(&mut self, path: &Path) -> Result<usize, SearchError> {
        Ok(self.retriever.add_document(path).await?)
    }

    pub async fn ingest_folder(&mut self, folder: &Path) -> Result<IngestionReport, SearchError> {
        Ok(self.retriever.ingest_folder(folder).await?)
    }

    pub async fn ask_question(&self, question: &str) -> Result<String, SearchError> {
        info!(question, "asking question");
        let context = self.retriever.relevant_context(question).await?;
        debug!(%context, "got context");

        let answer = self.chat.ask_question(question, &context).await.map_err(|failure| {
            error!(backend = self.chat.name(), error = %failure, "asking question failed");
            failure
        })?;
        info!(answer_len = answer.len(), "got result");
        Ok(answer)
    }

    /// Answers each question in a `{"questions": [...]}` file, writing one JSON
    /// line per answer. Stops at the first failure.
    pub async fn answer_questions_from_file<W: Write>(
        &self,
        path: &Path,
        out: &mut W,
    ) -> Result<Vec<AnsweredQuestion>, SearchError> {
        let raw = std::fs::read_to_string(path).map_err(|source| {
            error!(path = %path.display(), error = %source, "failed while loading questions");
            ConfigError::Io {
                path: path.to_path_buf(),
                source,
            }
        })?;
        let file: QuestionFile = serde_json::from_str(&raw).map_err(ConfigError::Parse)?;

        let mut answered = Vec::with_capacity(file.questions.len());
        for question in file.questions {
            let started = Instant::now();
            let answer = self.ask_question(&question).await?;
            let record = AnsweredQuestion {
                question,
                answer,
                time_elapsed_s: started.elapsed().as_secs_f64(),
            };

            let line = serde_json::to_string(&record)?;
            info!(%line, "got answer to file");
            writeln!(out, "{line}")?;
            answered.push(record);
        }
        out.flush()?;

        Ok(answered)
    }
}
