use crate::config::SearcherProfile;
use crate::embeddings::service_url;
use crate::error::{ChatError, ConfigError};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};
use url::Url;

pub const DEFAULT_MODEL_TYPE: &str = "ollama";
pub const GIGACHAT_DEFAULT_HOST: &str = "https://gigachat.devices.sberbank.ru/api/v1";
pub const GIGACHAT_DEFAULT_MODEL: &str = "GigaChat-Plus";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

/// Optional system instruction with `{context}` and `{text}` placeholders.
#[derive(Debug, Clone, Default)]
pub struct PromptTemplate {
    system: Option<String>,
}

impl PromptTemplate {
    pub fn new(system: Option<String>) -> Self {
        Self {
            system: system.filter(|template| !template.trim().is_empty()),
        }
    }

    pub fn messages(&self, question: &str, context: &str) -> Vec<ChatMessage> {
        match &self.system {
            Some(template) => vec![
                ChatMessage {
                    role: Role::System,
                    content: template
                        .replace("{context}", context)
                        .replace("{text}", question),
                },
                ChatMessage {
                    role: Role::User,
                    content: question.to_string(),
                },
            ],
            None => {
                let content = if context.is_empty() {
                    question.to_string()
                } else {
                    format!("{context}\n\n{question}")
                };
                vec![ChatMessage {
                    role: Role::User,
                    content,
                }]
            }
        }
    }
}

#[async_trait]
pub trait ChatModel: Send + Sync {
    fn name(&self) -> &str;

    async fn ask_question(&self, question: &str, context: &str) -> Result<String, ChatError>;
}

#[derive(Debug, Serialize)]
struct OllamaChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct OllamaChatResponse {
    message: Option<ChatMessage>,
}

/// Local model served by an Ollama host.
pub struct OllamaChat {
    endpoint: Url,
    model: String,
    prompt: PromptTemplate,
    client: Client,
}

impl OllamaChat {
    pub fn new(host: &str, model: impl Into<String>, prompt: PromptTemplate) -> Result<Self, ChatError> {
        info!(host, "creating ollama client");
        Ok(Self {
            endpoint: service_url(host, "api/chat")?,
            model: model.into(),
            prompt,
            client: Client::new(),
        })
    }
}

fn ollama_answer(payload: OllamaChatResponse) -> Result<String, ChatError> {
    payload
        .message
        .map(|message| message.content)
        .ok_or_else(|| ChatError::MalformedResponse("response has no message".to_string()))
}

#[async_trait]
impl ChatModel for OllamaChat {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn ask_question(&self, question: &str, context: &str) -> Result<String, ChatError> {
        let messages = self.prompt.messages(question, context);
        debug!(model = %self.model, ?messages, "invoking chat model");

        let response = self
            .client
            .post(self.endpoint.clone())
            .json(&OllamaChatRequest {
                model: &self.model,
                messages: &messages,
                stream: false,
            })
            .send()
            .await
            .map_err(|failure| {
                error!(endpoint = %self.endpoint, error = %failure, "chat request failed");
                ChatError::Http(failure)
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(endpoint = %self.endpoint, %status, "chat service rejected request");
            return Err(ChatError::BackendResponse {
                backend: "ollama".to_string(),
                details: format!("{status}: {body}"),
            });
        }

        let answer = ollama_answer(response.json().await?)?;
        info!(model = %self.model, answer_len = answer.len(), "got response from ollama");
        Ok(answer)
    }
}

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: ChatMessage,
}

fn completion_answer(payload: CompletionResponse) -> Result<String, ChatError> {
    payload
        .choices
        .into_iter()
        .next()
        .map(|choice| choice.message.content)
        .ok_or_else(|| ChatError::MalformedResponse("response has no choices".to_string()))
}

/// Cloud chat-completions API authorized with a bearer token.
pub struct GigaChat {
    endpoint: Url,
    model: String,
    credentials: String,
    prompt: PromptTemplate,
    client: Client,
}

impl GigaChat {
    pub fn new(
        host: &str,
        model: impl Into<String>,
        credentials: impl Into<String>,
        prompt: PromptTemplate,
    ) -> Result<Self, ChatError> {
        info!(host, "creating gigachat client");
        Ok(Self {
            endpoint: service_url(host, "chat/completions")?,
            model: model.into(),
            credentials: credentials.into(),
            prompt,
            client: Client::new(),
        })
    }
}

#[async_trait]
impl ChatModel for GigaChat {
    fn name(&self) -> &str {
        "gigachat"
    }

    async fn ask_question(&self, question: &str, context: &str) -> Result<String, ChatError> {
        let messages = self.prompt.messages(question, context);
        debug!(model = %self.model, ?messages, "invoking chat model");

        let response = self
            .client
            .post(self.endpoint.clone())
            .bearer_auth(&self.credentials)
            .json(&CompletionRequest {
                model: &self.model,
                messages: &messages,
            })
            .send()
            .await
            .map_err(|failure| {
                error!(endpoint = %self.endpoint, error = %failure, "chat request failed");
                ChatError::Http(failure)
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(endpoint = %self.endpoint, %status, "chat service rejected request");
            return Err(ChatError::BackendResponse {
                backend: "gigachat".to_string(),
                details: format!("{status}: {body}"),
            });
        }

        completion_answer(response.json().await?)
    }
}

/// Builds the chat backend named by the profile's `model_type`.
pub fn create_chat_model(profile: &SearcherProfile) -> Result<Box<dyn ChatModel>, ConfigError> {
    let model_type = profile
        .model_type
        .as_deref()
        .unwrap_or(DEFAULT_MODEL_TYPE)
        .to_lowercase();
    let prompt = PromptTemplate::new(profile.prompt_template.clone());
    let invalid_host =
        |error: ChatError| ConfigError::InvalidOption(format!("model_host: {error}"));

    match model_type.as_str() {
        "ollama" => {
            let host = profile.require("model_host", profile.model_host.as_deref())?;
            let model = profile.require("model_name", profile.model_name.as_deref())?;
            Ok(Box::new(OllamaChat::new(host, model, prompt).map_err(invalid_host)?))
        }
        "gigachat" => {
            let credentials = profile.require("credentials", profile.credentials.as_deref())?;
            let host = profile.model_host.as_deref().unwrap_or(GIGACHAT_DEFAULT_HOST);
            let model = profile.model_name.as_deref().unwrap_or(GIGACHAT_DEFAULT_MODEL);
            Ok(Box::new(
                GigaChat::new(host, model, credentials, prompt).map_err(invalid_host)?,
            ))
        }
        other => {
            error!(model_type = other, searcher = %profile.name, "unexpected chat model type");
            Err(ConfigError::UnknownModelType(other.to_string()))
        }
    }
}
