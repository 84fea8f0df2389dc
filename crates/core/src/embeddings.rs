use crate::config::SearcherProfile;
use crate::error::{ConfigError, EmbeddingError};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info};
use url::Url;

pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = 128;
pub const DEFAULT_EMBEDDER: &str = "ollama";

#[async_trait]
pub trait Embedder: Send + Sync {
    fn name(&self) -> &str;

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;
}

/// Joins `path` onto a configured host, keeping any path prefix the host has.
pub(crate) fn service_url(host: &str, path: &str) -> Result<Url, url::ParseError> {
    let host = host.trim();
    let base = if host.ends_with('/') {
        Url::parse(host)?
    } else {
        Url::parse(&format!("{host}/"))?
    };
    base.join(path.trim_start_matches('/'))
}

#[derive(Debug, Serialize)]
struct OllamaEmbedRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Debug, Deserialize)]
struct OllamaEmbedResponse {
    #[serde(default)]
    embeddings: Vec<Vec<f32>>,
}

fn first_embedding(payload: OllamaEmbedResponse) -> Result<Vec<f32>, EmbeddingError> {
    payload
        .embeddings
        .into_iter()
        .next()
        .filter(|vector| !vector.is_empty())
        .ok_or_else(|| {
            EmbeddingError::MalformedResponse("response contained no embedding vector".to_string())
        })
}

/// Embeds text with a model served by an Ollama host.
pub struct OllamaEmbedder {
    endpoint: Url,
    model: String,
    client: Client,
}

impl OllamaEmbedder {
    pub fn new(hostname: &str, model: impl Into<String>) -> Result<Self, EmbeddingError> {
        Ok(Self {
            endpoint: service_url(hostname, "api/embed")?,
            model: model.into(),
            client: Client::new(),
        })
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .json(&OllamaEmbedRequest {
                model: &self.model,
                input: text,
            })
            .send()
            .await
            .map_err(|error| {
                error!(endpoint = %self.endpoint, %error, "embedding request failed");
                EmbeddingError::Http(error)
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(endpoint = %self.endpoint, model = %self.model, %status, "embedding service rejected request");
            return Err(EmbeddingError::BackendResponse {
                backend: "ollama".to_string(),
                details: format!("{status}: {body}"),
            });
        }

        let payload: OllamaEmbedResponse = response.json().await?;
        let vector = first_embedding(payload)?;
        debug!(model = %self.model, dimensions = vector.len(), "got embedding from ollama");
        Ok(vector)
    }
}

/// Local hashing embedder over character trigrams. Needs no service, so it is
/// handy offline and in tests; its vectors are not semantically meaningful.
#[derive(Debug, Clone, Copy)]
pub struct CharacterNgramEmbedder {
    pub dimensions: usize,
}

impl Default for CharacterNgramEmbedder {
    fn default() -> Self {
        Self {
            dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
        }
    }
}

impl CharacterNgramEmbedder {
    pub fn embed(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0f32; self.dimensions.max(1)];
        let lowered = text.to_lowercase();
        let chars: Vec<char> = lowered.chars().collect();

        for window in chars.windows(3) {
            let mut hash = 1469598103934665603u64;
            for ch in window {
                let mut buffer = [0u8; 4];
                for byte in ch.encode_utf8(&mut buffer).bytes() {
                    hash ^= byte as u64;
                    hash = hash.wrapping_mul(1099511628211);
                }
            }
            let bucket = (hash % vector.len() as u64) as usize;
            vector[bucket] += 1.0;
        }

        let magnitude = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for value in &mut vector {
                *value /= magnitude;
            }
        }

        vector
    }
}

#[async_trait]
impl Embedder for CharacterNgramEmbedder {
    fn name(&self) -> &str {
        "ngram"
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        Ok(self.embed(text))
    }
}

pub type EmbedderFactory = fn(&SearcherProfile) -> Result<Arc<dyn Embedder>, ConfigError>;

/// Embedder constructors keyed by the `embedder_name` a profile selects.
pub struct EmbedderRegistry {
    factories: HashMap<String, EmbedderFactory>,
}

impl Default for EmbedderRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register("ollama", build_ollama);
        registry.register("ngram", build_ngram);
        registry
    }
}

impl EmbedderRegistry {
    pub fn empty() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    pub fn register(&mut self, name: impl Into<String>, factory: EmbedderFactory) {
        self.factories.insert(name.into(), factory);
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn create(&self, profile: &SearcherProfile) -> Result<Arc<dyn Embedder>, ConfigError> {
        let name = profile.embedder_name.as_deref().unwrap_or(DEFAULT_EMBEDDER);
        let factory = self.factories.get(name).ok_or_else(|| {
            error!(embedder = name, "failed to create embedder");
            ConfigError::UnknownEmbedder(name.to_string())
        })?;

        let embedder = factory(profile)?;
        info!(embedder = name, searcher = %profile.name, "created embedder");
        Ok(embedder)
    }
}

fn build_ollama(profile: &SearcherProfile) -> Result<Arc<dyn Embedder>, ConfigError> {
    let hostname = profile.require("embedder_hostname", profile.embedder_hostname.as_deref())?;
    let model = profile.require("embedder_model_name", profile.embedder_model_name.as_deref())?;
    let embedder = OllamaEmbedder::new(hostname, model)
        .map_err(|error| ConfigError::InvalidOption(format!("embedder_hostname: {error}")))?;
    Ok(Arc::new(embedder))
}

fn build_ngram(_profile: &SearcherProfile) -> Result<Arc<dyn Embedder>, ConfigError> {
    Ok(Arc::new(CharacterNgramEmbedder::default()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedder_is_deterministic() {
        let embedder = CharacterNgramEmbedder::default();
        let first = embedder.embed("which documents mention mammals");
        let second = embedder.embed("which documents mention mammals");
        assert_eq!(first, second);
    }

    #[test]
    fn embedder_outputs_expected_length() {
        let embedder = CharacterNgramEmbedder { dimensions: 32 };
        let vector = embedder.embed("abc");
        assert_eq!(vector.len(), 32);
    }

    #[test]
    fn service_url_keeps_host_prefix() -> Result<(), url::ParseError> {
        assert_eq!(
            service_url("http://localhost:11434", "api/embed")?.as_str(),
            "http://localhost:11434/api/embed"
        );
        assert_eq!(
            service_url("https://gateway.local/ollama/", "/api/embed")?.as_str(),
            "https://gateway.local/ollama/api/embed"
        );
        Ok(())
    }

    #[test]
    fn embed_response_takes_first_vector() -> Result<(), Box<dyn std::error::Error>> {
        let payload: OllamaEmbedResponse =
            serde_json::from_str(r#"{"model":"nomic","embeddings":[[0.5,-0.25,1.0]]}"#)?;
        assert_eq!(first_embedding(payload)?, vec![0.5, -0.25, 1.0]);
        Ok(())
    }

    #[test]
    fn empty_embed_response_is_malformed() -> Result<(), Box<dyn std::error::Error>> {
        for body in [r#"{"embeddings":[]}"#, r#"{"embeddings":[[]]}"#, r#"{}"#] {
            let payload: OllamaEmbedResponse = serde_json::from_str(body)?;
            assert!(matches!(
                first_embedding(payload),
                Err(EmbeddingError::MalformedResponse(_))
            ));
        }
        Ok(())
    }

    #[tokio::test]
    async fn unreachable_service_is_an_error() -> Result<(), EmbeddingError> {
        let embedder = OllamaEmbedder::new("http://127.0.0.1:1", "nomic-embed-text")?;
        let result = embedder.embed_query("cats are mammals").await;
        assert!(matches!(result, Err(EmbeddingError::Http(_))));
        Ok(())
    }

    #[test]
    fn registry_resolves_known_names() {
        let registry = EmbedderRegistry::default();
        assert_eq!(registry.names(), vec!["ngram", "ollama"]);

        let profile = SearcherProfile {
            embedder_name: Some("ngram".to_string()),
            ..SearcherProfile::named("local")
        };
        let embedder = registry.create(&profile).unwrap();
        assert_eq!(embedder.name(), "ngram");
    }

    #[test]
    fn registry_rejects_unknown_names() {
        let profile = SearcherProfile {
            embedder_name: Some("e5".to_string()),
            ..SearcherProfile::named("local")
        };
        let result = EmbedderRegistry::default().create(&profile);
        assert!(matches!(result, Err(ConfigError::UnknownEmbedder(name)) if name == "e5"));
    }

    #[test]
    fn ollama_embedder_requires_host_and_model() {
        let profile = SearcherProfile::named("remote");
        let result = EmbedderRegistry::default().create(&profile);
        assert!(matches!(
            result,
            Err(ConfigError::MissingOption { option, .. }) if option == "embedder_hostname"
        ));
    }
}
