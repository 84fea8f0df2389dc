//! Searcher profiles loaded from a JSON file.
//!
//! Every top-level key except `logging` names a profile:
//!
//! ```json
//! {
//!   "logging": { "filter": "info,llm_searcher_core=debug" },
//!   "local": {
//!     "model_type": "ollama",
//!     "model_host": "http://localhost:11434",
//!     "model_name": "llama3",
//!     "embedder_hostname": "http://localhost:11434",
//!     "embedder_model_name": "nomic-embed-text",
//!     "database_location": "./data.csv",
//!     "pdfs_location": "./pdfs"
//!   }
//! }
//! ```

use crate::error::ConfigError;
use crate::models::{
    default_worker_count, IngestionOptions, DEFAULT_CHUNK_OVERLAP, DEFAULT_MAX_TOKENS,
    DEFAULT_NUM_OF_RELEVANT_CHUNKS,
};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::error;

pub const DEFAULT_CONFIG_PATH: &str = "./datasheets.json";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoggingConfig {
    pub filter: Option<String>,
    #[serde(default)]
    pub ansi: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearcherProfile {
    #[serde(skip)]
    pub name: String,
    pub model_type: Option<String>,
    pub model_host: Option<String>,
    pub model_name: Option<String>,
    pub credentials: Option<String>,
    pub prompt_template: Option<String>,
    pub database_location: Option<PathBuf>,
    pub pdfs_location: Option<PathBuf>,
    pub embedder_name: Option<String>,
    pub embedder_hostname: Option<String>,
    pub embedder_model_name: Option<String>,
    pub max_num_of_tokens: Option<usize>,
    pub num_of_relevant_chunks: Option<usize>,
    pub num_of_workers: Option<usize>,
    pub questions: Option<PathBuf>,
}

impl SearcherProfile {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Returns a required option or a `MissingOption` error naming it.
    pub fn require<'a>(
        &self,
        option: &str,
        value: Option<&'a str>,
    ) -> Result<&'a str, ConfigError> {
        match value.map(str::trim) {
            Some(found) if !found.is_empty() => Ok(found),
            _ => {
                error!(searcher = %self.name, option, "missing required searcher option");
                Err(ConfigError::MissingOption {
                    searcher: self.name.clone(),
                    option: option.to_string(),
                })
            }
        }
    }

    pub fn num_of_relevant_chunks(&self) -> usize {
        self.num_of_relevant_chunks
            .unwrap_or(DEFAULT_NUM_OF_RELEVANT_CHUNKS)
    }

    pub fn ingestion_options(&self) -> Result<IngestionOptions, ConfigError> {
        let max_tokens = self.max_num_of_tokens.unwrap_or(DEFAULT_MAX_TOKENS);
        if max_tokens == 0 {
            return Err(ConfigError::InvalidOption(format!(
                "max_num_of_tokens must be positive for searcher {}",
                self.name
            )));
        }

        let num_of_workers = match self.num_of_workers {
            Some(0) => {
                return Err(ConfigError::InvalidOption(format!(
                    "num_of_workers must be positive for searcher {}",
                    self.name
                )))
            }
            Some(workers) => workers,
            None => default_worker_count(),
        };

        // Overlap must stay below the chunk size, so tiny chunks carry less of it.
        Ok(IngestionOptions {
            max_tokens,
            overlap_tokens: DEFAULT_CHUNK_OVERLAP.min(max_tokens - 1),
            num_of_workers,
        })
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearcherConfig {
    #[serde(default)]
    pub logging: Option<LoggingConfig>,
    #[serde(flatten)]
    pub profiles: HashMap<String, SearcherProfile>,
}

impl SearcherConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let mut config: Self = serde_json::from_str(raw)?;
        for (name, profile) in &mut config.profiles {
            profile.name = name.clone();
        }
        Ok(config)
    }

    pub fn profile(&self, name: &str) -> Result<&SearcherProfile, ConfigError> {
        self.profiles.get(name).ok_or_else(|| {
            error!(searcher = name, "could not load searcher config");
            ConfigError::UnknownSearcher(name.to_string())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunking::ChunkingConfig;

    const SAMPLE: &str = r#"{
        "logging": { "filter": "debug" },
        "local": {
            "model_type": "ollama",
            "model_host": "http://localhost:11434",
            "model_name": "llama3",
            "embedder_hostname": "http://localhost:11434",
            "embedder_model_name": "nomic-embed-text",
            "max_num_of_tokens": 128,
            "num_of_relevant_chunks": 3
        },
        "cloud": {
            "model_type": "gigachat",
            "credentials": "secret",
            "database_location": "./data.csv"
        }
    }"#;

    #[test]
    fn profiles_are_keyed_by_name() -> Result<(), ConfigError> {
        let config = SearcherConfig::from_json(SAMPLE)?;
        assert_eq!(config.profiles.len(), 2);
        assert_eq!(
            config
                .logging
                .as_ref()
                .and_then(|logging| logging.filter.as_deref()),
            Some("debug")
        );

        let local = config.profile("local")?;
        assert_eq!(local.name, "local");
        assert_eq!(local.num_of_relevant_chunks(), 3);
        assert_eq!(local.ingestion_options()?.max_tokens, 128);
        assert_eq!(local.ingestion_options()?.overlap_tokens, 5);
        Ok(())
    }

    #[test]
    fn defaults_apply_to_missing_options() -> Result<(), ConfigError> {
        let config = SearcherConfig::from_json(SAMPLE)?;
        let cloud = config.profile("cloud")?;
        assert_eq!(cloud.num_of_relevant_chunks(), 2);
        assert_eq!(cloud.ingestion_options()?.max_tokens, 256);
        assert!(cloud.ingestion_options()?.num_of_workers >= 1);
        Ok(())
    }

    #[test]
    fn unknown_searcher_is_a_config_error() -> Result<(), ConfigError> {
        let config = SearcherConfig::from_json(SAMPLE)?;
        assert!(matches!(
            config.profile("missing"),
            Err(ConfigError::UnknownSearcher(name)) if name == "missing"
        ));
        Ok(())
    }

    #[test]
    fn malformed_json_is_a_parse_error() {
        let result = SearcherConfig::from_json(r#"{"local": {"max_num_of_tokens": "many"}}"#);
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn zero_workers_are_rejected() {
        let profile = SearcherProfile {
            num_of_workers: Some(0),
            ..SearcherProfile::named("local")
        };
        assert!(matches!(
            profile.ingestion_options(),
            Err(ConfigError::InvalidOption(_))
        ));
    }

    #[test]
    fn small_chunk_size_shrinks_overlap() -> Result<(), ConfigError> {
        for (max_num_of_tokens, overlap) in [(1, 0), (3, 2), (5, 4), (6, 5)] {
            let profile = SearcherProfile {
                max_num_of_tokens: Some(max_num_of_tokens),
                ..SearcherProfile::named("tiny")
            };
            let options = profile.ingestion_options()?;
            assert_eq!(options.overlap_tokens, overlap);
            assert!(ChunkingConfig::from(&options).validate().is_ok());
        }
        Ok(())
    }

    #[test]
    fn blank_required_option_is_missing() {
        let profile = SearcherProfile::named("local");
        let result = profile.require("model_host", Some("  "));
        assert!(matches!(
            result,
            Err(ConfigError::MissingOption { option, .. }) if option == "model_host"
        ));
    }
}
