// SPDX-License-Identifier: MIT

//! Runtime configuration for the triage binary.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

use crate::triage::ollama::{
    OllamaClassifier, OllamaClient, OllamaDrafter, DEFAULT_BASE_URL, DEFAULT_MODEL,
};
use crate::triage::services::{LogMailer, ServiceError, Services, StaticSearch, UuidTicketing};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
}

/// Settings loadable from YAML. The Ollama endpoint can also be overridden
/// through `OLLAMA_BASE_URL` and `OLLAMA_MODEL`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub ollama_base_url: String,
    pub ollama_model: String,
    /// Canned knowledge-base entries served to the search step.
    pub search_corpus: Vec<String>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig {
            ollama_base_url: DEFAULT_BASE_URL.to_string(),
            ollama_model: DEFAULT_MODEL.to_string(),
            search_corpus: vec![
                "Notifications can be delivered twice when two devices share one account"
                    .to_string(),
                "Resetting notification preferences clears queued duplicates".to_string(),
            ],
        }
    }
}

impl RuntimeConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse_yaml(&content)
    }

    pub fn parse_yaml(content: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Applies `OLLAMA_*` environment overrides.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(base_url) = std::env::var("OLLAMA_BASE_URL") {
            self.ollama_base_url = base_url;
        }
        if let Ok(model) = std::env::var("OLLAMA_MODEL") {
            self.ollama_model = model;
        }
        self
    }

    /// Builds the production service bundle.
    pub fn services(&self) -> Result<Services, ServiceError> {
        let client = OllamaClient::new(&self.ollama_base_url, self.ollama_model.clone())?;
        Ok(Services {
            classifier: Arc::new(OllamaClassifier::new(client.clone())),
            drafter: Arc::new(OllamaDrafter::new(client)),
            ticketing: Arc::new(UuidTicketing),
            search: Arc::new(StaticSearch::new(self.search_corpus.clone())),
            mailer: Arc::new(LogMailer),
        })
    }
}
