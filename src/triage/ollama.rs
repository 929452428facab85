// SPDX-License-Identifier: MIT

//! Ollama-backed classification and drafting.
//!
//! Both services share one chat client. Classification pins the output shape
//! by sending the JSON schema of [`Classification`] as the `format` field,
//! so the model can only answer with the allowed labels.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use url::Url;

use crate::triage::email::Classification;
use crate::triage::services::{Classifier, DraftInputs, Drafter, ServiceError};

pub const DEFAULT_BASE_URL: &str = "http://localhost:11434";
pub const DEFAULT_MODEL: &str = "gemma2:2b";

static CLASSIFY_SCHEMA: Lazy<Value> = Lazy::new(|| {
    serde_json::to_value(schemars::schema_for!(Classification))
        .unwrap_or_else(|_| json!({"type": "object"}))
});

#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: String,
}

/// Thin client over the Ollama `/api/chat` endpoint.
#[derive(Debug, Clone)]
pub struct OllamaClient {
    client: Client,
    chat_url: Url,
    model: String,
}

impl OllamaClient {
    pub fn new(base_url: &str, model: impl Into<String>) -> Result<Self, ServiceError> {
        // Url::join drops the last path segment unless the base ends in '/'.
        let mut base = base_url.to_string();
        if !base.ends_with('/') {
            base.push('/');
        }
        let base = Url::parse(&base).map_err(|err| {
            ServiceError::request("ollama", format!("invalid base url '{}': {}", base_url, err))
        })?;
        let chat_url = base
            .join("api/chat")
            .map_err(|err| ServiceError::request("ollama", err.to_string()))?;
        Ok(OllamaClient {
            client: Client::new(),
            chat_url,
            model: model.into(),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    async fn chat(&self, messages: Value, format: Option<&Value>) -> Result<String, ServiceError> {
        let mut body = json!({
            "model": self.model,
            "messages": messages,
            "stream": false,
        });
        if let Some(format) = format {
            body["format"] = format.clone();
        }

        log::debug!("ollama request to {}", self.chat_url);
        let resp = self
            .client
            .post(self.chat_url.clone())
            .json(&body)
            .send()
            .await
            .map_err(|err| ServiceError::request("ollama", err.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(ServiceError::request(
                "ollama",
                format!("{}: {}", status, text),
            ));
        }

        let reply: ChatResponse = resp
            .json()
            .await
            .map_err(|err| ServiceError::request("ollama", err.to_string()))?;
        Ok(reply.message.content)
    }
}

/// Classifies an email into urgency, topic and summary.
#[derive(Debug, Clone)]
pub struct OllamaClassifier {
    client: OllamaClient,
}

impl OllamaClassifier {
    pub fn new(client: OllamaClient) -> Self {
        OllamaClassifier { client }
    }
}

#[async_trait]
impl Classifier for OllamaClassifier {
    async fn classify(
        &self,
        email_content: &str,
        sender_id: &str,
    ) -> Result<Classification, ServiceError> {
        let messages = json!([
            {
                "role": "system",
                "content": "You are a helpful email assistant. You can classify email based on the user provided content",
            },
            {
                "role": "user",
                "content": format!(
                    "Analyze this customer email and classify it:\n\n\
                     Email: {}\n\
                     From: {}\n\n\
                     Provide classification, including topic and urgency, using only the allowed values",
                    email_content, sender_id
                ),
            },
        ]);

        let raw = self.client.chat(messages, Some(&CLASSIFY_SCHEMA)).await?;
        log::debug!("ollama classification output: {}", raw);
        serde_json::from_str(&raw).map_err(|err| {
            ServiceError::Classification(format!("model returned invalid JSON: {}", err))
        })
    }
}

/// Drafts a reply from the email, its classification and handler artifacts.
#[derive(Debug, Clone)]
pub struct OllamaDrafter {
    client: OllamaClient,
}

impl OllamaDrafter {
    pub fn new(client: OllamaClient) -> Self {
        OllamaDrafter { client }
    }
}

#[async_trait]
impl Drafter for OllamaDrafter {
    async fn draft(
        &self,
        email_content: &str,
        classification: &Classification,
        inputs: &DraftInputs,
    ) -> Result<String, ServiceError> {
        let prompt = format!(
            "Draft a response to this customer email:\n{}\n\n\
             Email intent: {}\n\
             Urgency level: {}\n\
             Bug Ticket ID: {}\n\
             Feature ID: {}\n\
             Search results: {}\n\n\
             Guidelines:\n\
             - Be professional and helpful\n\
             - Address their specific concern\n\
             - Based on the topic, reference the bug ticket, feature ticket or search results\n\
             - Be brief",
            email_content,
            classification.topic,
            classification.urgency,
            inputs.bug_ticket.as_deref().unwrap_or(""),
            inputs.feature_id.as_deref().unwrap_or(""),
            inputs.search_results.join("; "),
        );
        let messages = json!([
            {
                "role": "system",
                "content": "You are a helpful email assistant. You can draft a courteous email based on the user provided content",
            },
            { "role": "user", "content": prompt },
        ]);

        self.client.chat(messages, None).await
    }
}
