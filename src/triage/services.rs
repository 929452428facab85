// SPDX-License-Identifier: MIT

//! Collaborator boundaries for the triage steps.
//!
//! Each external system the workflow touches sits behind a small trait so
//! runs are testable without a network: classification and drafting (both
//! model-backed), ticketing, knowledge search, and outbound mail. The
//! offline implementations here cover everything except the model.

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use crate::flow::error::StepError;
use crate::triage::email::Classification;

/// Failure talking to an external collaborator.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The classifier produced no usable classification.
    #[error("classification failed: {0}")]
    Classification(String),

    /// Any other collaborator request failed.
    #[error("{service} request failed: {message}")]
    Request { service: String, message: String },
}

impl ServiceError {
    pub fn request(service: impl Into<String>, message: impl Into<String>) -> Self {
        ServiceError::Request {
            service: service.into(),
            message: message.into(),
        }
    }
}

impl From<ServiceError> for StepError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Classification(message) => StepError::service("classifier", message),
            ServiceError::Request { service, message } => StepError::service(service, message),
        }
    }
}

#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(
        &self,
        email_content: &str,
        sender_id: &str,
    ) -> Result<Classification, ServiceError>;
}

/// Everything the drafting model may lean on besides the email itself.
#[derive(Debug, Clone, Default)]
pub struct DraftInputs {
    pub bug_ticket: Option<String>,
    pub feature_id: Option<String>,
    pub search_results: Vec<String>,
}

#[async_trait]
pub trait Drafter: Send + Sync {
    async fn draft(
        &self,
        email_content: &str,
        classification: &Classification,
        inputs: &DraftInputs,
    ) -> Result<String, ServiceError>;
}

#[async_trait]
pub trait Ticketing: Send + Sync {
    async fn open_bug(&self, summary: &str) -> Result<String, ServiceError>;
    async fn open_feature(&self, summary: &str) -> Result<String, ServiceError>;
}

#[async_trait]
pub trait SearchIndex: Send + Sync {
    async fn search(&self, query: &str) -> Result<Vec<String>, ServiceError>;
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, recipient: &str, body: &str) -> Result<(), ServiceError>;
}

/// Ticket ids in the `BUG_`/`FTR_` uuid format.
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidTicketing;

#[async_trait]
impl Ticketing for UuidTicketing {
    async fn open_bug(&self, summary: &str) -> Result<String, ServiceError> {
        let ticket = format!("BUG_{}", Uuid::new_v4());
        log::info!("opened bug ticket {} ({})", ticket, summary);
        Ok(ticket)
    }

    async fn open_feature(&self, summary: &str) -> Result<String, ServiceError> {
        let feature = format!("FTR_{}", Uuid::new_v4());
        log::info!("opened feature request {} ({})", feature, summary);
        Ok(feature)
    }
}

/// Canned knowledge-base entries for offline runs.
#[derive(Debug, Clone)]
pub struct StaticSearch {
    results: Vec<String>,
}

impl StaticSearch {
    pub fn new(results: Vec<String>) -> Self {
        StaticSearch { results }
    }
}

#[async_trait]
impl SearchIndex for StaticSearch {
    async fn search(&self, query: &str) -> Result<Vec<String>, ServiceError> {
        log::debug!("knowledge search for: {}", query);
        Ok(self.results.clone())
    }
}

/// Logs the outgoing reply instead of talking to a mail provider.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, recipient: &str, body: &str) -> Result<(), ServiceError> {
        log::info!("reply to {}:\n{}", recipient, body);
        Ok(())
    }
}

/// Bundle of collaborators the triage graph is wired with.
#[derive(Clone)]
pub struct Services {
    pub classifier: Arc<dyn Classifier>,
    pub drafter: Arc<dyn Drafter>,
    pub ticketing: Arc<dyn Ticketing>,
    pub search: Arc<dyn SearchIndex>,
    pub mailer: Arc<dyn Mailer>,
}
