// SPDX-License-Identifier: MIT

//! The triage workflow: eight steps from inbox to outbox.
//!
//! Linear intake and delivery are wired with static edges; `classify_email`
//! and `human_intervention` are routing steps that pick their successor from
//! the classification and the reviewer's verdict.

use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;

use crate::flow::error::{GraphError, StepError};
use crate::flow::graph::{Graph, GraphBuilder};
use crate::flow::state::field;
use crate::flow::step::{Step, StepContext, StepResult};
use crate::triage::email::{
    classification_of, fields, require_str, Approval, Classification, HumanDecision, Topic,
    Urgency,
};
use crate::triage::services::{
    Classifier, DraftInputs, Drafter, Mailer, SearchIndex, Services, Ticketing,
};

/// Step names, which double as routing targets.
pub mod names {
    pub const READ_EMAIL: &str = "read_email";
    pub const CLASSIFY_EMAIL: &str = "classify_email";
    pub const BUG_REPORT: &str = "bug_report";
    pub const NEW_FEATURE: &str = "new_feature";
    pub const SEARCH_RESULTS: &str = "search_results";
    pub const HUMAN_INTERVENTION: &str = "human_intervention";
    pub const DRAFT_RESPONSE: &str = "draft_response";
    pub const SEND_REPLY: &str = "send_reply";
}

/// Routing rule applied after classification. High urgency always goes to a
/// human, as do topics without a dedicated handler.
fn handler_for(classification: &Classification) -> &'static str {
    if classification.urgency == Urgency::High {
        return names::HUMAN_INTERVENTION;
    }
    match classification.topic {
        Topic::Bug => names::BUG_REPORT,
        Topic::Feature => names::NEW_FEATURE,
        Topic::TechnicalIssue => names::SEARCH_RESULTS,
        Topic::Account | Topic::Billing | Topic::Other => names::HUMAN_INTERVENTION,
    }
}

/// Validates the inbox fields and stamps the intake time.
pub struct ReadEmail;

#[async_trait]
impl Step for ReadEmail {
    fn name(&self) -> &str {
        names::READ_EMAIL
    }

    async fn run(&self, ctx: StepContext<'_>) -> Result<StepResult, StepError> {
        let content = require_str(ctx.state, fields::EMAIL_CONTENT)?;
        require_str(ctx.state, fields::SENDER_ID)?;
        if content.trim().is_empty() {
            return Err(StepError::bad_field(
                fields::EMAIL_CONTENT,
                "email body is empty",
            ));
        }
        Ok(StepResult::update(field(
            fields::RECEIVED_AT,
            json!(chrono::Utc::now().to_rfc3339()),
        )))
    }
}

/// Calls the classifier and routes to the matching handler.
pub struct ClassifyEmail {
    classifier: Arc<dyn Classifier>,
}

impl ClassifyEmail {
    pub fn new(classifier: Arc<dyn Classifier>) -> Self {
        ClassifyEmail { classifier }
    }
}

#[async_trait]
impl Step for ClassifyEmail {
    fn name(&self) -> &str {
        names::CLASSIFY_EMAIL
    }

    fn is_routing(&self) -> bool {
        true
    }

    async fn run(&self, ctx: StepContext<'_>) -> Result<StepResult, StepError> {
        let content = require_str(ctx.state, fields::EMAIL_CONTENT)?;
        let sender = require_str(ctx.state, fields::SENDER_ID)?;

        let classification = self.classifier.classify(content, sender).await?;
        log::info!(
            "email from {} classified as {}/{}",
            sender,
            classification.topic,
            classification.urgency
        );

        let next = handler_for(&classification);
        let update = field(fields::CLASSIFICATION, serde_json::to_value(&classification)?);
        Ok(StepResult::goto(update, [next]))
    }
}

/// Opens a bug ticket for the reported problem.
pub struct BugReport {
    ticketing: Arc<dyn Ticketing>,
}

impl BugReport {
    pub fn new(ticketing: Arc<dyn Ticketing>) -> Self {
        BugReport { ticketing }
    }
}

#[async_trait]
impl Step for BugReport {
    fn name(&self) -> &str {
        names::BUG_REPORT
    }

    async fn run(&self, ctx: StepContext<'_>) -> Result<StepResult, StepError> {
        let classification = classification_of(ctx.state)?;
        let ticket = self.ticketing.open_bug(&classification.summary).await?;
        Ok(StepResult::update(field(fields::BUG_TICKET, json!(ticket))))
    }
}

/// Records a feature request.
pub struct NewFeature {
    ticketing: Arc<dyn Ticketing>,
}

impl NewFeature {
    pub fn new(ticketing: Arc<dyn Ticketing>) -> Self {
        NewFeature { ticketing }
    }
}

#[async_trait]
impl Step for NewFeature {
    fn name(&self) -> &str {
        names::NEW_FEATURE
    }

    async fn run(&self, ctx: StepContext<'_>) -> Result<StepResult, StepError> {
        let classification = classification_of(ctx.state)?;
        let feature = self.ticketing.open_feature(&classification.summary).await?;
        Ok(StepResult::update(field(
            fields::FEATURE_ID,
            json!(feature),
        )))
    }
}

/// Looks the email up in the knowledge base.
pub struct SearchResults {
    search: Arc<dyn SearchIndex>,
}

impl SearchResults {
    pub fn new(search: Arc<dyn SearchIndex>) -> Self {
        SearchResults { search }
    }
}

#[async_trait]
impl Step for SearchResults {
    fn name(&self) -> &str {
        names::SEARCH_RESULTS
    }

    async fn run(&self, ctx: StepContext<'_>) -> Result<StepResult, StepError> {
        let content = require_str(ctx.state, fields::EMAIL_CONTENT)?;
        let results = self.search.search(content).await?;
        Ok(StepResult::update(field(
            fields::SEARCH_RESULTS,
            json!(results),
        )))
    }
}

/// Escalation point. Suspends the run for a reviewer, then routes on their
/// verdict: approval hands off to the drafting model with an empty draft,
/// rejection takes the reviewer's own text straight to delivery.
pub struct HumanIntervention;

#[async_trait]
impl Step for HumanIntervention {
    fn name(&self) -> &str {
        names::HUMAN_INTERVENTION
    }

    fn is_routing(&self) -> bool {
        true
    }

    async fn run(&self, ctx: StepContext<'_>) -> Result<StepResult, StepError> {
        let answer = match ctx.answer {
            Some(answer) => answer,
            None => {
                let classification = classification_of(ctx.state)?;
                let payload = json!({
                    "sender_id": require_str(ctx.state, fields::SENDER_ID)?,
                    "email_content": require_str(ctx.state, fields::EMAIL_CONTENT)?,
                    "classification": classification,
                });
                return Ok(StepResult::suspend(payload));
            }
        };

        let decision: HumanDecision = serde_json::from_value(answer.clone())
            .map_err(|err| StepError::BadAnswer(err.to_string()))?;
        log::info!("reviewer decision on {}: {:?}", ctx.thread, decision.approval);

        match decision.approval {
            Approval::Y => Ok(StepResult::goto(
                field(fields::DRAFT_RESPONSE, json!("")),
                [names::DRAFT_RESPONSE],
            )),
            Approval::N => {
                let edited = decision.edited_response.ok_or_else(|| {
                    StepError::BadAnswer("rejection requires an edited_response".to_string())
                })?;
                Ok(StepResult::goto(
                    field(fields::DRAFT_RESPONSE, json!(edited)),
                    [names::SEND_REPLY],
                ))
            }
        }
    }
}

/// Asks the drafting model for a reply.
pub struct DraftResponse {
    drafter: Arc<dyn Drafter>,
}

impl DraftResponse {
    pub fn new(drafter: Arc<dyn Drafter>) -> Self {
        DraftResponse { drafter }
    }
}

#[async_trait]
impl Step for DraftResponse {
    fn name(&self) -> &str {
        names::DRAFT_RESPONSE
    }

    async fn run(&self, ctx: StepContext<'_>) -> Result<StepResult, StepError> {
        let content = require_str(ctx.state, fields::EMAIL_CONTENT)?;
        let classification = classification_of(ctx.state)?;
        let inputs = DraftInputs {
            bug_ticket: ctx
                .state
                .get_str(fields::BUG_TICKET)
                .map(str::to_string),
            feature_id: ctx
                .state
                .get_str(fields::FEATURE_ID)
                .map(str::to_string),
            search_results: ctx
                .state
                .get(fields::SEARCH_RESULTS)
                .and_then(|v| v.as_array())
                .map(|entries| {
                    entries
                        .iter()
                        .filter_map(|entry| entry.as_str())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
        };

        let draft = self.drafter.draft(content, &classification, &inputs).await?;
        Ok(StepResult::update(field(
            fields::DRAFT_RESPONSE,
            json!(draft),
        )))
    }
}

/// Delivers the reply to the sender.
pub struct SendReply {
    mailer: Arc<dyn Mailer>,
}

impl SendReply {
    pub fn new(mailer: Arc<dyn Mailer>) -> Self {
        SendReply { mailer }
    }
}

#[async_trait]
impl Step for SendReply {
    fn name(&self) -> &str {
        names::SEND_REPLY
    }

    async fn run(&self, ctx: StepContext<'_>) -> Result<StepResult, StepError> {
        let recipient = require_str(ctx.state, fields::SENDER_ID)?;
        let draft = require_str(ctx.state, fields::DRAFT_RESPONSE)?;
        self.mailer.send(recipient, draft).await?;
        Ok(StepResult::empty())
    }
}

/// Wires the triage steps into the frozen production graph.
pub fn build_graph(services: &Services) -> Result<Graph, GraphError> {
    let mut builder = GraphBuilder::new();

    builder.register(ReadEmail)?;
    builder.register(ClassifyEmail::new(services.classifier.clone()))?;
    builder.register(BugReport::new(services.ticketing.clone()))?;
    builder.register(NewFeature::new(services.ticketing.clone()))?;
    builder.register(SearchResults::new(services.search.clone()))?;
    builder.register(HumanIntervention)?;
    builder.register(DraftResponse::new(services.drafter.clone()))?;
    builder.register(SendReply::new(services.mailer.clone()))?;

    builder.connect(names::READ_EMAIL, names::CLASSIFY_EMAIL)?;
    builder.connect(names::BUG_REPORT, names::DRAFT_RESPONSE)?;
    builder.connect(names::NEW_FEATURE, names::DRAFT_RESPONSE)?;
    builder.connect(names::SEARCH_RESULTS, names::DRAFT_RESPONSE)?;
    builder.connect(names::DRAFT_RESPONSE, names::SEND_REPLY)?;

    builder.set_entry(names::READ_EMAIL)?;
    builder.set_terminal(names::SEND_REPLY)?;

    builder.freeze()
}
