// SPDX-License-Identifier: MIT

//! End-to-end runs of the triage workflow against mock collaborators.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use serde_json::json;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, Notify};

use relay_rs::flow::error::{FlowError, GraphError, StepError};
use relay_rs::flow::executor::Executor;
use relay_rs::flow::graph::GraphBuilder;
use relay_rs::flow::state::{StateUpdate, ThreadId};
use relay_rs::flow::step::{Step, StepContext, StepResult};
use relay_rs::flow::store::StateStore;
use relay_rs::triage::build_graph;
use relay_rs::triage::email::{fields, Classification, Topic, Urgency};
use relay_rs::triage::services::{
    Classifier, DraftInputs, Drafter, Mailer, ServiceError, Services, StaticSearch, UuidTicketing,
};
use relay_rs::triage::steps::names;

static SEARCH_CORPUS: Lazy<Vec<String>> = Lazy::new(|| {
    vec![
        "Duplicate notifications happen when two devices share one account".to_string(),
        "Resetting notification preferences clears queued duplicates".to_string(),
    ]
});

// === Mock Collaborators ===

struct FixedClassifier {
    classification: Classification,
}

#[async_trait]
impl Classifier for FixedClassifier {
    async fn classify(
        &self,
        _email_content: &str,
        _sender_id: &str,
    ) -> Result<Classification, ServiceError> {
        Ok(self.classification.clone())
    }
}

struct FailingClassifier;

#[async_trait]
impl Classifier for FailingClassifier {
    async fn classify(
        &self,
        _email_content: &str,
        _sender_id: &str,
    ) -> Result<Classification, ServiceError> {
        Err(ServiceError::request("ollama", "connection refused"))
    }
}

/// Signals when it is entered and waits to be released, so a test can hold a
/// run in flight deterministically.
struct GateClassifier {
    entered: mpsc::Sender<()>,
    release: Arc<Notify>,
    classification: Classification,
}

#[async_trait]
impl Classifier for GateClassifier {
    async fn classify(
        &self,
        _email_content: &str,
        _sender_id: &str,
    ) -> Result<Classification, ServiceError> {
        let _ = self.entered.send(()).await;
        self.release.notified().await;
        Ok(self.classification.clone())
    }
}

#[derive(Default)]
struct CountingDrafter {
    calls: AtomicUsize,
}

#[async_trait]
impl Drafter for CountingDrafter {
    async fn draft(
        &self,
        _email_content: &str,
        classification: &Classification,
        inputs: &DraftInputs,
    ) -> Result<String, ServiceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let artifact = inputs
            .bug_ticket
            .clone()
            .or_else(|| inputs.feature_id.clone())
            .unwrap_or_else(|| inputs.search_results.join("; "));
        Ok(format!(
            "Thanks for reaching out about a {} issue. Reference: {}",
            classification.topic, artifact
        ))
    }
}

#[derive(Default)]
struct CaptureMailer {
    sent: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl Mailer for CaptureMailer {
    async fn send(&self, recipient: &str, body: &str) -> Result<(), ServiceError> {
        self.sent
            .lock()
            .unwrap()
            .push((recipient.to_string(), body.to_string()));
        Ok(())
    }
}

// === Fixtures ===

fn classification(urgency: Urgency, topic: Topic) -> Classification {
    Classification {
        urgency,
        topic,
        summary: "duplicate notifications".to_string(),
    }
}

fn inbox() -> StateUpdate {
    HashMap::from([
        (
            fields::EMAIL_CONTENT.to_string(),
            json!("I received the notification twice."),
        ),
        (fields::SENDER_ID.to_string(), json!("customer@example.com")),
    ])
}

struct Harness {
    executor: Executor,
    drafter: Arc<CountingDrafter>,
    mailer: Arc<CaptureMailer>,
}

fn harness_with(classifier: Arc<dyn Classifier>) -> Harness {
    let drafter = Arc::new(CountingDrafter::default());
    let mailer = Arc::new(CaptureMailer::default());
    let services = Services {
        classifier,
        drafter: drafter.clone(),
        ticketing: Arc::new(UuidTicketing),
        search: Arc::new(StaticSearch::new(SEARCH_CORPUS.clone())),
        mailer: mailer.clone(),
    };
    let graph = build_graph(&services).expect("triage graph must freeze");
    Harness {
        executor: Executor::new(graph, StateStore::new()),
        drafter,
        mailer,
    }
}

fn harness(urgency: Urgency, topic: Topic) -> Harness {
    harness_with(Arc::new(FixedClassifier {
        classification: classification(urgency, topic),
    }))
}

// === Handler Paths ===

#[tokio::test]
async fn test_technical_issue_runs_search_to_completion() {
    let h = harness(Urgency::Medium, Topic::TechnicalIssue);
    let thread = ThreadId::new("customer_123");

    let outcome = h.executor.start(&thread, inbox()).await.unwrap();

    assert!(outcome.is_completed());
    assert_eq!(
        outcome.visited(),
        [
            names::READ_EMAIL,
            names::CLASSIFY_EMAIL,
            names::SEARCH_RESULTS,
            names::DRAFT_RESPONSE,
            names::SEND_REPLY,
        ]
    );

    let state = outcome.state().unwrap();
    let keys: BTreeSet<&str> = state.keys().map(String::as_str).collect();
    let expected: BTreeSet<&str> = [
        fields::EMAIL_CONTENT,
        fields::SENDER_ID,
        fields::RECEIVED_AT,
        fields::CLASSIFICATION,
        fields::SEARCH_RESULTS,
        fields::DRAFT_RESPONSE,
    ]
    .into_iter()
    .collect();
    assert_eq!(keys, expected, "exactly the touched fields are present");

    let sent = h.mailer.sent.lock().unwrap();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, "customer@example.com");
    assert!(sent[0].1.contains("Duplicate notifications"));
    assert_eq!(h.drafter.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_bug_report_opens_ticket() {
    let h = harness(Urgency::Medium, Topic::Bug);
    let thread = ThreadId::new("t-bug");

    let outcome = h.executor.start(&thread, inbox()).await.unwrap();

    assert!(outcome.visited().contains(&names::BUG_REPORT.to_string()));
    assert!(!outcome
        .visited()
        .contains(&names::HUMAN_INTERVENTION.to_string()));
    let state = outcome.state().unwrap();
    let ticket = state.get_str(fields::BUG_TICKET).unwrap();
    assert!(ticket.starts_with("BUG_"));
    assert!(state.get(fields::FEATURE_ID).is_none());
}

#[tokio::test]
async fn test_feature_request_records_id() {
    let h = harness(Urgency::Low, Topic::Feature);
    let thread = ThreadId::new("t-feature");

    let outcome = h.executor.start(&thread, inbox()).await.unwrap();

    let state = outcome.state().unwrap();
    assert!(state
        .get_str(fields::FEATURE_ID)
        .unwrap()
        .starts_with("FTR_"));
}

// === Escalation ===

#[tokio::test]
async fn test_high_urgency_suspends_for_review() {
    let h = harness(Urgency::High, Topic::Bug);
    let thread = ThreadId::new("t-urgent");

    let outcome = h.executor.start(&thread, inbox()).await.unwrap();

    assert!(!outcome.is_completed());
    assert_eq!(
        outcome.visited(),
        [
            names::READ_EMAIL,
            names::CLASSIFY_EMAIL,
            names::HUMAN_INTERVENTION,
        ]
    );
    let payload = outcome.suspend_payload().unwrap();
    assert_eq!(payload["sender_id"], json!("customer@example.com"));
    assert_eq!(payload["classification"]["urgency"], json!("High"));
    assert_eq!(payload["classification"]["topic"], json!("Bug"));

    let checkpoint = h.executor.store().checkpoint(&thread).await.unwrap();
    assert_eq!(checkpoint.pending_step, names::HUMAN_INTERVENTION);
    assert!(h.mailer.sent.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_unmapped_topic_escalates() {
    let h = harness(Urgency::Low, Topic::Other);
    let thread = ThreadId::new("t-odd");

    let outcome = h.executor.start(&thread, inbox()).await.unwrap();
    assert!(!outcome.is_completed());
    assert_eq!(
        outcome.visited().last().map(String::as_str),
        Some(names::HUMAN_INTERVENTION)
    );
}

#[tokio::test]
async fn test_approval_hands_off_to_drafter() {
    let h = harness(Urgency::High, Topic::Billing);
    let thread = ThreadId::new("t-approve");

    h.executor.start(&thread, inbox()).await.unwrap();
    let outcome = h
        .executor
        .resume(&thread, json!({"approval": "Y"}))
        .await
        .unwrap();

    assert!(outcome.is_completed());
    assert_eq!(
        outcome.visited(),
        [
            names::HUMAN_INTERVENTION,
            names::DRAFT_RESPONSE,
            names::SEND_REPLY,
        ]
    );
    assert_eq!(h.drafter.calls.load(Ordering::SeqCst), 1);
    let state = outcome.state().unwrap();
    assert!(!state.get_str(fields::DRAFT_RESPONSE).unwrap().is_empty());
    // State from before the suspension is still there.
    assert!(state.contains(fields::RECEIVED_AT));
}

#[tokio::test]
async fn test_rejection_sends_the_edited_reply_verbatim() {
    let h = harness(Urgency::High, Topic::Billing);
    let thread = ThreadId::new("t-reject");

    h.executor.start(&thread, inbox()).await.unwrap();
    let outcome = h
        .executor
        .resume(
            &thread,
            json!({"approval": "N", "edited_response": "Refund issued, apologies."}),
        )
        .await
        .unwrap();

    assert!(outcome.is_completed());
    assert_eq!(
        outcome.visited(),
        [names::HUMAN_INTERVENTION, names::SEND_REPLY]
    );
    assert_eq!(h.drafter.calls.load(Ordering::SeqCst), 0);

    let sent = h.mailer.sent.lock().unwrap();
    assert_eq!(sent[0].1, "Refund issued, apologies.");
}

#[tokio::test]
async fn test_rejection_without_edit_fails_and_consumes_checkpoint() {
    let h = harness(Urgency::High, Topic::Billing);
    let thread = ThreadId::new("t-bad-answer");

    h.executor.start(&thread, inbox()).await.unwrap();
    let err = h
        .executor
        .resume(&thread, json!({"approval": "N"}))
        .await
        .unwrap_err();

    assert_eq!(err.failing_step(), Some(names::HUMAN_INTERVENTION));
    assert!(matches!(
        err,
        FlowError::Step {
            source: StepError::BadAnswer(_),
            ..
        }
    ));

    // The checkpoint went with the failed resume.
    let err = h
        .executor
        .resume(&thread, json!({"approval": "Y"}))
        .await
        .unwrap_err();
    assert!(matches!(err, FlowError::NoSuchCheckpoint { .. }));
}

// === Thread Discipline ===

#[tokio::test]
async fn test_resume_is_single_use() {
    let h = harness(Urgency::High, Topic::Account);
    let thread = ThreadId::new("t-once");

    h.executor.start(&thread, inbox()).await.unwrap();
    h.executor
        .resume(&thread, json!({"approval": "Y"}))
        .await
        .unwrap();

    let err = h
        .executor
        .resume(&thread, json!({"approval": "Y"}))
        .await
        .unwrap_err();
    assert!(matches!(err, FlowError::NoSuchCheckpoint { .. }));
}

#[tokio::test]
async fn test_fresh_run_rejected_while_suspended() {
    let h = harness(Urgency::High, Topic::Account);
    let thread = ThreadId::new("t-pending");

    h.executor.start(&thread, inbox()).await.unwrap();
    let err = h.executor.start(&thread, inbox()).await.unwrap_err();
    assert!(matches!(err, FlowError::PendingSuspension { .. }));
}

#[tokio::test]
async fn test_concurrent_starts_on_one_thread_collide() {
    let (entered_tx, mut entered_rx) = mpsc::channel(1);
    let release = Arc::new(Notify::new());
    let h = harness_with(Arc::new(GateClassifier {
        entered: entered_tx,
        release: release.clone(),
        classification: classification(Urgency::Low, Topic::TechnicalIssue),
    }));
    let thread = ThreadId::new("t-contended");

    let running = {
        let executor = h.executor.clone();
        let thread = thread.clone();
        tokio::spawn(async move { executor.start(&thread, inbox()).await })
    };

    entered_rx.recv().await.expect("first run reaches the classifier");
    let err = h.executor.start(&thread, inbox()).await.unwrap_err();
    assert!(matches!(err, FlowError::ThreadBusy { .. }));

    release.notify_one();
    let outcome = running.await.unwrap().unwrap();
    assert!(outcome.is_completed());
}

#[tokio::test]
async fn test_threads_are_isolated() {
    let h = harness(Urgency::High, Topic::Billing);

    h.executor
        .start(&ThreadId::new("t-a"), inbox())
        .await
        .unwrap();

    // A suspension on one thread does not block another.
    let outcome = h
        .executor
        .start(&ThreadId::new("t-b"), inbox())
        .await
        .unwrap();
    assert!(!outcome.is_completed());

    let resumed = h
        .executor
        .resume(&ThreadId::new("t-a"), json!({"approval": "Y"}))
        .await
        .unwrap();
    assert!(resumed.is_completed());
    assert!(h.executor.store().checkpoint(&ThreadId::new("t-b")).await.is_some());
}

// === Failure Modes ===

#[tokio::test]
async fn test_classifier_outage_fails_with_step_name() {
    let h = harness_with(Arc::new(FailingClassifier));
    let thread = ThreadId::new("t-outage");

    let err = h.executor.start(&thread, inbox()).await.unwrap_err();
    assert_eq!(err.failing_step(), Some(names::CLASSIFY_EMAIL));
    assert!(err.to_string().contains("connection refused"));

    // Intake already ran, and its fields survived the failure.
    let state = h.executor.store().state(&thread).await.unwrap();
    assert!(state.contains(fields::RECEIVED_AT));
    assert!(h.executor.store().checkpoint(&thread).await.is_none());
}

#[tokio::test]
async fn test_missing_inbox_fields_fail_at_intake() {
    let h = harness(Urgency::Low, Topic::Bug);
    let err = h
        .executor
        .start(&ThreadId::new("t-empty"), HashMap::new())
        .await
        .unwrap_err();
    assert_eq!(err.failing_step(), Some(names::READ_EMAIL));
}

// === Definition Errors ===

struct SilentStep;

#[async_trait]
impl Step for SilentStep {
    fn name(&self) -> &str {
        "silent"
    }

    async fn run(&self, _ctx: StepContext<'_>) -> Result<StepResult, StepError> {
        Ok(StepResult::empty())
    }
}

#[tokio::test]
async fn test_dead_end_step_rejected_at_freeze() {
    let mut builder = GraphBuilder::new();
    builder.register(SilentStep).unwrap();
    builder.set_entry("silent").unwrap();

    let err = builder.freeze().unwrap_err();
    assert_eq!(
        err,
        GraphError::DeadEnd {
            name: "silent".to_string()
        }
    );
}

#[tokio::test]
async fn test_purge_clears_a_suspended_thread() {
    let h = harness(Urgency::High, Topic::Billing);
    let thread = ThreadId::new("t-purge");

    h.executor.start(&thread, inbox()).await.unwrap();
    assert!(h.executor.store().purge(&thread).await.unwrap());

    // After the purge the thread is brand new: no checkpoint, fresh runs fine.
    let err = h
        .executor
        .resume(&thread, json!({"approval": "Y"}))
        .await
        .unwrap_err();
    assert!(matches!(err, FlowError::NoSuchCheckpoint { .. }));
    h.executor.start(&thread, inbox()).await.unwrap();
}
