// SPDX-License-Identifier: MIT

//! Email domain types and the state fields the triage steps share.

use schemars::JsonSchema;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

use crate::flow::error::StepError;
use crate::flow::state::WorkflowState;

/// State fields written and read by the triage steps.
pub mod fields {
    pub const EMAIL_CONTENT: &str = "email_content";
    pub const SENDER_ID: &str = "sender_id";
    pub const RECEIVED_AT: &str = "received_at";
    pub const CLASSIFICATION: &str = "classification";
    pub const BUG_TICKET: &str = "bug_ticket";
    pub const FEATURE_ID: &str = "feature_id";
    pub const SEARCH_RESULTS: &str = "search_results";
    pub const DRAFT_RESPONSE: &str = "draft_response";
}

/// How quickly the sender expects a reaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum Urgency {
    Low,
    Medium,
    High,
}

impl fmt::Display for Urgency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Urgency::Low => "Low",
            Urgency::Medium => "Medium",
            Urgency::High => "High",
        };
        f.write_str(label)
    }
}

/// What the email is about.
///
/// `Other` absorbs any label the classifier emits outside the known set;
/// routing treats it like an escalation. The schema advertised to the model
/// lists only the real topics, so `Other` never appears in a prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Topic {
    Account,
    Billing,
    Bug,
    Feature,
    #[serde(rename = "Technical Issue")]
    TechnicalIssue,
    Other,
}

impl<'de> Deserialize<'de> for Topic {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let label = String::deserialize(deserializer)?;
        Ok(match label.as_str() {
            "Account" => Topic::Account,
            "Billing" => Topic::Billing,
            "Bug" => Topic::Bug,
            "Feature" => Topic::Feature,
            "Technical Issue" => Topic::TechnicalIssue,
            _ => Topic::Other,
        })
    }
}

impl JsonSchema for Topic {
    fn schema_name() -> String {
        "Topic".to_string()
    }

    fn json_schema(_gen: &mut schemars::gen::SchemaGenerator) -> schemars::schema::Schema {
        schemars::schema::SchemaObject {
            instance_type: Some(schemars::schema::InstanceType::String.into()),
            enum_values: Some(vec![
                "Account".into(),
                "Billing".into(),
                "Bug".into(),
                "Feature".into(),
                "Technical Issue".into(),
            ]),
            ..Default::default()
        }
        .into()
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Topic::Account => "Account",
            Topic::Billing => "Billing",
            Topic::Bug => "Bug",
            Topic::Feature => "Feature",
            Topic::TechnicalIssue => "Technical Issue",
            Topic::Other => "Other",
        };
        f.write_str(label)
    }
}

/// Structured result of the classification service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Classification {
    pub urgency: Urgency,
    pub topic: Topic,
    pub summary: String,
}

/// Reviewer verdict supplied through `resume`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HumanDecision {
    pub approval: Approval,
    /// Required when the reviewer rejects the automatic draft.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edited_response: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Approval {
    Y,
    N,
}

/// Reads the classification a previous step stored.
pub fn classification_of(state: &WorkflowState) -> Result<Classification, StepError> {
    let value = state
        .get(fields::CLASSIFICATION)
        .ok_or_else(|| StepError::missing_field(fields::CLASSIFICATION))?;
    serde_json::from_value(value.clone())
        .map_err(|err| StepError::bad_field(fields::CLASSIFICATION, err.to_string()))
}

/// Reads a required string field.
pub fn require_str<'a>(state: &'a WorkflowState, field: &str) -> Result<&'a str, StepError> {
    state
        .get_str(field)
        .ok_or_else(|| StepError::missing_field(field))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::state::field;
    use serde_json::json;

    #[test]
    fn test_topic_round_trips_known_labels() {
        for (label, topic) in [
            ("Account", Topic::Account),
            ("Billing", Topic::Billing),
            ("Bug", Topic::Bug),
            ("Feature", Topic::Feature),
            ("Technical Issue", Topic::TechnicalIssue),
        ] {
            let parsed: Topic = serde_json::from_value(json!(label)).unwrap();
            assert_eq!(parsed, topic);
            assert_eq!(serde_json::to_value(topic).unwrap(), json!(label));
        }
    }

    #[test]
    fn test_unknown_topic_falls_back_to_other() {
        let parsed: Topic = serde_json::from_value(json!("Existential Dread")).unwrap();
        assert_eq!(parsed, Topic::Other);
    }

    #[test]
    fn test_schema_offers_only_real_topics() {
        let schema = serde_json::to_value(schemars::schema_for!(Classification)).unwrap();
        let text = schema.to_string();
        assert!(text.contains("Technical Issue"));
        assert!(!text.contains("Other"));
        assert!(text.contains("urgency"));
        assert!(text.contains("summary"));
    }

    #[test]
    fn test_classification_deserializes_model_output() {
        let raw = json!({
            "urgency": "High",
            "topic": "Technical Issue",
            "summary": "Duplicate notifications"
        });
        let classification: Classification = serde_json::from_value(raw).unwrap();
        assert_eq!(classification.urgency, Urgency::High);
        assert_eq!(classification.topic, Topic::TechnicalIssue);
    }

    #[test]
    fn test_classification_of_requires_field() {
        let state = WorkflowState::new();
        let err = classification_of(&state).unwrap_err();
        assert!(matches!(err, StepError::MissingField { .. }));

        let state =
            WorkflowState::from_update(field(fields::CLASSIFICATION, json!("not an object")));
        let err = classification_of(&state).unwrap_err();
        assert!(matches!(err, StepError::BadField { .. }));
    }

    #[test]
    fn test_human_decision_edit_is_optional() {
        let approve: HumanDecision = serde_json::from_value(json!({"approval": "Y"})).unwrap();
        assert_eq!(approve.approval, Approval::Y);
        assert!(approve.edited_response.is_none());

        let reject: HumanDecision = serde_json::from_value(json!({
            "approval": "N",
            "edited_response": "We are on it."
        }))
        .unwrap();
        assert_eq!(reject.approval, Approval::N);
        assert_eq!(reject.edited_response.as_deref(), Some("We are on it."));
    }
}
