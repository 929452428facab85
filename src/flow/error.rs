// SPDX-License-Identifier: MIT

//! Error types for the flow engine.
//!
//! Failures are split by where they originate: `GraphError` while a graph is
//! being defined, `StepError` inside a single step or one of its
//! collaborators, and `FlowError` for everything a run can surface to the
//! caller.

use thiserror::Error;

/// Raised while building or freezing a graph definition.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GraphError {
    /// A step with this name is already registered.
    #[error("duplicate step '{name}'")]
    DuplicateStep { name: String },

    /// An edge or entry referenced a step that was never registered.
    #[error("unknown step '{name}'")]
    UnknownStep { name: String },

    /// The graph was frozen; registration and wiring are closed.
    #[error("graph is frozen")]
    Frozen,

    /// `freeze` was called before an entry step was set.
    #[error("graph has no entry step")]
    NoEntry,

    /// A step has no outgoing edge but is neither terminal nor routing, so a
    /// run arriving there could never leave it.
    #[error("step '{name}' has no outgoing edge and is neither terminal nor routing")]
    DeadEnd { name: String },

    /// A step was declared terminal but also given outgoing edges.
    #[error("terminal step '{name}' has outgoing edges")]
    TerminalHasEdges { name: String },
}

/// Failure inside one step or an external service it called.
#[derive(Debug, Error)]
pub enum StepError {
    /// An external collaborator (classifier, ticketing, search, mail) failed.
    #[error("{service}: {message}")]
    Service { service: String, message: String },

    /// A state field the step requires is absent.
    #[error("missing state field '{field}'")]
    MissingField { field: String },

    /// A state field is present but unusable.
    #[error("state field '{field}' is invalid: {message}")]
    BadField { field: String, message: String },

    /// The answer supplied on resume does not match the expected shape.
    #[error("resume answer is invalid: {0}")]
    BadAnswer(String),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl StepError {
    pub fn service(service: impl Into<String>, message: impl Into<String>) -> Self {
        StepError::Service {
            service: service.into(),
            message: message.into(),
        }
    }

    pub fn missing_field(field: impl Into<String>) -> Self {
        StepError::MissingField {
            field: field.into(),
        }
    }

    pub fn bad_field(field: impl Into<String>, message: impl Into<String>) -> Self {
        StepError::BadField {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl From<String> for StepError {
    fn from(message: String) -> Self {
        StepError::Other(message)
    }
}

impl From<&str> for StepError {
    fn from(message: &str) -> Self {
        StepError::Other(message.to_string())
    }
}

/// Terminal error of one executor invocation.
#[derive(Debug, Error)]
pub enum FlowError {
    #[error(transparent)]
    Graph(#[from] GraphError),

    /// A step raised; the run fails and the partial state is kept.
    #[error("step '{step}' failed: {source}")]
    Step {
        step: String,
        #[source]
        source: StepError,
    },

    /// A routing directive named a step the graph does not contain.
    #[error("step '{step}' routed to unknown step '{target}'")]
    InvalidRoutingTarget { step: String, target: String },

    /// A routing step neither returned a directive nor has a static edge.
    #[error("routing step '{step}' returned no directive and has no static edge")]
    NoSuccessor { step: String },

    /// A step suspended while other fan-out branches were still queued.
    #[error("step '{step}' suspended while other steps were queued")]
    SuspendDuringFanOut { step: String },

    /// The thread holds an unconsumed checkpoint; it must be resumed (or
    /// purged) before a fresh run is accepted.
    #[error("thread '{thread}' has a pending suspension; resume it instead")]
    PendingSuspension { thread: String },

    /// Another run is active on the thread right now.
    #[error("thread '{thread}' is already running")]
    ThreadBusy { thread: String },

    /// Resume was called with no checkpoint to consume.
    #[error("no checkpoint for thread '{thread}'")]
    NoSuchCheckpoint { thread: String },

    /// The invocation executed more steps than the configured budget.
    #[error("run exceeded the step budget of {limit}")]
    StepBudgetExceeded { limit: u32 },
}

impl FlowError {
    /// Name of the step that caused the failure, when one did.
    pub fn failing_step(&self) -> Option<&str> {
        match self {
            FlowError::Step { step, .. }
            | FlowError::InvalidRoutingTarget { step, .. }
            | FlowError::NoSuccessor { step }
            | FlowError::SuspendDuringFanOut { step } => Some(step),
            _ => None,
        }
    }
}
