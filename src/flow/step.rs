// SPDX-License-Identifier: MIT

//! The step contract: one uniform interface for every unit of work.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;

use crate::flow::error::StepError;
use crate::flow::state::{StateUpdate, ThreadId, WorkflowState};

/// Everything a step may observe while executing.
///
/// The state is read-only by contract: steps describe their effect through
/// the returned [`StepResult`] and the executor applies it.
pub struct StepContext<'a> {
    pub state: &'a WorkflowState,
    pub thread: &'a ThreadId,
    /// Present only when this step is re-entered after a suspension.
    pub answer: Option<&'a Value>,
}

/// A named unit of work in a graph.
#[async_trait]
pub trait Step: Send + Sync {
    /// Unique name of the step within its graph.
    fn name(&self) -> &str;

    /// Routing steps pick successors dynamically and are exempt from the
    /// static-edge check at freeze time.
    fn is_routing(&self) -> bool {
        false
    }

    async fn run(&self, ctx: StepContext<'_>) -> Result<StepResult, StepError>;
}

/// Outcome of one step execution.
#[derive(Debug, Clone)]
pub enum StepResult {
    /// Merge the update and continue along the static edges (or finish, if
    /// the step is terminal).
    Update(StateUpdate),

    /// Merge the update and hand control to the named steps, overriding any
    /// static edges.
    Goto {
        update: StateUpdate,
        next: Vec<String>,
    },

    /// Stop here and wait for an external answer. The payload goes back to
    /// the caller and this same step re-runs when the thread is resumed.
    Suspend { payload: Value },
}

impl StepResult {
    pub fn update(update: StateUpdate) -> Self {
        StepResult::Update(update)
    }

    /// An update that changes nothing.
    pub fn empty() -> Self {
        StepResult::Update(HashMap::new())
    }

    pub fn goto<I, S>(update: StateUpdate, next: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        StepResult::Goto {
            update,
            next: next.into_iter().map(Into::into).collect(),
        }
    }

    pub fn suspend(payload: Value) -> Self {
        StepResult::Suspend { payload }
    }
}
