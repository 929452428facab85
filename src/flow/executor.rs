// SPDX-License-Identifier: MIT

//! The run loop: drives a frozen graph over per-thread state.
//!
//! One invocation admits the thread through the store, executes steps from a
//! FIFO frontier, and settles as completed, suspended, or failed. Suspension
//! writes a checkpoint; a later `resume` consumes it and re-enters the
//! suspended step with the external answer. A run future dropped before it
//! settles releases its thread through the admission guard.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::flow::error::FlowError;
use crate::flow::graph::Graph;
use crate::flow::state::{StateUpdate, ThreadId, WorkflowState};
use crate::flow::step::{StepContext, StepResult};
use crate::flow::store::{Admission, Checkpoint, StateStore};

/// Default bound on executed steps per invocation.
const DEFAULT_STEP_BUDGET: u32 = 256;

/// Progress notifications for streaming observers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RunEvent {
    StepStarted { step: String },
    StepCompleted { step: String },
    Suspended { step: String },
    Completed,
    Failed { message: String },
}

/// Outcome of one executor invocation.
#[derive(Debug, Clone)]
pub enum RunOutcome {
    /// The run reached a terminal step.
    Completed {
        state: WorkflowState,
        visited: Vec<String>,
    },
    /// The run stopped at a suspending step and wrote a checkpoint.
    Suspended {
        payload: Value,
        visited: Vec<String>,
    },
}

impl RunOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, RunOutcome::Completed { .. })
    }

    pub fn state(&self) -> Option<&WorkflowState> {
        match self {
            RunOutcome::Completed { state, .. } => Some(state),
            RunOutcome::Suspended { .. } => None,
        }
    }

    pub fn suspend_payload(&self) -> Option<&Value> {
        match self {
            RunOutcome::Suspended { payload, .. } => Some(payload),
            RunOutcome::Completed { .. } => None,
        }
    }

    /// Steps executed by this invocation, in order.
    pub fn visited(&self) -> &[String] {
        match self {
            RunOutcome::Completed { visited, .. } | RunOutcome::Suspended { visited, .. } => {
                visited
            }
        }
    }
}

enum LoopEnd {
    Completed,
    Suspended { step: String, payload: Value },
}

/// Drives runs of one frozen graph against an injected store.
#[derive(Clone)]
pub struct Executor {
    graph: Arc<Graph>,
    store: StateStore,
    step_budget: u32,
}

impl Executor {
    pub fn new(graph: Graph, store: StateStore) -> Self {
        Executor {
            graph: Arc::new(graph),
            store,
            step_budget: DEFAULT_STEP_BUDGET,
        }
    }

    /// Overrides the per-invocation step budget.
    pub fn with_step_budget(mut self, budget: u32) -> Self {
        self.step_budget = budget;
        self
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    /// Starts a fresh run for the thread, merging `initial` into whatever
    /// state the thread already holds.
    pub async fn start(
        &self,
        thread: &ThreadId,
        initial: StateUpdate,
    ) -> Result<RunOutcome, FlowError> {
        self.start_with_events(thread, initial, None).await
    }

    /// Same as [`Executor::start`], reporting progress on the channel.
    pub async fn start_with_events(
        &self,
        thread: &ThreadId,
        initial: StateUpdate,
        events: Option<mpsc::Sender<RunEvent>>,
    ) -> Result<RunOutcome, FlowError> {
        let (mut state, admission) = match self.store.begin_run(thread).await {
            Ok(admitted) => admitted,
            Err(err) => {
                emit(&events, RunEvent::Failed {
                    message: err.to_string(),
                })
                .await;
                return Err(err);
            }
        };
        state.merge(initial);
        log::info!("thread {}: starting run at '{}'", thread, self.graph.entry());
        self.drive(
            thread,
            admission,
            state,
            self.graph.entry().to_string(),
            None,
            events,
        )
        .await
    }

    /// Resumes a suspended run, handing `answer` to the suspended step.
    pub async fn resume(&self, thread: &ThreadId, answer: Value) -> Result<RunOutcome, FlowError> {
        self.resume_with_events(thread, answer, None).await
    }

    /// Same as [`Executor::resume`], reporting progress on the channel.
    pub async fn resume_with_events(
        &self,
        thread: &ThreadId,
        answer: Value,
        events: Option<mpsc::Sender<RunEvent>>,
    ) -> Result<RunOutcome, FlowError> {
        let (checkpoint, admission) = match self.store.begin_resume(thread).await {
            Ok(admitted) => admitted,
            Err(err) => {
                emit(&events, RunEvent::Failed {
                    message: err.to_string(),
                })
                .await;
                return Err(err);
            }
        };
        log::info!(
            "thread {}: resuming at '{}'",
            thread,
            checkpoint.pending_step
        );
        self.drive(
            thread,
            admission,
            checkpoint.state,
            checkpoint.pending_step,
            Some(answer),
            events,
        )
        .await
    }

    async fn drive(
        &self,
        thread: &ThreadId,
        admission: Admission,
        mut state: WorkflowState,
        first_step: String,
        mut answer: Option<Value>,
        events: Option<mpsc::Sender<RunEvent>>,
    ) -> Result<RunOutcome, FlowError> {
        let mut visited: Vec<String> = Vec::new();
        let end = self
            .run_loop(thread, &mut state, first_step, &mut answer, &mut visited, &events)
            .await;

        match end {
            Ok(LoopEnd::Completed) => {
                admission.finish(state.clone(), None);
                log::info!("thread {}: run completed after {} steps", thread, visited.len());
                emit(&events, RunEvent::Completed).await;
                Ok(RunOutcome::Completed { state, visited })
            }
            Ok(LoopEnd::Suspended { step, payload }) => {
                let checkpoint = Checkpoint {
                    thread: thread.clone(),
                    state: state.clone(),
                    pending_step: step.clone(),
                    payload: payload.clone(),
                    created_at: chrono::Utc::now(),
                };
                admission.finish(state, Some(checkpoint));
                log::info!("thread {}: suspended at '{}'", thread, step);
                emit(&events, RunEvent::Suspended { step }).await;
                Ok(RunOutcome::Suspended { payload, visited })
            }
            Err(err) => {
                // Keep what the run wrote so far for diagnostics.
                admission.finish(state, None);
                log::error!("thread {}: run failed: {}", thread, err);
                emit(&events, RunEvent::Failed {
                    message: err.to_string(),
                })
                .await;
                Err(err)
            }
        }
    }

    async fn run_loop(
        &self,
        thread: &ThreadId,
        state: &mut WorkflowState,
        first_step: String,
        answer: &mut Option<Value>,
        visited: &mut Vec<String>,
        events: &Option<mpsc::Sender<RunEvent>>,
    ) -> Result<LoopEnd, FlowError> {
        let mut frontier: VecDeque<String> = VecDeque::new();
        frontier.push_back(first_step);
        let mut executed: u32 = 0;

        while let Some(name) = frontier.pop_front() {
            if executed >= self.step_budget {
                return Err(FlowError::StepBudgetExceeded {
                    limit: self.step_budget,
                });
            }
            executed += 1;

            let step = self
                .graph
                .step(&name)
                .ok_or_else(|| FlowError::InvalidRoutingTarget {
                    step: visited.last().cloned().unwrap_or_default(),
                    target: name.clone(),
                })?;

            log::debug!("thread {}: executing step '{}'", thread, name);
            emit(events, RunEvent::StepStarted { step: name.clone() }).await;

            // Only the first step of an invocation sees the resume answer.
            let taken = answer.take();
            let ctx = StepContext {
                state: &*state,
                thread,
                answer: taken.as_ref(),
            };
            let result = step.run(ctx).await.map_err(|source| FlowError::Step {
                step: name.clone(),
                source,
            })?;
            visited.push(name.clone());

            match result {
                StepResult::Update(update) => {
                    state.merge(update);
                    emit(events, RunEvent::StepCompleted { step: name.clone() }).await;

                    let next = self.graph.successors(&name);
                    if !next.is_empty() {
                        for target in next {
                            enqueue_unique(&mut frontier, target.clone());
                        }
                    } else if self.graph.is_terminal(&name) {
                        if frontier.is_empty() {
                            return Ok(LoopEnd::Completed);
                        }
                        // A fan-out branch finished early; drain the rest.
                    } else {
                        return Err(FlowError::NoSuccessor { step: name });
                    }
                }
                StepResult::Goto { update, next } => {
                    if next.is_empty() {
                        return Err(FlowError::NoSuccessor { step: name });
                    }
                    for target in &next {
                        if !self.graph.contains(target) {
                            return Err(FlowError::InvalidRoutingTarget {
                                step: name.clone(),
                                target: target.clone(),
                            });
                        }
                    }
                    state.merge(update);
                    emit(events, RunEvent::StepCompleted { step: name.clone() }).await;
                    for target in next {
                        enqueue_unique(&mut frontier, target);
                    }
                }
                StepResult::Suspend { payload } => {
                    if !frontier.is_empty() {
                        return Err(FlowError::SuspendDuringFanOut { step: name });
                    }
                    return Ok(LoopEnd::Suspended {
                        step: name,
                        payload,
                    });
                }
            }
        }

        Ok(LoopEnd::Completed)
    }
}

/// Appends a step to the frontier unless it is already queued, so a fan-out
/// join runs once per wave.
fn enqueue_unique(frontier: &mut VecDeque<String>, target: String) {
    if !frontier.contains(&target) {
        frontier.push_back(target);
    }
}

async fn emit(events: &Option<mpsc::Sender<RunEvent>>, event: RunEvent) {
    if let Some(tx) = events {
        let _ = tx.send(event).await;
    }
}
