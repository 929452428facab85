// SPDX-License-Identifier: MIT

//! Generic workflow engine: graph definition, step contract, per-thread
//! state with checkpoints, and a resumable executor.

pub mod error;
pub mod executor;
pub mod graph;
pub mod state;
pub mod step;
pub mod store;

pub use error::{FlowError, GraphError, StepError};
pub use executor::{Executor, RunEvent, RunOutcome};
pub use graph::{Graph, GraphBuilder};
pub use state::{field, StateUpdate, ThreadId, WorkflowState};
pub use step::{Step, StepContext, StepResult};
pub use store::{Checkpoint, StateStore};
