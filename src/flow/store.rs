// SPDX-License-Identifier: MIT

//! Thread-keyed persistence: workflow state plus at most one checkpoint.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::flow::error::FlowError;
use crate::flow::state::{ThreadId, WorkflowState};

/// Durable record of a suspended run.
///
/// One per thread at most. It is consumed by the resume that picks it up, so
/// a checkpoint can never be re-entered twice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub thread: ThreadId,
    pub state: WorkflowState,
    /// Step to re-enter on resume.
    pub pending_step: String,
    /// Opaque payload handed back to the caller at suspension.
    pub payload: Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct ThreadSlot {
    state: WorkflowState,
    checkpoint: Option<Checkpoint>,
    busy: bool,
}

/// In-memory store for per-thread state and checkpoints.
///
/// Cloning shares the underlying map. A busy flag per slot serializes runs:
/// admission marks the thread and hands back an [`Admission`], settling or
/// dropping it releases the thread, and any second caller in between gets
/// [`FlowError::ThreadBusy`].
#[derive(Clone, Default)]
pub struct StateStore {
    threads: Arc<Mutex<HashMap<ThreadId, ThreadSlot>>>,
}

impl StateStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<ThreadId, ThreadSlot>> {
        self.threads.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn admission(&self, thread: &ThreadId) -> Admission {
        Admission {
            threads: Arc::clone(&self.threads),
            thread: thread.clone(),
            settled: false,
        }
    }

    /// Admits a fresh run, returning the state it starts from and the
    /// invocation's hold on the thread.
    ///
    /// Rejected while another run is active or while an unconsumed
    /// checkpoint is pending on the thread.
    pub(crate) async fn begin_run(
        &self,
        thread: &ThreadId,
    ) -> Result<(WorkflowState, Admission), FlowError> {
        let mut threads = self.slots();
        let slot = threads.entry(thread.clone()).or_default();
        if slot.busy {
            return Err(FlowError::ThreadBusy {
                thread: thread.to_string(),
            });
        }
        if slot.checkpoint.is_some() {
            return Err(FlowError::PendingSuspension {
                thread: thread.to_string(),
            });
        }
        slot.busy = true;
        let state = slot.state.clone();
        Ok((state, self.admission(thread)))
    }

    /// Admits a resume, consuming the thread's checkpoint.
    pub(crate) async fn begin_resume(
        &self,
        thread: &ThreadId,
    ) -> Result<(Checkpoint, Admission), FlowError> {
        let mut threads = self.slots();
        let slot = match threads.get_mut(thread) {
            Some(slot) => slot,
            None => {
                return Err(FlowError::NoSuchCheckpoint {
                    thread: thread.to_string(),
                })
            }
        };
        if slot.busy {
            return Err(FlowError::ThreadBusy {
                thread: thread.to_string(),
            });
        }
        let checkpoint = slot
            .checkpoint
            .take()
            .ok_or_else(|| FlowError::NoSuchCheckpoint {
                thread: thread.to_string(),
            })?;
        slot.busy = true;
        Ok((checkpoint, self.admission(thread)))
    }

    /// Snapshot of the thread's state, if the thread exists.
    pub async fn state(&self, thread: &ThreadId) -> Option<WorkflowState> {
        self.slots().get(thread).map(|slot| slot.state.clone())
    }

    /// The thread's pending checkpoint, if it is suspended.
    pub async fn checkpoint(&self, thread: &ThreadId) -> Option<Checkpoint> {
        self.slots().get(thread).and_then(|slot| slot.checkpoint.clone())
    }

    /// Drops the thread's state and checkpoint. Refused while a run is
    /// active on it. Returns whether the thread existed.
    pub async fn purge(&self, thread: &ThreadId) -> Result<bool, FlowError> {
        let mut threads = self.slots();
        if let Some(slot) = threads.get(thread) {
            if slot.busy {
                return Err(FlowError::ThreadBusy {
                    thread: thread.to_string(),
                });
            }
        }
        Ok(threads.remove(thread).is_some())
    }
}

/// One invocation's hold on its thread, taken at admission.
///
/// [`Admission::finish`] writes the outcome back and releases the thread.
/// Dropping it unfinished only clears the busy flag: a run future that is
/// dropped mid-flight leaves the thread usable and writes nothing back.
#[derive(Debug)]
pub(crate) struct Admission {
    threads: Arc<Mutex<HashMap<ThreadId, ThreadSlot>>>,
    thread: ThreadId,
    settled: bool,
}

impl Admission {
    /// Writes the run's outcome back and releases the thread.
    ///
    /// `checkpoint` is `Some` only when the run suspended; completion and
    /// failure both leave the thread without one.
    pub(crate) fn finish(mut self, state: WorkflowState, checkpoint: Option<Checkpoint>) {
        self.settled = true;
        let mut threads = self.threads.lock().unwrap_or_else(PoisonError::into_inner);
        let slot = threads.entry(self.thread.clone()).or_default();
        slot.state = state;
        slot.checkpoint = checkpoint;
        slot.busy = false;
    }
}

impl Drop for Admission {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        let mut threads = self.threads.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(slot) = threads.get_mut(&self.thread) {
            slot.busy = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::state::field;
    use serde_json::json;

    fn checkpoint_for(thread: &ThreadId, step: &str) -> Checkpoint {
        Checkpoint {
            thread: thread.clone(),
            state: WorkflowState::from_update(field("k", json!("v"))),
            pending_step: step.to_string(),
            payload: json!({"question": "approve?"}),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_begin_run_rejects_busy_thread() {
        let store = StateStore::new();
        let thread = ThreadId::new("t1");

        let (_, admission) = store.begin_run(&thread).await.unwrap();
        let err = store.begin_run(&thread).await.unwrap_err();
        assert!(matches!(err, FlowError::ThreadBusy { .. }));

        admission.finish(WorkflowState::new(), None);
        store.begin_run(&thread).await.unwrap();
    }

    #[tokio::test]
    async fn test_begin_run_rejects_pending_suspension() {
        let store = StateStore::new();
        let thread = ThreadId::new("t1");

        let (_, admission) = store.begin_run(&thread).await.unwrap();
        let cp = checkpoint_for(&thread, "wait");
        admission.finish(cp.state.clone(), Some(cp));

        let err = store.begin_run(&thread).await.unwrap_err();
        assert!(matches!(err, FlowError::PendingSuspension { .. }));
    }

    #[tokio::test]
    async fn test_checkpoint_is_single_use() {
        let store = StateStore::new();
        let thread = ThreadId::new("t1");

        let (_, admission) = store.begin_run(&thread).await.unwrap();
        let cp = checkpoint_for(&thread, "wait");
        admission.finish(cp.state.clone(), Some(cp));

        let (consumed, admission) = store.begin_resume(&thread).await.unwrap();
        assert_eq!(consumed.pending_step, "wait");
        admission.finish(consumed.state, None);

        let err = store.begin_resume(&thread).await.unwrap_err();
        assert!(matches!(err, FlowError::NoSuchCheckpoint { .. }));
    }

    #[tokio::test]
    async fn test_begin_resume_unknown_thread() {
        let store = StateStore::new();
        let err = store.begin_resume(&ThreadId::new("ghost")).await.unwrap_err();
        assert!(matches!(err, FlowError::NoSuchCheckpoint { .. }));
    }

    #[tokio::test]
    async fn test_state_survives_completion() {
        let store = StateStore::new();
        let thread = ThreadId::new("t1");

        let (_, admission) = store.begin_run(&thread).await.unwrap();
        admission.finish(
            WorkflowState::from_update(field("draft_response", json!("hello"))),
            None,
        );

        let state = store.state(&thread).await.unwrap();
        assert_eq!(state.get_str("draft_response"), Some("hello"));
        assert!(store.checkpoint(&thread).await.is_none());
    }

    #[tokio::test]
    async fn test_dropped_admission_releases_thread() {
        let store = StateStore::new();
        let thread = ThreadId::new("t1");

        let (_, admission) = store.begin_run(&thread).await.unwrap();
        drop(admission);

        // Nothing was written back, but the thread is free again.
        store.begin_run(&thread).await.unwrap();
    }

    #[tokio::test]
    async fn test_dropped_resume_admission_keeps_checkpoint_consumed() {
        let store = StateStore::new();
        let thread = ThreadId::new("t1");

        let (_, admission) = store.begin_run(&thread).await.unwrap();
        let cp = checkpoint_for(&thread, "wait");
        admission.finish(cp.state.clone(), Some(cp));

        let (_, admission) = store.begin_resume(&thread).await.unwrap();
        drop(admission);

        // The checkpoint went with the admission; the thread takes fresh runs.
        assert!(store.checkpoint(&thread).await.is_none());
        store.begin_run(&thread).await.unwrap();
    }

    #[tokio::test]
    async fn test_purge_removes_thread_but_not_while_busy() {
        let store = StateStore::new();
        let thread = ThreadId::new("t1");

        let (_, admission) = store.begin_run(&thread).await.unwrap();
        let err = store.purge(&thread).await.unwrap_err();
        assert!(matches!(err, FlowError::ThreadBusy { .. }));

        admission.finish(WorkflowState::new(), None);
        assert!(store.purge(&thread).await.unwrap());
        assert!(!store.purge(&thread).await.unwrap());
        assert!(store.state(&thread).await.is_none());
    }

    #[tokio::test]
    async fn test_clones_share_threads() {
        let store = StateStore::new();
        let alias = store.clone();
        let thread = ThreadId::new("t1");

        let (_state, _admission) = store.begin_run(&thread).await.unwrap();
        let err = alias.begin_run(&thread).await.unwrap_err();
        assert!(matches!(err, FlowError::ThreadBusy { .. }));
    }

    #[test]
    fn test_checkpoint_serializes_round_trip() {
        let thread = ThreadId::new("t1");
        let cp = checkpoint_for(&thread, "human_intervention");
        let json = serde_json::to_string(&cp).unwrap();
        let back: Checkpoint = serde_json::from_str(&json).unwrap();
        assert_eq!(back.pending_step, "human_intervention");
        assert_eq!(back.payload["question"], "approve?");
        assert_eq!(back.thread, thread);
    }
}
