// SPDX-License-Identifier: MIT

//! Workflow state: an open field map scoped to one thread.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;

/// Caller-chosen key scoping one run's state and checkpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ThreadId(String);

impl ThreadId {
    pub fn new(id: impl Into<String>) -> Self {
        ThreadId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ThreadId {
    fn from(id: &str) -> Self {
        ThreadId(id.to_string())
    }
}

impl From<String> for ThreadId {
    fn from(id: String) -> Self {
        ThreadId(id)
    }
}

/// A partial update produced by one step and merged by the executor.
pub type StateUpdate = HashMap<String, Value>;

/// Builds a one-field update, the common case for linear steps.
pub fn field(key: &str, value: Value) -> StateUpdate {
    HashMap::from([(key.to_string(), value)])
}

/// Mutable state of one workflow run.
///
/// Fields are only ever added or overwritten, never removed, so anything a
/// step writes stays visible to every later step on the thread, including
/// across a suspend/resume cycle.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowState {
    fields: HashMap<String, Value>,
}

impl WorkflowState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a state from an initial set of caller-supplied fields.
    pub fn from_update(update: StateUpdate) -> Self {
        WorkflowState { fields: update }
    }

    /// Applies a partial update; colliding keys take the incoming value.
    pub fn merge(&mut self, update: StateUpdate) {
        for (key, value) in update {
            self.fields.insert(key, value);
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// The field as a string slice, if present and a JSON string.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(Value::as_str)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.fields.keys()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// The whole state as a JSON object, for logging and API responses.
    pub fn to_json(&self) -> Value {
        Value::Object(
            self.fields
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        )
    }
}
