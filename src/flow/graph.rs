// SPDX-License-Identifier: MIT

//! Graph definition: named steps, static edges, and a frozen executable form.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use crate::flow::error::GraphError;
use crate::flow::step::Step;

/// Mutable registry of steps and static edges.
///
/// `freeze` validates the definition and produces an immutable [`Graph`].
/// After a successful freeze the builder refuses further mutation.
#[derive(Default)]
pub struct GraphBuilder {
    steps: HashMap<String, Arc<dyn Step>>,
    edges: HashMap<String, Vec<String>>,
    order: Vec<String>,
    entry: Option<String>,
    terminal: HashSet<String>,
    frozen: bool,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a step under its own name.
    pub fn register(&mut self, step: impl Step + 'static) -> Result<(), GraphError> {
        self.ensure_open()?;
        let name = step.name().to_string();
        if self.steps.contains_key(&name) {
            return Err(GraphError::DuplicateStep { name });
        }
        self.edges.insert(name.clone(), Vec::new());
        self.order.push(name.clone());
        self.steps.insert(name, Arc::new(step));
        Ok(())
    }

    /// Adds a static edge between two registered steps. Edges out of one
    /// step keep their insertion order.
    pub fn connect(&mut self, from: &str, to: &str) -> Result<(), GraphError> {
        self.ensure_open()?;
        if !self.steps.contains_key(from) {
            return Err(GraphError::UnknownStep {
                name: from.to_string(),
            });
        }
        if !self.steps.contains_key(to) {
            return Err(GraphError::UnknownStep {
                name: to.to_string(),
            });
        }
        if let Some(targets) = self.edges.get_mut(from) {
            targets.push(to.to_string());
        }
        Ok(())
    }

    pub fn set_entry(&mut self, name: &str) -> Result<(), GraphError> {
        self.ensure_open()?;
        if !self.steps.contains_key(name) {
            return Err(GraphError::UnknownStep {
                name: name.to_string(),
            });
        }
        self.entry = Some(name.to_string());
        Ok(())
    }

    /// Declares a step as a successful end of the run.
    pub fn set_terminal(&mut self, name: &str) -> Result<(), GraphError> {
        self.ensure_open()?;
        if !self.steps.contains_key(name) {
            return Err(GraphError::UnknownStep {
                name: name.to_string(),
            });
        }
        self.terminal.insert(name.to_string());
        Ok(())
    }

    /// Validates the definition and produces the immutable graph.
    ///
    /// Checks that an entry is set, that no terminal step has outgoing
    /// edges, and that every step could let a run leave it again: at least
    /// one static edge, or declared terminal, or routing. Steps that static
    /// edges cannot reach are assumed to be routing targets and only logged.
    pub fn freeze(&mut self) -> Result<Graph, GraphError> {
        self.ensure_open()?;
        let entry = self.entry.clone().ok_or(GraphError::NoEntry)?;

        for name in &self.order {
            let has_edges = self.edges.get(name).is_some_and(|e| !e.is_empty());
            if self.terminal.contains(name) {
                if has_edges {
                    return Err(GraphError::TerminalHasEdges { name: name.clone() });
                }
                continue;
            }
            let routing = self.steps.get(name).is_some_and(|s| s.is_routing());
            if !has_edges && !routing {
                return Err(GraphError::DeadEnd { name: name.clone() });
            }
        }

        let mut reachable = HashSet::new();
        let mut queue = VecDeque::from([entry.clone()]);
        while let Some(name) = queue.pop_front() {
            if !reachable.insert(name.clone()) {
                continue;
            }
            if let Some(targets) = self.edges.get(&name) {
                for target in targets {
                    queue.push_back(target.clone());
                }
            }
        }
        for name in &self.order {
            if !reachable.contains(name) {
                log::debug!(
                    "step '{}' is not reachable over static edges; expecting it as a routing target",
                    name
                );
            }
        }

        self.frozen = true;
        Ok(Graph {
            steps: self.steps.clone(),
            edges: self.edges.clone(),
            order: self.order.clone(),
            entry,
            terminal: self.terminal.clone(),
        })
    }

    fn ensure_open(&self) -> Result<(), GraphError> {
        if self.frozen {
            Err(GraphError::Frozen)
        } else {
            Ok(())
        }
    }
}

/// Immutable, validated graph shared by executors.
#[derive(Clone)]
pub struct Graph {
    steps: HashMap<String, Arc<dyn Step>>,
    edges: HashMap<String, Vec<String>>,
    order: Vec<String>,
    entry: String,
    terminal: HashSet<String>,
}

impl std::fmt::Debug for Graph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // `dyn Step` is not `Debug`; the step names stand in for the map.
        f.debug_struct("Graph")
            .field("steps", &self.order)
            .field("edges", &self.edges)
            .field("entry", &self.entry)
            .field("terminal", &self.terminal)
            .finish()
    }
}

impl Graph {
    pub fn entry(&self) -> &str {
        &self.entry
    }

    pub fn step(&self, name: &str) -> Option<Arc<dyn Step>> {
        self.steps.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.steps.contains_key(name)
    }

    /// Static successors of a step, in the order the edges were added.
    pub fn successors(&self, name: &str) -> &[String] {
        self.edges.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn is_terminal(&self, name: &str) -> bool {
        self.terminal.contains(name)
    }

    pub fn step_count(&self) -> usize {
        self.steps.len()
    }

    /// Step names in registration order.
    pub fn step_names(&self) -> &[String] {
        &self.order
    }
}
