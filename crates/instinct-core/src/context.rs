use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::expr::Activation;
use crate::params::Params;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    Running,
    Completed,
    Failed,
}

/// Per-event state threaded through a reflex's action tree.
///
/// The event is shared read-only between every fork of a context; variables
/// and the status ledger are owned by whichever task is executing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionContext {
    pub event: Arc<Params>,
    #[serde(default)]
    pub variables: Params,
    #[serde(default)]
    pub execution_status: BTreeMap<String, Status>,
}

impl ExecutionContext {
    pub fn new(event: Params) -> Self {
        Self {
            event: Arc::new(event),
            variables: Params::new(),
            execution_status: BTreeMap::new(),
        }
    }

    pub fn with_variable(mut self, name: impl Into<String>, value: Value) -> Self {
        self.variables.insert(name.into(), value);
        self
    }

    pub fn variable(&self, name: &str) -> Option<&Value> {
        self.variables.get(name)
    }

    pub fn set_variable(&mut self, name: impl Into<String>, value: Value) -> Option<Value> {
        self.variables.insert(name.into(), value)
    }

    pub fn remove_variable(&mut self, name: &str) -> Option<Value> {
        self.variables.remove(name)
    }

    pub fn set_status(&mut self, node: &str, status: Status) {
        debug!(node, ?status, "status transition");
        self.execution_status.insert(node.to_string(), status);
    }

    pub fn status(&self, node: &str) -> Option<Status> {
        self.execution_status.get(node).copied()
    }

    /// A copy for a concurrent branch: same event, a snapshot of the
    /// variables, and an empty ledger so only the branch's own entries merge
    /// back.
    pub fn fork(&self) -> Self {
        Self {
            event: Arc::clone(&self.event),
            variables: self.variables.clone(),
            execution_status: BTreeMap::new(),
        }
    }

    /// Fold a finished fork back in. `base` is the variable map the fork was
    /// taken from: only variables the fork inserted, changed or removed
    /// relative to it are applied, so an untouched snapshot never overwrites
    /// a sibling's write.
    pub fn merge(&mut self, fork: ExecutionContext, base: &Params) {
        for name in base.keys() {
            if !fork.variables.contains_key(name) {
                self.variables.remove(name);
            }
        }
        for (name, value) in fork.variables {
            if base.get(&name) != Some(&value) {
                self.variables.insert(name, value);
            }
        }
        self.execution_status.extend(fork.execution_status);
    }

    pub fn activation(&self) -> Activation<'_> {
        Activation::new()
            .bind_map("event", &self.event)
            .bind_map("variables", &self.variables)
    }

    pub fn iteration_key(name: &str, index: usize) -> String {
        format!("{name}:iteration {index}")
    }
}
