//! Response actions: leaves, composites, and the registry that builds them
//! from `{type, params}` configuration.

mod conditional;
mod iterator;
mod parallel;
mod plugin;
mod print;
mod registry;
mod sequential;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

pub use conditional::ConditionalAction;
pub use iterator::IteratorAction;
pub use parallel::ParallelAction;
pub use plugin::PluginProxy;
pub use print::PrintAction;
pub use registry::{ActionFactory, ActionRegistry};
pub use sequential::SequentialAction;

use crate::context::ExecutionContext;
use crate::error::{join_errors, InstinctError, Result};
use crate::params::ActionConfig;

pub const ACTION_TYPE_PRINT: &str = "print";
pub const ACTION_TYPE_SEQUENTIAL: &str = "sequential";
pub const ACTION_TYPE_PARALLEL: &str = "parallel";
pub const ACTION_TYPE_CONDITIONAL: &str = "conditional";
pub const ACTION_TYPE_ITERATOR: &str = "iterator";

/// A unit of response.
///
/// `name` keys the action's entry in the execution-status ledger and should
/// be unique within one reflex. Composites own their children and expose
/// them through [`Action::children`] for validation and inspection.
#[async_trait]
pub trait Action: Send + Sync + fmt::Debug {
    async fn execute(&self, ctx: &mut ExecutionContext) -> Result<()>;

    fn action_type(&self) -> &str;

    fn name(&self) -> &str;

    fn validate(&self) -> Result<()>;

    fn children(&self) -> Vec<&dyn Action> {
        Vec::new()
    }
}

/// Every node name in the tree rooted at `action`, in pre-order.
pub fn node_names(action: &dyn Action) -> Vec<String> {
    let mut names = vec![action.name().to_string()];
    for child in action.children() {
        names.extend(node_names(child));
    }
    names
}

pub(crate) fn validate_name(kind: &str, name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(InstinctError::Invalid(format!("{kind} action has an empty name")));
    }
    Ok(())
}

/// Build every child config. Each failure is wrapped with `label(i)` and all
/// of them are returned together.
pub(crate) fn create_children(
    registry: &ActionRegistry,
    configs: &[ActionConfig],
    label: impl Fn(usize) -> String,
) -> Result<Vec<Arc<dyn Action>>> {
    let mut children = Vec::with_capacity(configs.len());
    let mut errors = Vec::new();
    for (i, config) in configs.iter().enumerate() {
        match registry.create(config) {
            Ok(child) => children.push(child),
            Err(e) => errors.push(e.context(label(i))),
        }
    }
    InstinctError::collect(errors)?;
    Ok(children)
}

/// Validate every child and report all failures together.
pub(crate) fn validate_children<'a>(
    kind: &str,
    name: &str,
    children: impl IntoIterator<Item = &'a dyn Action>,
) -> Result<()> {
    let errors: Vec<InstinctError> = children
        .into_iter()
        .filter_map(|child| child.validate().err())
        .collect();
    if errors.is_empty() {
        return Ok(());
    }
    Err(InstinctError::Invalid(format!(
        "{kind} action '{name}' has invalid children: {}",
        join_errors(&errors)
    )))
}
