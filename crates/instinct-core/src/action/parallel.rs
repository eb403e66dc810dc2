use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use tracing::warn;

use super::{
    create_children, validate_children, validate_name, Action, ActionRegistry,
    ACTION_TYPE_PARALLEL,
};
use crate::context::{ExecutionContext, Status};
use crate::error::{InstinctError, Result};
use crate::params::{child_configs, required_str, Params};

/// Runs every child concurrently, each on its own fork of the context, and
/// waits for all of them.
///
/// Forks are merged back in declaration order once every child has finished.
/// Only the variables a child changed are applied, so when two children write
/// the same variable the later-declared one wins and a child that left it
/// alone does not undo either write.
#[derive(Debug, Clone)]
pub struct ParallelAction {
    name: String,
    children: Vec<Arc<dyn Action>>,
}

impl ParallelAction {
    pub fn new(name: impl Into<String>, children: Vec<Arc<dyn Action>>) -> Self {
        Self {
            name: name.into(),
            children,
        }
    }

    pub fn from_params(params: &Params, registry: &ActionRegistry) -> Result<Self> {
        let name = required_str(params, "name", ACTION_TYPE_PARALLEL)?;
        let configs = child_configs(params, "children", ACTION_TYPE_PARALLEL)?;
        let children = create_children(registry, &configs, |i| {
            format!("parallel action '{name}': child {i}")
        })?;

        let action = Self::new(name, children);
        action.validate()?;
        Ok(action)
    }
}

#[async_trait]
impl Action for ParallelAction {
    async fn execute(&self, ctx: &mut ExecutionContext) -> Result<()> {
        ctx.set_status(&self.name, Status::Running);

        let base = ctx.variables.clone();
        let handles = self.children.iter().map(|child| {
            let child = Arc::clone(child);
            let mut fork = ctx.fork();
            tokio::spawn(async move {
                let result = child.execute(&mut fork).await;
                (fork, result)
            })
        });
        let joined = join_all(handles).await;

        let mut errors = Vec::new();
        for (child, outcome) in self.children.iter().zip(joined) {
            match outcome {
                Ok((fork, result)) => {
                    ctx.merge(fork, &base);
                    if let Err(e) = result {
                        warn!(action = %self.name, child = child.name(), error = %e, "child failed");
                        errors.push(e);
                    }
                }
                Err(join_error) => {
                    warn!(action = %self.name, child = child.name(), error = %join_error, "child task aborted");
                    ctx.set_status(child.name(), Status::Failed);
                    errors.push(InstinctError::ActionFailed {
                        action: child.name().to_string(),
                        message: format!("task did not complete: {join_error}"),
                    });
                }
            }
        }

        if errors.is_empty() {
            ctx.set_status(&self.name, Status::Completed);
            return Ok(());
        }

        ctx.set_status(&self.name, Status::Failed);
        Err(InstinctError::ParallelFailed {
            action: self.name.clone(),
            count: errors.len(),
            errors,
        })
    }

    fn action_type(&self) -> &str {
        ACTION_TYPE_PARALLEL
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn validate(&self) -> Result<()> {
        validate_name(ACTION_TYPE_PARALLEL, &self.name)?;
        if self.children.is_empty() {
            return Err(InstinctError::Invalid(format!(
                "parallel action '{}' has no children",
                self.name
            )));
        }
        validate_children(ACTION_TYPE_PARALLEL, &self.name, self.children())
    }

    fn children(&self) -> Vec<&dyn Action> {
        self.children.iter().map(|c| c.as_ref()).collect()
    }
}
