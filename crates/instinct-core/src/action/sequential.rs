use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use super::{
    create_children, validate_children, validate_name, Action, ActionRegistry,
    ACTION_TYPE_SEQUENTIAL,
};
use crate::context::{ExecutionContext, Status};
use crate::error::{InstinctError, Result};
use crate::params::{child_configs, required_str, Params};

/// Runs children one after another and stops at the first failure.
#[derive(Debug, Clone)]
pub struct SequentialAction {
    name: String,
    children: Vec<Arc<dyn Action>>,
}

impl SequentialAction {
    pub fn new(name: impl Into<String>, children: Vec<Arc<dyn Action>>) -> Self {
        Self {
            name: name.into(),
            children,
        }
    }

    pub fn from_params(params: &Params, registry: &ActionRegistry) -> Result<Self> {
        let name = required_str(params, "name", ACTION_TYPE_SEQUENTIAL)?;
        let configs = child_configs(params, "children", ACTION_TYPE_SEQUENTIAL)?;
        let children = create_children(registry, &configs, |i| {
            format!("sequential action '{name}': child {i}")
        })?;

        let action = Self::new(name, children);
        action.validate()?;
        Ok(action)
    }
}

#[async_trait]
impl Action for SequentialAction {
    async fn execute(&self, ctx: &mut ExecutionContext) -> Result<()> {
        ctx.set_status(&self.name, Status::Running);

        for child in &self.children {
            if let Err(e) = child.execute(ctx).await {
                warn!(action = %self.name, child = child.name(), error = %e, "child failed, stopping");
                ctx.set_status(&self.name, Status::Failed);
                return Err(e.context(format!("sequential action '{}'", self.name)));
            }
        }

        ctx.set_status(&self.name, Status::Completed);
        Ok(())
    }

    fn action_type(&self) -> &str {
        ACTION_TYPE_SEQUENTIAL
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn validate(&self) -> Result<()> {
        validate_name(ACTION_TYPE_SEQUENTIAL, &self.name)?;
        if self.children.is_empty() {
            return Err(InstinctError::Invalid(format!(
                "sequential action '{}' has no children",
                self.name
            )));
        }
        validate_children(ACTION_TYPE_SEQUENTIAL, &self.name, self.children())
    }

    fn children(&self) -> Vec<&dyn Action> {
        self.children.iter().map(|c| c.as_ref()).collect()
    }
}
