use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::warn;

use super::{validate_children, validate_name, Action, ActionRegistry, ACTION_TYPE_ITERATOR};
use crate::context::{ExecutionContext, Status};
use crate::error::{InstinctError, Result};
use crate::expr::Program;
use crate::params::{child_config, optional_bool, required_str, Params};

/// Runs an inner action once per element of a list-valued expression,
/// binding each element to `item_var_name` in the context's variables.
#[derive(Debug, Clone)]
pub struct IteratorAction {
    name: String,
    program: Program,
    item_var_name: String,
    inner_action: Arc<dyn Action>,
    stop_on_error: bool,
}

impl IteratorAction {
    pub fn new(
        name: impl Into<String>,
        expression: &str,
        item_var_name: impl Into<String>,
        inner_action: Arc<dyn Action>,
        stop_on_error: bool,
    ) -> Result<Self> {
        let program = Program::compile(expression).map_err(|source| {
            InstinctError::InvalidExpression {
                expression: expression.to_string(),
                source,
            }
        })?;
        Ok(Self {
            name: name.into(),
            program,
            item_var_name: item_var_name.into(),
            inner_action,
            stop_on_error,
        })
    }

    pub fn from_params(params: &Params, registry: &ActionRegistry) -> Result<Self> {
        let name = required_str(params, "name", ACTION_TYPE_ITERATOR)?;
        let expression = required_str(params, "expression", ACTION_TYPE_ITERATOR)?;
        if expression.trim().is_empty() {
            return Err(InstinctError::Invalid(format!(
                "iterator action '{name}' has an empty expression"
            )));
        }
        let item_var_name = required_str(params, "item_var_name", ACTION_TYPE_ITERATOR)?;
        let stop_on_error =
            optional_bool(params, "stop_on_error", ACTION_TYPE_ITERATOR)?.unwrap_or(true);

        let inner_config = child_config(params, "inner_action", ACTION_TYPE_ITERATOR)?;
        let inner_action = registry
            .create(&inner_config)
            .map_err(|e| e.context(format!("iterator action '{name}': inner_action")))?;

        let action = Self::new(name, expression, item_var_name, inner_action, stop_on_error)?;
        action.validate()?;
        Ok(action)
    }

    pub fn stop_on_error(&self) -> bool {
        self.stop_on_error
    }

    fn items(&self, ctx: &ExecutionContext) -> Result<Vec<Value>> {
        let value = self
            .program
            .eval(&ctx.activation())
            .map_err(|source| InstinctError::Evaluation {
                expression: self.program.source().to_string(),
                source,
            })?;
        match value {
            Value::Array(items) => Ok(items),
            other => Err(InstinctError::ActionFailed {
                action: self.name.clone(),
                message: format!(
                    "expression '{}' must produce a list, got {other}",
                    self.program.source()
                ),
            }),
        }
    }
}

#[async_trait]
impl Action for IteratorAction {
    async fn execute(&self, ctx: &mut ExecutionContext) -> Result<()> {
        ctx.set_status(&self.name, Status::Running);

        let items = match self.items(ctx) {
            Ok(items) => items,
            Err(e) => {
                ctx.set_status(&self.name, Status::Failed);
                return Err(e);
            }
        };

        let shadowed = ctx.variable(&self.item_var_name).cloned();
        let mut errors = Vec::new();

        for (index, item) in items.into_iter().enumerate() {
            let key = ExecutionContext::iteration_key(&self.name, index);
            ctx.set_status(&key, Status::Running);
            ctx.set_variable(self.item_var_name.clone(), item);

            match self.inner_action.execute(ctx).await {
                Ok(()) => ctx.set_status(&key, Status::Completed),
                Err(e) => {
                    warn!(action = %self.name, index, error = %e, "iteration failed");
                    ctx.set_status(&key, Status::Failed);
                    errors.push(e.context(format!("iteration {index}")));
                    if self.stop_on_error {
                        break;
                    }
                }
            }
        }

        match shadowed {
            Some(previous) => {
                ctx.set_variable(self.item_var_name.clone(), previous);
            }
            None => {
                ctx.remove_variable(&self.item_var_name);
            }
        }

        if errors.is_empty() {
            ctx.set_status(&self.name, Status::Completed);
            return Ok(());
        }

        ctx.set_status(&self.name, Status::Failed);
        Err(InstinctError::IteratorFailed {
            action: self.name.clone(),
            count: errors.len(),
            errors,
        })
    }

    fn action_type(&self) -> &str {
        ACTION_TYPE_ITERATOR
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn validate(&self) -> Result<()> {
        validate_name(ACTION_TYPE_ITERATOR, &self.name)?;
        if self.program.source().trim().is_empty() {
            return Err(InstinctError::Invalid(format!(
                "iterator action '{}' has an empty expression",
                self.name
            )));
        }
        if self.item_var_name.trim().is_empty() {
            return Err(InstinctError::Invalid(format!(
                "iterator action '{}' has no item_var_name set",
                self.name
            )));
        }
        validate_children(ACTION_TYPE_ITERATOR, &self.name, self.children())
    }

    fn children(&self) -> Vec<&dyn Action> {
        vec![self.inner_action.as_ref()]
    }
}
