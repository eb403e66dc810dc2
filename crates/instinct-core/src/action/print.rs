use async_trait::async_trait;
use tracing::info;

use super::{validate_name, Action, ACTION_TYPE_PRINT};
use crate::context::{ExecutionContext, Status};
use crate::error::{InstinctError, Result};
use crate::params::{required_str, Params};

/// Writes a fixed message to stdout. Never fails at run time.
#[derive(Debug, Clone)]
pub struct PrintAction {
    name: String,
    message: String,
}

impl PrintAction {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
        }
    }

    pub fn from_params(params: &Params) -> Result<Self> {
        let action = Self::new(
            required_str(params, "name", ACTION_TYPE_PRINT)?,
            required_str(params, "message", ACTION_TYPE_PRINT)?,
        );
        action.validate()?;
        Ok(action)
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

#[async_trait]
impl Action for PrintAction {
    async fn execute(&self, ctx: &mut ExecutionContext) -> Result<()> {
        ctx.set_status(&self.name, Status::Running);
        info!(action = %self.name, "print");
        println!("{}", self.message);
        ctx.set_status(&self.name, Status::Completed);
        Ok(())
    }

    fn action_type(&self) -> &str {
        ACTION_TYPE_PRINT
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn validate(&self) -> Result<()> {
        validate_name(ACTION_TYPE_PRINT, &self.name)?;
        if self.message.is_empty() {
            return Err(InstinctError::Invalid(format!(
                "print action '{}' has an empty message",
                self.name
            )));
        }
        Ok(())
    }
}
