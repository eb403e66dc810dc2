use serde_json::Value;
use tracing::debug;

use super::{Rule, RuleRegistry};
use crate::context::ExecutionContext;
use crate::error::{InstinctError, Result};
use crate::expr::Program;
use crate::params::{required_str, Params};

pub const RULE_TYPE_CEL: &str = "cel";

/// Matches when an expression over `event` and `variables` evaluates to
/// `true`.
#[derive(Debug, Clone)]
pub struct ExpressionRule {
    program: Program,
}

impl ExpressionRule {
    pub fn new(expression: &str) -> Result<Self> {
        if expression.trim().is_empty() {
            return Err(InstinctError::invalid_config(
                RULE_TYPE_CEL,
                "expression cannot be empty",
            ));
        }
        let program = Program::compile(expression).map_err(|source| {
            InstinctError::InvalidExpression {
                expression: expression.to_string(),
                source,
            }
        })?;
        Ok(Self { program })
    }

    pub fn from_params(params: &Params, _registry: &RuleRegistry) -> Result<Self> {
        Self::new(required_str(params, "expression", RULE_TYPE_CEL)?)
    }

    pub fn expression(&self) -> &str {
        self.program.source()
    }
}

impl Rule for ExpressionRule {
    fn matches(&self, ctx: &ExecutionContext) -> Result<bool> {
        match self.evaluate(ctx) {
            Ok(matched) => Ok(matched),
            Err(e) => {
                debug!(expression = self.expression(), error = %e, "evaluation failed, no match");
                Ok(false)
            }
        }
    }

    /// Absent data and non-boolean results are still `false` here; any other
    /// evaluation failure is returned.
    fn evaluate(&self, ctx: &ExecutionContext) -> Result<bool> {
        match self.program.eval(&ctx.activation()) {
            Ok(Value::Bool(matched)) => Ok(matched),
            Ok(other) => {
                debug!(
                    expression = self.expression(),
                    result = %other,
                    "expression did not produce a boolean, treating as no match"
                );
                Ok(false)
            }
            Err(e) if e.is_absent() => {
                debug!(expression = self.expression(), error = %e, "no match");
                Ok(false)
            }
            Err(source) => Err(InstinctError::Evaluation {
                expression: self.expression().to_string(),
                source,
            }),
        }
    }

    fn rule_type(&self) -> &str {
        RULE_TYPE_CEL
    }
}
