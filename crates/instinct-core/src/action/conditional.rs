use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::{validate_children, validate_name, Action, ActionRegistry, ACTION_TYPE_CONDITIONAL};
use crate::context::{ExecutionContext, Status};
use crate::error::{InstinctError, Result};
use crate::params::{
    child_config, config_from_value, optional_child_config, required_str, Params, RuleConfig,
};
use crate::rule::Rule;

/// Runs `then` when the rule matches and `else` (if any) otherwise.
#[derive(Debug, Clone)]
pub struct ConditionalAction {
    name: String,
    rule: Arc<dyn Rule>,
    then_action: Arc<dyn Action>,
    else_action: Option<Arc<dyn Action>>,
}

impl ConditionalAction {
    pub fn new(
        name: impl Into<String>,
        rule: Arc<dyn Rule>,
        then_action: Arc<dyn Action>,
        else_action: Option<Arc<dyn Action>>,
    ) -> Self {
        Self {
            name: name.into(),
            rule,
            then_action,
            else_action,
        }
    }

    pub fn from_params(params: &Params, registry: &ActionRegistry) -> Result<Self> {
        let name = required_str(params, "name", ACTION_TYPE_CONDITIONAL)?;

        let mut errors = Vec::new();

        let rule = params
            .get("rule_config")
            .ok_or_else(|| {
                InstinctError::invalid_config(
                    ACTION_TYPE_CONDITIONAL,
                    "missing required parameter 'rule_config'",
                )
            })
            .and_then(|value| {
                config_from_value::<RuleConfig>(value, ACTION_TYPE_CONDITIONAL, "rule_config")
            })
            .and_then(|config| {
                registry
                    .rules()
                    .create(&config)
                    .map_err(|e| e.context(format!("conditional action '{name}': rule_config")))
            })
            .map_err(|e| errors.push(e))
            .ok();

        let then_action = child_config(params, "then_action", ACTION_TYPE_CONDITIONAL)
            .and_then(|config| {
                registry
                    .create(&config)
                    .map_err(|e| e.context(format!("conditional action '{name}': then_action")))
            })
            .map_err(|e| errors.push(e))
            .ok();

        let else_action = optional_child_config(params, "else_action", ACTION_TYPE_CONDITIONAL)
            .and_then(|config| {
                config
                    .map(|config| {
                        registry.create(&config).map_err(|e| {
                            e.context(format!("conditional action '{name}': else_action"))
                        })
                    })
                    .transpose()
            })
            .map_err(|e| errors.push(e))
            .ok()
            .flatten();

        InstinctError::collect(errors)?;
        let (Some(rule), Some(then_action)) = (rule, then_action) else {
            return Err(InstinctError::invalid_config(
                ACTION_TYPE_CONDITIONAL,
                "incomplete configuration",
            ));
        };

        let action = Self::new(name, rule, then_action, else_action);
        action.validate()?;
        Ok(action)
    }
}

#[async_trait]
impl Action for ConditionalAction {
    async fn execute(&self, ctx: &mut ExecutionContext) -> Result<()> {
        ctx.set_status(&self.name, Status::Running);

        let matched = match self.rule.evaluate(ctx) {
            Ok(matched) => matched,
            Err(e) => {
                warn!(action = %self.name, error = %e, "condition could not be evaluated");
                ctx.set_status(&self.name, Status::Failed);
                return Err(e.context(format!(
                    "conditional action '{}': failed to evaluate condition",
                    self.name
                )));
            }
        };

        let branch = if matched {
            Some(&self.then_action)
        } else {
            self.else_action.as_ref()
        };
        debug!(action = %self.name, matched, "condition evaluated");

        if let Some(branch) = branch {
            if let Err(e) = branch.execute(ctx).await {
                ctx.set_status(&self.name, Status::Failed);
                return Err(e.context(format!("conditional action '{}'", self.name)));
            }
        }

        ctx.set_status(&self.name, Status::Completed);
        Ok(())
    }

    fn action_type(&self) -> &str {
        ACTION_TYPE_CONDITIONAL
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn validate(&self) -> Result<()> {
        validate_name(ACTION_TYPE_CONDITIONAL, &self.name)?;
        validate_children(ACTION_TYPE_CONDITIONAL, &self.name, self.children())
    }

    fn children(&self) -> Vec<&dyn Action> {
        let mut children: Vec<&dyn Action> = vec![self.then_action.as_ref()];
        if let Some(else_action) = &self.else_action {
            children.push(else_action.as_ref());
        }
        children
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::testing::Scripted;
    use crate::rule::ExpressionRule;
    use serde_json::json;

    fn conditional(expr: &str, with_else: bool) -> ConditionalAction {
        ConditionalAction::new(
            "cond",
            Arc::new(ExpressionRule::new(expr).unwrap()),
            Arc::new(Scripted::ok("then")),
            with_else.then(|| Arc::new(Scripted::ok("else")) as Arc<dyn Action>),
        )
    }

    #[tokio::test]
    async fn runs_exactly_one_branch() {
        let mut ctx = ExecutionContext::default().with_variable("go", json!(true));
        conditional("variables.go", true).execute(&mut ctx).await.unwrap();
        assert_eq!(ctx.status("then"), Some(Status::Completed));
        assert_eq!(ctx.status("else"), None);

        let mut ctx = ExecutionContext::default().with_variable("go", json!(false));
        conditional("variables.go", true).execute(&mut ctx).await.unwrap();
        assert_eq!(ctx.status("then"), None);
        assert_eq!(ctx.status("else"), Some(Status::Completed));
    }

    #[tokio::test]
    async fn missing_else_on_no_match_succeeds() {
        let mut ctx = ExecutionContext::default();
        conditional("1 == 2", false).execute(&mut ctx).await.unwrap();
        assert_eq!(ctx.status("cond"), Some(Status::Completed));
        assert_eq!(ctx.status("then"), None);
    }

    #[tokio::test]
    async fn evaluation_error_runs_neither_branch() {
        let mut ctx = ExecutionContext::default();
        let err = conditional("1 / 0 == 1", true)
            .execute(&mut ctx)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("failed to evaluate condition"));
        assert_eq!(ctx.status("cond"), Some(Status::Failed));
        assert_eq!(ctx.status("then"), None);
        assert_eq!(ctx.status("else"), None);
    }

    #[tokio::test]
    async fn branch_failure_fails_the_node() {
        let action = ConditionalAction::new(
            "cond",
            Arc::new(ExpressionRule::new("true").unwrap()),
            Arc::new(Scripted::failing("then")),
            None,
        );
        let mut ctx = ExecutionContext::default();
        assert!(action.execute(&mut ctx).await.is_err());
        assert_eq!(ctx.status("cond"), Some(Status::Failed));
    }

    #[test]
    fn config_reports_rule_and_branch_errors_together() {
        let params = match json!({
            "name": "cond",
            "rule_config": {"type": "cel", "params": {"expression": "event.a =="}},
            "then_action": {"type": "ghost"},
            "else_action": {"type": "print", "params": {"name": "e"}}
        }) {
            serde_json::Value::Object(m) => m,
            _ => unreachable!(),
        };
        let err = ConditionalAction::from_params(&params, &ActionRegistry::standard()).unwrap_err();
        let msg = err.to_string();
        assert!(matches!(err, InstinctError::Multiple(ref errors) if errors.len() == 3), "{msg}");
        assert!(msg.contains("rule_config"), "{msg}");
        assert!(msg.contains("then_action"), "{msg}");
        assert!(msg.contains("else_action"), "{msg}");
    }
}

