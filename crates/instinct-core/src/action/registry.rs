use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::{
    Action, ConditionalAction, IteratorAction, ParallelAction, PrintAction, SequentialAction,
    ACTION_TYPE_CONDITIONAL, ACTION_TYPE_ITERATOR, ACTION_TYPE_PARALLEL, ACTION_TYPE_PRINT,
    ACTION_TYPE_SEQUENTIAL,
};
use crate::error::{InstinctError, Result};
use crate::params::{ActionConfig, Params};
use crate::rule::RuleRegistry;

pub type ActionFactory =
    Arc<dyn Fn(&Params, &ActionRegistry) -> Result<Arc<dyn Action>> + Send + Sync>;

/// Maps an action type string to the factory that builds it.
///
/// Factories receive the registry itself so composites can build their
/// children, and the registry carries a [`RuleRegistry`] for actions that
/// embed a rule.
#[derive(Clone)]
pub struct ActionRegistry {
    factories: HashMap<String, ActionFactory>,
    rules: Arc<RuleRegistry>,
}

impl ActionRegistry {
    pub fn new(rules: Arc<RuleRegistry>) -> Self {
        Self {
            factories: HashMap::new(),
            rules,
        }
    }

    pub fn with_standard_actions(rules: Arc<RuleRegistry>) -> Self {
        let mut registry = Self::new(rules);
        registry.register_standard_actions();
        registry
    }

    /// Standard actions over the standard rules.
    pub fn standard() -> Self {
        Self::with_standard_actions(Arc::new(RuleRegistry::with_standard_rules()))
    }

    pub fn register_standard_actions(&mut self) {
        self.register(ACTION_TYPE_PRINT, |params, _| {
            Ok(Arc::new(PrintAction::from_params(params)?) as Arc<dyn Action>)
        });
        self.register(ACTION_TYPE_SEQUENTIAL, |params, registry| {
            Ok(Arc::new(SequentialAction::from_params(params, registry)?) as Arc<dyn Action>)
        });
        self.register(ACTION_TYPE_PARALLEL, |params, registry| {
            Ok(Arc::new(ParallelAction::from_params(params, registry)?) as Arc<dyn Action>)
        });
        self.register(ACTION_TYPE_CONDITIONAL, |params, registry| {
            Ok(Arc::new(ConditionalAction::from_params(params, registry)?) as Arc<dyn Action>)
        });
        self.register(ACTION_TYPE_ITERATOR, |params, registry| {
            Ok(Arc::new(IteratorAction::from_params(params, registry)?) as Arc<dyn Action>)
        });
    }

    /// Register a factory. A later registration for the same type replaces
    /// the earlier one.
    pub fn register<F>(&mut self, action_type: impl Into<String>, factory: F)
    where
        F: Fn(&Params, &ActionRegistry) -> Result<Arc<dyn Action>> + Send + Sync + 'static,
    {
        self.factories.insert(action_type.into(), Arc::new(factory));
    }

    pub fn create(&self, config: &ActionConfig) -> Result<Arc<dyn Action>> {
        let factory = self
            .factories
            .get(&config.action_type)
            .ok_or_else(|| InstinctError::UnknownActionType(config.action_type.clone()))?;
        factory(&config.params, self)
    }

    pub fn validate(&self, config: &ActionConfig) -> Result<()> {
        self.create(config).map(|_| ())
    }

    pub fn rules(&self) -> &RuleRegistry {
        &self.rules
    }

    pub fn contains(&self, action_type: &str) -> bool {
        self.factories.contains_key(action_type)
    }

    pub fn types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }
}

impl fmt::Debug for ActionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionRegistry")
            .field("types", &self.types())
            .field("rules", &self.rules)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::node_names;
    use crate::context::{ExecutionContext, Status};
    use serde_json::json;

    fn config(value: serde_json::Value) -> ActionConfig {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn unknown_type_fails() {
        let registry = ActionRegistry::standard();
        let err = registry
            .create(&config(json!({"type": "teleport", "params": {"name": "x"}})))
            .unwrap_err();
        assert!(matches!(err, InstinctError::UnknownActionType(t) if t == "teleport"));
    }

    #[test]
    fn type_and_name_round_trip() {
        let registry = ActionRegistry::standard();
        for action_type in ["print", "sequential", "parallel"] {
            let cfg = if action_type == "print" {
                config(json!({"type": "print", "params": {"name": "n", "message": "m"}}))
            } else {
                config(json!({"type": action_type, "params": {
                    "name": "n",
                    "children": [{"type": "print", "params": {"name": "c", "message": "m"}}]
                }}))
            };
            let action = registry.create(&cfg).unwrap();
            assert_eq!(action.action_type(), action_type);
            assert_eq!(action.name(), "n");
        }
        assert_eq!(
            registry.types(),
            vec!["conditional", "iterator", "parallel", "print", "sequential"]
        );
    }

    #[test]
    fn nested_unknown_type_surfaces_through_context() {
        let registry = ActionRegistry::standard();
        let err = registry
            .create(&config(json!({"type": "sequential", "params": {
                "name": "outer",
                "children": [{"type": "nope", "params": {}}]
            }})))
            .unwrap_err();
        match err {
            InstinctError::Context { source, .. } => {
                assert!(matches!(*source, InstinctError::UnknownActionType(_)))
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn empty_children_fail_validation() {
        let registry = ActionRegistry::standard();
        let err = registry
            .validate(&config(json!({"type": "parallel", "params": {
                "name": "p", "children": []
            }})))
            .unwrap_err();
        assert!(err.to_string().contains("no children"));
    }

    #[tokio::test]
    async fn builds_a_full_tree() {
        let registry = ActionRegistry::standard();
        let action = registry
            .create(&config(json!({"type": "sequential", "params": {
                "name": "root",
                "children": [
                    {"type": "conditional", "params": {
                        "name": "gate",
                        "rule_config": {"type": "cel", "params": {"expression": "event.severity == 'high'"}},
                        "then_action": {"type": "print", "params": {"name": "alert", "message": "high"}},
                        "else_action": {"type": "print", "params": {"name": "ignore", "message": "low"}}
                    }},
                    {"type": "iterator", "params": {
                        "name": "each",
                        "expression": "event.hosts",
                        "item_var_name": "host",
                        "stop_on_error": "false",
                        "inner_action": {"type": "print", "params": {"name": "visit", "message": "host"}}
                    }}
                ]
            }})))
            .unwrap();

        assert_eq!(
            node_names(action.as_ref()),
            vec!["root", "gate", "alert", "ignore", "each", "visit"]
        );

        let mut event = Params::new();
        event.insert("severity".into(), json!("high"));
        event.insert("hosts".into(), json!(["a", "b"]));
        let mut ctx = ExecutionContext::new(event);
        action.execute(&mut ctx).await.unwrap();

        assert_eq!(ctx.status("root"), Some(Status::Completed));
        assert_eq!(ctx.status("alert"), Some(Status::Completed));
        assert_eq!(ctx.status("ignore"), None);
        assert_eq!(ctx.status("each:iteration 1"), Some(Status::Completed));
    }

    #[test]
    fn conditional_resolves_rules_through_the_registry() {
        let mut registry = ActionRegistry::new(Arc::new(RuleRegistry::new()));
        registry.register_standard_actions();
        let err = registry
            .create(&config(json!({"type": "conditional", "params": {
                "name": "c",
                "rule_config": {"type": "cel", "params": {"expression": "true"}},
                "then_action": {"type": "print", "params": {"name": "p", "message": "m"}}
            }})))
            .unwrap_err();
        assert!(err.to_string().contains("unknown rule type: cel"));
    }

    #[test]
    fn iterator_defaults_to_stop_on_error() {
        let registry = ActionRegistry::standard();
        let mut params = Params::new();
        params.insert("name".into(), json!("loop"));
        params.insert("expression".into(), json!("[1]"));
        params.insert("item_var_name".into(), json!("i"));
        params.insert(
            "inner_action".into(),
            json!({"type": "print", "params": {"name": "p", "message": "m"}}),
        );
        let action = IteratorAction::from_params(&params, &registry).unwrap();
        assert!(action.stop_on_error());
    }
}
