use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::expression::{ExpressionRule, RULE_TYPE_CEL};
use super::Rule;
use crate::error::{InstinctError, Result};
use crate::params::{Params, RuleConfig};

pub type RuleFactory = Arc<dyn Fn(&Params, &RuleRegistry) -> Result<Arc<dyn Rule>> + Send + Sync>;

/// Maps a rule type string to the factory that builds it.
#[derive(Clone, Default)]
pub struct RuleRegistry {
    factories: HashMap<String, RuleFactory>,
}

impl RuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with the built-in rule types: `cel`, and `expression` as an
    /// alias for it.
    pub fn with_standard_rules() -> Self {
        let mut registry = Self::new();
        for rule_type in [RULE_TYPE_CEL, "expression"] {
            registry.register(rule_type, |params, registry| {
                Ok(Arc::new(ExpressionRule::from_params(params, registry)?) as Arc<dyn Rule>)
            });
        }
        registry
    }

    /// Register a factory. A later registration for the same type replaces
    /// the earlier one.
    pub fn register<F>(&mut self, rule_type: impl Into<String>, factory: F)
    where
        F: Fn(&Params, &RuleRegistry) -> Result<Arc<dyn Rule>> + Send + Sync + 'static,
    {
        self.factories.insert(rule_type.into(), Arc::new(factory));
    }

    pub fn create(&self, config: &RuleConfig) -> Result<Arc<dyn Rule>> {
        let factory = self
            .factories
            .get(&config.rule_type)
            .ok_or_else(|| InstinctError::UnknownRuleType(config.rule_type.clone()))?;
        factory(&config.params, self)
    }

    pub fn validate(&self, config: &RuleConfig) -> Result<()> {
        self.create(config).map(|_| ())
    }

    pub fn contains(&self, rule_type: &str) -> bool {
        self.factories.contains_key(rule_type)
    }

    pub fn types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }
}

impl fmt::Debug for RuleRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuleRegistry")
            .field("types", &self.types())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ExecutionContext;
    use serde_json::json;

    #[derive(Debug)]
    struct Always(bool);

    impl Rule for Always {
        fn matches(&self, _ctx: &ExecutionContext) -> Result<bool> {
            Ok(self.0)
        }

        fn rule_type(&self) -> &str {
            "always"
        }
    }

    fn cel(expression: &str) -> RuleConfig {
        let mut params = Params::new();
        params.insert("expression".into(), json!(expression));
        RuleConfig::new("cel", params)
    }

    #[test]
    fn unknown_type_fails() {
        let registry = RuleRegistry::with_standard_rules();
        let err = registry
            .create(&RuleConfig::new("nope", Params::new()))
            .unwrap_err();
        assert!(matches!(err, InstinctError::UnknownRuleType(t) if t == "nope"));
    }

    #[test]
    fn builds_standard_rules_and_alias() {
        let registry = RuleRegistry::with_standard_rules();
        assert_eq!(registry.types(), vec!["cel", "expression"]);
        let rule = registry.create(&cel("true")).unwrap();
        assert_eq!(rule.rule_type(), "cel");

        let mut alias = cel("true");
        alias.rule_type = "expression".into();
        assert!(registry.validate(&alias).is_ok());
    }

    #[test]
    fn construction_errors_propagate() {
        let registry = RuleRegistry::with_standard_rules();
        assert!(matches!(
            registry.validate(&RuleConfig::new("cel", Params::new())),
            Err(InstinctError::InvalidConfig { .. })
        ));
        assert!(matches!(
            registry.validate(&cel("(")),
            Err(InstinctError::InvalidExpression { .. })
        ));
    }

    #[test]
    fn later_registration_replaces_earlier() {
        let mut registry = RuleRegistry::new();
        registry.register("flag", |_, _| Ok(Arc::new(Always(false)) as Arc<dyn Rule>));
        registry.register("flag", |_, _| Ok(Arc::new(Always(true)) as Arc<dyn Rule>));

        let rule = registry.create(&RuleConfig::new("flag", Params::new())).unwrap();
        let ctx = ExecutionContext::default();
        assert!(rule.matches(&ctx).unwrap());
    }
}
