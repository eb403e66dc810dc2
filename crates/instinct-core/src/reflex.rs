use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::action::{node_names, Action, ActionRegistry};
use crate::context::ExecutionContext;
use crate::error::{InstinctError, Result};
use crate::params::{ActionConfig, RuleConfig};
use crate::rule::Rule;

// ---------------------------------------------------------------------------
// ReflexConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReflexConfig {
    pub name: String,
    pub rule: RuleConfig,
    #[serde(default)]
    pub actions: Vec<ActionConfig>,
}

impl ReflexConfig {
    /// Check the whole configuration without keeping anything it builds.
    /// Every problem is reported, not just the first.
    pub fn validate(&self, registry: &ActionRegistry) -> Result<()> {
        Reflex::from_config(self, registry).map(|_| ())
    }
}

// ---------------------------------------------------------------------------
// Reflex
// ---------------------------------------------------------------------------

/// A named binding of one rule to an ordered list of actions.
///
/// Action names key the status ledger, so they must be unique across the
/// whole action tree of one reflex.
#[derive(Debug, Clone)]
pub struct Reflex {
    name: String,
    rule: Arc<dyn Rule>,
    actions: Vec<Arc<dyn Action>>,
}

impl Reflex {
    pub fn new(name: impl Into<String>, rule: Arc<dyn Rule>, actions: Vec<Arc<dyn Action>>) -> Self {
        Self {
            name: name.into(),
            rule,
            actions,
        }
    }

    /// Build a reflex, collecting every configuration problem into one
    /// [`InstinctError::Multiple`].
    pub fn from_config(config: &ReflexConfig, registry: &ActionRegistry) -> Result<Self> {
        let mut errors = Vec::new();

        if config.name.trim().is_empty() {
            errors.push(InstinctError::Invalid("reflex name cannot be empty".into()));
        }
        if config.actions.is_empty() {
            errors.push(InstinctError::Invalid(format!(
                "reflex '{}' has no actions",
                config.name
            )));
        }

        let rule = registry
            .rules()
            .create(&config.rule)
            .map_err(|e| errors.push(e.context(format!("reflex '{}': rule", config.name))))
            .ok();

        let mut actions = Vec::with_capacity(config.actions.len());
        for (i, action) in config.actions.iter().enumerate() {
            match registry.create(action) {
                Ok(action) => actions.push(action),
                Err(e) => errors.push(e.context(format!(
                    "reflex '{}': action {i} ({})",
                    config.name, action.action_type
                ))),
            }
        }

        InstinctError::collect(errors)?;
        let Some(rule) = rule else {
            return Err(InstinctError::invalid_config("reflex", "rule could not be built"));
        };
        let reflex = Self::new(config.name.clone(), rule, actions);
        reflex.validate()?;
        Ok(reflex)
    }

    /// Structural checks on an assembled reflex: a name, at least one action,
    /// and no action name used twice anywhere in the tree.
    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();
        if self.name.trim().is_empty() {
            errors.push(InstinctError::Invalid("reflex name cannot be empty".into()));
        }
        if self.actions.is_empty() {
            errors.push(InstinctError::Invalid(format!(
                "reflex '{}' has no actions",
                self.name
            )));
        }
        for duplicate in self.duplicate_node_names() {
            errors.push(InstinctError::Invalid(format!(
                "reflex '{}': action name '{duplicate}' is used more than once",
                self.name
            )));
        }
        InstinctError::collect(errors)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn rule(&self) -> &dyn Rule {
        self.rule.as_ref()
    }

    pub fn actions(&self) -> &[Arc<dyn Action>] {
        &self.actions
    }

    pub fn matches(&self, ctx: &ExecutionContext) -> Result<bool> {
        self.rule.matches(ctx)
    }

    /// Run every action in order. A failing action does not stop the ones
    /// after it; all failures are returned together.
    pub async fn execute(&self, ctx: &mut ExecutionContext) -> Result<()> {
        let mut errors = Vec::new();
        for action in &self.actions {
            if let Err(e) = action.execute(ctx).await {
                warn!(reflex = %self.name, action = action.name(), error = %e, "action failed");
                errors.push(e);
            }
        }
        InstinctError::collect(errors)
    }

    fn duplicate_node_names(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut duplicates = Vec::new();
        for action in &self.actions {
            for name in node_names(action.as_ref()) {
                if !seen.insert(name.clone()) && !duplicates.contains(&name) {
                    duplicates.push(name);
                }
            }
        }
        duplicates
    }
}
