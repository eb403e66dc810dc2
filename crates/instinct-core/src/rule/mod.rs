//! Trigger conditions.

mod expression;
mod registry;

use std::fmt;

pub use expression::ExpressionRule;
pub use registry::{RuleFactory, RuleRegistry};

use crate::context::ExecutionContext;
use crate::error::Result;

/// A predicate over an [`ExecutionContext`].
///
/// `matches` is what reflex dispatch uses: a rule that cannot be evaluated
/// against an event simply does not match it. `evaluate` is the strict form
/// used where an evaluation failure has to surface, such as a conditional
/// action's branch decision.
pub trait Rule: Send + Sync + fmt::Debug {
    fn matches(&self, ctx: &ExecutionContext) -> Result<bool>;

    fn evaluate(&self, ctx: &ExecutionContext) -> Result<bool> {
        self.matches(ctx)
    }

    fn rule_type(&self) -> &str;
}
