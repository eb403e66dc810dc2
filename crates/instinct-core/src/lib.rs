pub mod action;
pub mod config;
pub mod context;
pub mod error;
pub mod expr;
pub mod instinct;
pub mod loader;
pub mod params;
pub mod reflex;
pub mod rule;

pub use action::{Action, ActionRegistry};
pub use config::InstinctConfig;
pub use context::{ExecutionContext, Status};
pub use error::{InstinctError, Result};
pub use instinct::{EventOutcome, Instinct};
pub use loader::{ConfigLister, ReflexLister, YamlDirectoryLoader};
pub use params::{ActionConfig, Params, RuleConfig};
pub use reflex::{Reflex, ReflexConfig};
pub use rule::{Rule, RuleRegistry};
