use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, info, info_span, warn, Instrument, Span};
use uuid::Uuid;

use crate::context::ExecutionContext;
use crate::error::{InstinctError, Result};
use crate::loader::ReflexLister;
use crate::params::Params;
use crate::reflex::Reflex;

/// Result of a successful dispatch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventOutcome {
    pub event_id: String,
    /// Number of reflexes the event was evaluated against.
    pub evaluated: usize,
    /// Names of reflexes whose rule matched, in load order.
    pub matched: Vec<String>,
}

/// The dispatcher: holds the loaded reflexes and fans each event out to all
/// of them.
#[derive(Debug, Default)]
pub struct Instinct {
    reflexes: RwLock<Vec<Arc<Reflex>>>,
    reflex_timeout: Option<Duration>,
}

impl Instinct {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bound how long one reflex's actions may run for a single event.
    pub fn with_reflex_timeout(mut self, timeout: Duration) -> Self {
        self.reflex_timeout = Some(timeout);
        self
    }

    pub async fn add_reflex(&self, reflex: Reflex) -> Result<()> {
        reflex.validate()?;
        let mut reflexes = self.reflexes.write().await;
        if reflexes.iter().any(|r| r.name() == reflex.name()) {
            return Err(InstinctError::DuplicateReflex(reflex.name().to_string()));
        }
        info!(reflex = reflex.name(), "reflex added");
        reflexes.push(Arc::new(reflex));
        Ok(())
    }

    /// Add every reflex the lister returns. Nothing is added if listing fails
    /// or any name collides.
    pub async fn load_reflexes(&self, lister: &dyn ReflexLister) -> Result<usize> {
        let batch = lister
            .list_reflexes()
            .await
            .map_err(|e| e.context("failed to list reflexes"))?;

        for reflex in &batch {
            reflex.validate()?;
        }

        let mut reflexes = self.reflexes.write().await;
        let mut names: HashSet<&str> = reflexes.iter().map(|r| r.name()).collect();
        for reflex in &batch {
            if !names.insert(reflex.name()) {
                return Err(InstinctError::DuplicateReflex(reflex.name().to_string()));
            }
        }

        let count = batch.len();
        reflexes.extend(batch.into_iter().map(Arc::new));
        info!(count, total = reflexes.len(), "reflexes loaded");
        Ok(count)
    }

    /// Snapshot of the loaded reflexes.
    pub async fn reflexes(&self) -> Vec<Arc<Reflex>> {
        self.reflexes.read().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.reflexes.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.reflexes.read().await.is_empty()
    }

    /// Evaluate `event` against every reflex concurrently and run the actions
    /// of those that match. Each reflex works on its own copy of the context.
    pub async fn process_event(&self, event: Params) -> Result<EventOutcome> {
        let event_id = Uuid::new_v4().to_string();
        let span = info_span!("process_event", %event_id);
        self.dispatch(event_id, event).instrument(span).await
    }

    async fn dispatch(&self, event_id: String, event: Params) -> Result<EventOutcome> {
        // Held for the whole dispatch so loads wait for in-flight events.
        let reflexes = self.reflexes.read().await;
        let ctx = ExecutionContext::new(event);

        let handles = reflexes.iter().map(|reflex| {
            let reflex = Arc::clone(reflex);
            let mut ctx = ctx.clone();
            let timeout = self.reflex_timeout;
            tokio::spawn(
                async move { run_reflex(&reflex, &mut ctx, timeout).await }
                    .instrument(Span::current()),
            )
        });
        let joined = join_all(handles).await;

        let mut matched = Vec::new();
        let mut errors = Vec::new();
        for (reflex, outcome) in reflexes.iter().zip(joined) {
            match outcome {
                Ok(Ok(true)) => matched.push(reflex.name().to_string()),
                Ok(Ok(false)) => {}
                Ok(Err(e)) => {
                    warn!(reflex = reflex.name(), error = %e, "reflex failed");
                    errors.push(e);
                }
                Err(join_error) => {
                    warn!(reflex = reflex.name(), error = %join_error, "reflex task aborted");
                    errors.push(InstinctError::ActionFailed {
                        action: reflex.name().to_string(),
                        message: format!("reflex task did not complete: {join_error}"),
                    });
                }
            }
        }

        let evaluated = reflexes.len();
        if !errors.is_empty() {
            return Err(InstinctError::EventFailed {
                event_id,
                count: errors.len(),
                errors,
            });
        }

        info!(evaluated, matched = matched.len(), "event processed");
        Ok(EventOutcome {
            event_id,
            evaluated,
            matched,
        })
    }
}

async fn run_reflex(
    reflex: &Reflex,
    ctx: &mut ExecutionContext,
    timeout: Option<Duration>,
) -> Result<bool> {
    let matched = reflex
        .matches(ctx)
        .map_err(|e| e.context(format!("error matching reflex '{}'", reflex.name())))?;
    if !matched {
        debug!(reflex = reflex.name(), "no match");
        return Ok(false);
    }

    debug!(reflex = reflex.name(), "matched, executing actions");
    let result = match timeout {
        Some(limit) => tokio::time::timeout(limit, reflex.execute(ctx))
            .await
            .map_err(|_| InstinctError::Timeout {
                reflex: reflex.name().to_string(),
                timeout: limit,
            })?,
        None => reflex.execute(ctx).await,
    };
    result.map_err(|e| e.context(format!("error executing reflex '{}'", reflex.name())))?;
    Ok(true)
}
