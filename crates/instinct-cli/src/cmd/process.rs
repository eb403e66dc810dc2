use std::io::Read;
use std::path::PathBuf;

use anyhow::Context;
use instinct_core::{InstinctConfig, InstinctError, Params};
use serde_json::Value;

use crate::engine::{runtime, Engine};
use crate::output::print_json;

/// Load reflexes, run one event through them, and print the outcome.
/// `input` is a JSON file path or `-` for stdin.
pub fn run(
    config: &InstinctConfig,
    input: &str,
    dir: Option<PathBuf>,
    json: bool,
) -> anyhow::Result<()> {
    let event = read_event(input)?;
    let dir = dir.unwrap_or_else(|| config.reflex_dir.clone());

    runtime()?.block_on(async {
        let engine = Engine::start(config, &dir).await?;
        let result = engine.instinct.process_event(event).await;
        engine.shutdown().await;

        match result {
            Ok(outcome) if json => print_json(&outcome),
            Ok(outcome) => {
                let matched = if outcome.matched.is_empty() {
                    "none".to_string()
                } else {
                    outcome.matched.join(", ")
                };
                println!(
                    "event {}: {} reflex(es) evaluated, matched: {matched}",
                    outcome.event_id, outcome.evaluated
                );
                Ok(())
            }
            Err(InstinctError::EventFailed {
                event_id,
                count,
                errors,
            }) => {
                for e in &errors {
                    eprintln!("  - {e}");
                }
                anyhow::bail!("encountered {count} error(s) while processing event {event_id}")
            }
            Err(e) => Err(e.into()),
        }
    })
}

fn read_event(input: &str) -> anyhow::Result<Params> {
    let data = if input == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("failed to read event from stdin")?;
        buf
    } else {
        std::fs::read_to_string(input).with_context(|| format!("failed to read {input}"))?
    };

    match serde_json::from_str::<Value>(&data).context("event is not valid JSON")? {
        Value::Object(event) => Ok(event),
        _ => anyhow::bail!("event must be a JSON object"),
    }
}
