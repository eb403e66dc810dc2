//! Minimal plugin: logs a greeting with its configuration and records who it
//! greeted. Launched by the instinct host, never by hand.

use async_trait::async_trait;
use instinct_core::config::HandshakeConfig;
use instinct_core::{Action, ExecutionContext, Status};
use serde_json::Value;
use tracing::info;

#[derive(Debug)]
struct Greeter;

#[async_trait]
impl Action for Greeter {
    async fn execute(&self, ctx: &mut ExecutionContext) -> instinct_core::Result<()> {
        let config = ctx.variable("config").cloned().unwrap_or(Value::Null);
        info!(%config, "hello from the greeter plugin");
        let who = ctx
            .event
            .get("user")
            .and_then(Value::as_str)
            .unwrap_or("world")
            .to_string();
        ctx.set_variable("greeted", Value::String(who));
        ctx.set_status("greeter", Status::Completed);
        Ok(())
    }

    fn action_type(&self) -> &str {
        "greeter"
    }

    fn name(&self) -> &str {
        "Plugin Greeter"
    }

    fn validate(&self) -> instinct_core::Result<()> {
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // stdout carries the protocol; logs go to stderr where the host collects them.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    instinct_plugin::serve(&Greeter, &HandshakeConfig::default()).await?;
    Ok(())
}
