use instinct_core::InstinctConfig;
use instinct_server::AppState;
use tracing::info;

use crate::engine::{runtime, Engine};

pub fn run(mut config: InstinctConfig, host: Option<String>, port: Option<u16>) -> anyhow::Result<()> {
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }
    runtime()?.block_on(serve(config))
}

async fn serve(config: InstinctConfig) -> anyhow::Result<()> {
    let engine = Engine::start(&config, &config.reflex_dir).await?;
    info!(
        reflexes = engine.instinct.len().await,
        plugins = engine.plugins.len(),
        "engine ready"
    );

    let state = AppState::new(engine.instinct.clone(), engine.registry.clone());
    let result = instinct_server::serve(state, &config.server.address()).await;
    engine.shutdown().await;
    result
}
