use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use instinct_core::{ActionRegistry, Instinct, InstinctConfig, YamlDirectoryLoader};
use instinct_plugin::PluginHost;
use tracing::warn;

/// Everything a running engine owns: the dispatcher, the registry reflexes
/// are built from, and the plugin processes behind it.
pub struct Engine {
    pub instinct: Arc<Instinct>,
    pub registry: Arc<ActionRegistry>,
    pub plugins: PluginHost,
}

impl Engine {
    /// Start plugins, register their action types, and load every reflex in
    /// `reflex_dir`. Plugins are stopped again if loading fails.
    pub async fn start(config: &InstinctConfig, reflex_dir: &Path) -> anyhow::Result<Self> {
        let (plugins, registry) = start_plugins(config).await?;
        let registry = Arc::new(registry);

        let mut instinct = Instinct::new();
        if let Some(timeout) = config.reflex_timeout() {
            instinct = instinct.with_reflex_timeout(timeout);
        }
        let instinct = Arc::new(instinct);

        let loader = YamlDirectoryLoader::new(reflex_dir, Arc::clone(&registry));
        if let Err(e) = instinct.load_reflexes(&loader).await {
            plugins.shutdown().await;
            return Err(e).with_context(|| {
                format!("failed to load reflexes from {}", reflex_dir.display())
            });
        }

        Ok(Self {
            instinct,
            registry,
            plugins,
        })
    }

    pub async fn shutdown(&self) {
        self.plugins.shutdown().await;
    }
}

/// Start every configured plugin and return a registry holding the standard
/// actions plus one type per plugin. Plugins that fail to start are logged
/// and left out.
pub async fn start_plugins(config: &InstinctConfig) -> anyhow::Result<(PluginHost, ActionRegistry)> {
    let (plugins, failures) = PluginHost::start(config)
        .await
        .context("failed to discover plugins")?;
    for failure in &failures {
        warn!(plugin = %failure.command, error = %failure.error, "plugin not loaded");
    }
    let mut registry = ActionRegistry::standard();
    plugins.register_into(&mut registry);
    Ok((plugins, registry))
}

pub fn runtime() -> anyhow::Result<tokio::runtime::Runtime> {
    tokio::runtime::Runtime::new().context("failed to start the async runtime")
}
