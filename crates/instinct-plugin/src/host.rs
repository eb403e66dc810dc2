use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use instinct_core::action::PluginProxy;
use instinct_core::config::{HandshakeConfig, InstinctConfig};
use instinct_core::{Action, ActionRegistry};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::action::PluginAction;
use crate::process::PluginCommand;
use crate::{PluginError, Result};

/// Summary of one connected plugin.
#[derive(Debug, Clone, Serialize)]
pub struct PluginInfo {
    pub command: String,
    pub action_type: String,
    pub name: String,
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// A plugin that could not be connected.
#[derive(Debug)]
pub struct PluginFailure {
    pub command: PluginCommand,
    pub error: PluginError,
}

/// Owns every plugin process for the lifetime of the engine.
#[derive(Debug)]
pub struct PluginHost {
    handshake: HandshakeConfig,
    call_timeout: Option<Duration>,
    plugins: Vec<(PluginCommand, Arc<PluginAction>)>,
}

impl PluginHost {
    pub fn new(handshake: HandshakeConfig, call_timeout: Option<Duration>) -> Self {
        Self {
            handshake,
            call_timeout,
            plugins: Vec::new(),
        }
    }

    pub fn from_config(config: &InstinctConfig) -> Self {
        Self::new(config.handshake.clone(), config.plugin_call_timeout())
    }

    /// Discover and connect every plugin the configuration names. Plugins
    /// that fail to start are skipped and returned alongside the host.
    pub async fn start(config: &InstinctConfig) -> Result<(Self, Vec<PluginFailure>)> {
        let commands = discover(&config.plugin_dir, &config.plugins)?;
        let mut host = Self::from_config(config);
        let failures = host.connect_all(commands).await;
        info!(
            connected = host.plugins.len(),
            failed = failures.len(),
            "plugins started"
        );
        Ok((host, failures))
    }

    pub async fn connect(&mut self, command: PluginCommand) -> Result<Arc<PluginAction>> {
        let action =
            Arc::new(PluginAction::connect(&command, &self.handshake, self.call_timeout).await?);
        self.plugins.push((command, Arc::clone(&action)));
        Ok(action)
    }

    /// Connect plugins concurrently. Successful ones are kept in the order
    /// given.
    pub async fn connect_all(&mut self, commands: Vec<PluginCommand>) -> Vec<PluginFailure> {
        let handshake = &self.handshake;
        let timeout = self.call_timeout;
        let results = join_all(commands.iter().map(|command| async move {
            PluginAction::connect(command, handshake, timeout).await
        }))
        .await;

        let mut failures = Vec::new();
        for (command, result) in commands.into_iter().zip(results) {
            match result {
                Ok(action) => self.plugins.push((command, Arc::new(action))),
                Err(error) => {
                    warn!(plugin = %command, %error, "failed to start plugin");
                    failures.push(PluginFailure { command, error });
                }
            }
        }
        failures
    }

    /// Register one factory per plugin type. Each built action is a
    /// [`PluginProxy`] whose configuration is the action's `params`.
    pub fn register_into(&self, registry: &mut ActionRegistry) {
        for (command, plugin) in &self.plugins {
            let action_type = plugin.action_type().to_string();
            if registry.contains(&action_type) {
                warn!(plugin = %command, %action_type, "plugin replaces an existing action type");
            }
            let plugin = Arc::clone(plugin);
            registry.register(action_type, move |params, _| {
                let inner: Arc<dyn Action> = plugin.clone();
                Ok(Arc::new(PluginProxy::new(inner, params.clone())) as Arc<dyn Action>)
            });
        }
    }

    pub fn list(&self) -> Vec<PluginInfo> {
        self.plugins
            .iter()
            .map(|(command, plugin)| {
                let validation = plugin.validate();
                PluginInfo {
                    command: command.to_string(),
                    action_type: plugin.action_type().to_string(),
                    name: plugin.name().to_string(),
                    valid: validation.is_ok(),
                    error: validation.err().map(|e| e.to_string()),
                }
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    /// Kill every plugin process.
    pub async fn shutdown(&self) {
        join_all(self.plugins.iter().map(|(_, plugin)| plugin.shutdown())).await;
        info!(count = self.plugins.len(), "plugins stopped");
    }
}

// ─── Discovery ────────────────────────────────────────────────────────────

/// Executables directly inside `dir`, sorted by file name, followed by the
/// configured command lines. A missing directory contributes nothing.
pub fn discover(dir: &Path, configured: &[String]) -> Result<Vec<PluginCommand>> {
    let mut commands: Vec<PluginCommand> = executables(dir)?
        .into_iter()
        .map(PluginCommand::new)
        .collect();
    for line in configured.iter().filter(|l| !l.trim().is_empty()) {
        commands.push(PluginCommand::parse(line)?);
    }
    Ok(commands)
}

fn executables(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        debug!(dir = %dir.display(), "no plugin directory");
        return Ok(Vec::new());
    }
    let mut found = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && is_executable(&path) {
            found.push(path);
        }
    }
    found.sort();
    Ok(found)
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|m| m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "exe")
}
