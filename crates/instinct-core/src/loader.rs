//! Sources of reflexes.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::action::ActionRegistry;
use crate::error::{InstinctError, Result};
use crate::reflex::{Reflex, ReflexConfig};

/// Lists a batch of ready-to-run reflexes. Any error aborts the whole batch.
#[async_trait]
pub trait ReflexLister: Send + Sync {
    async fn list_reflexes(&self) -> Result<Vec<Reflex>>;
}

// ---------------------------------------------------------------------------
// YAML directory
// ---------------------------------------------------------------------------

/// Reads every `*.yaml` / `*.yml` file directly inside a directory. Each file
/// holds a list of reflex configurations.
#[derive(Debug, Clone)]
pub struct YamlDirectoryLoader {
    dir: PathBuf,
    registry: Arc<ActionRegistry>,
}

impl YamlDirectoryLoader {
    pub fn new(dir: impl Into<PathBuf>, registry: Arc<ActionRegistry>) -> Self {
        Self {
            dir: dir.into(),
            registry,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn load(&self) -> Result<Vec<Reflex>> {
        let mut reflexes = Vec::new();
        for (path, configs) in read_reflex_files(&self.dir)? {
            for config in &configs {
                let reflex = Reflex::from_config(config, &self.registry)
                    .map_err(|e| e.context(format!("failed to build reflex from {}", path.display())))?;
                reflexes.push(reflex);
            }
        }
        info!(dir = %self.dir.display(), count = reflexes.len(), "loaded reflexes");
        Ok(reflexes)
    }
}

#[async_trait]
impl ReflexLister for YamlDirectoryLoader {
    async fn list_reflexes(&self) -> Result<Vec<Reflex>> {
        self.load()
    }
}

/// Reflex YAML files in `dir`, sorted by file name.
pub fn reflex_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = std::fs::read_dir(dir)
        .map_err(|e| InstinctError::from(e).context(format!("failed to read {}", dir.display())))?;

    let mut files = Vec::new();
    for entry in entries {
        let path = entry?.path();
        let is_yaml = matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("yaml") | Some("yml")
        );
        if is_yaml && path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

pub fn read_reflex_file(path: &Path) -> Result<Vec<ReflexConfig>> {
    let data = std::fs::read_to_string(path)
        .map_err(|e| InstinctError::from(e).context(format!("failed to read {}", path.display())))?;
    // An empty file is an empty list, not a parse error.
    if data.trim().is_empty() {
        return Ok(Vec::new());
    }
    serde_yaml::from_str(&data)
        .map_err(|e| InstinctError::from(e).context(format!("failed to parse {}", path.display())))
}

/// Every reflex file in `dir` with its parsed configurations.
pub fn read_reflex_files(dir: &Path) -> Result<Vec<(PathBuf, Vec<ReflexConfig>)>> {
    reflex_files(dir)?
        .into_iter()
        .map(|path| {
            let configs = read_reflex_file(&path)?;
            debug!(file = %path.display(), count = configs.len(), "parsed reflex file");
            Ok((path, configs))
        })
        .collect()
}

// ---------------------------------------------------------------------------
// In-memory
// ---------------------------------------------------------------------------

/// Builds reflexes from configurations already in memory.
#[derive(Debug, Clone)]
pub struct ConfigLister {
    configs: Vec<ReflexConfig>,
    registry: Arc<ActionRegistry>,
}

impl ConfigLister {
    pub fn new(configs: Vec<ReflexConfig>, registry: Arc<ActionRegistry>) -> Self {
        Self { configs, registry }
    }
}

#[async_trait]
impl ReflexLister for ConfigLister {
    async fn list_reflexes(&self) -> Result<Vec<Reflex>> {
        self.configs
            .iter()
            .map(|config| Reflex::from_config(config, &self.registry))
            .collect()
    }
}
