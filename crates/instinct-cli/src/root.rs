use std::path::{Path, PathBuf};

use anyhow::Context;
use instinct_core::config::{InstinctConfig, CONFIG_FILE};

/// Resolve the configuration file.
///
/// Priority:
/// 1. `--config` flag / `INSTINCT_CONFIG` env var (passed in as `explicit`)
/// 2. `instinct.yaml` in the current directory
pub fn resolve_config_path(explicit: Option<&Path>) -> PathBuf {
    match explicit {
        Some(p) => p.to_path_buf(),
        None => PathBuf::from(CONFIG_FILE),
    }
}

/// Load the configuration. A missing file means defaults; a file that exists
/// but does not parse is an error.
pub fn load_config(explicit: Option<&Path>) -> anyhow::Result<InstinctConfig> {
    let path = resolve_config_path(explicit);
    if explicit.is_some() && !path.exists() {
        tracing::warn!(path = %path.display(), "config file not found; using defaults");
    }
    InstinctConfig::load(&path).with_context(|| format!("failed to load {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn explicit_path_wins() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("custom.yaml");
        assert_eq!(resolve_config_path(Some(&path)), path);
        assert_eq!(resolve_config_path(None), PathBuf::from("instinct.yaml"));
    }

    #[test]
    fn loads_explicit_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("custom.yaml");
        std::fs::write(&path, "handshake:\n  protocol_version: 3\n").unwrap();
        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.handshake.protocol_version, 3);
    }

    #[test]
    fn unparsable_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("custom.yaml");
        std::fs::write(&path, "server: [not, a, map]\n").unwrap();
        let err = load_config(Some(&path)).unwrap_err();
        assert!(format!("{err:#}").contains("failed to load"));
    }
}
