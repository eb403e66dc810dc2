use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{InstinctError, Result};

pub const CONFIG_FILE: &str = "instinct.yaml";

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

// ---------------------------------------------------------------------------
// ServerConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl ServerConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

// ---------------------------------------------------------------------------
// HandshakeConfig
// ---------------------------------------------------------------------------

/// Values a plugin process must echo back before the host talks to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeConfig {
    #[serde(default = "default_protocol_version")]
    pub protocol_version: u32,
    #[serde(default = "default_cookie_key")]
    pub magic_cookie_key: String,
    #[serde(default = "default_cookie_value")]
    pub magic_cookie_value: String,
}

fn default_protocol_version() -> u32 {
    1
}

fn default_cookie_key() -> String {
    "INSTINCT_PLUGIN".to_string()
}

fn default_cookie_value() -> String {
    "reflex-action".to_string()
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            protocol_version: default_protocol_version(),
            magic_cookie_key: default_cookie_key(),
            magic_cookie_value: default_cookie_value(),
        }
    }
}

// ---------------------------------------------------------------------------
// InstinctConfig (top-level)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstinctConfig {
    #[serde(default = "default_reflex_dir")]
    pub reflex_dir: PathBuf,
    #[serde(default = "default_plugin_dir")]
    pub plugin_dir: PathBuf,
    /// Extra plugin commands, resolved on `PATH` when not a path.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub plugins: Vec<String>,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub handshake: HandshakeConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugin_call_timeout_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reflex_timeout_secs: Option<u64>,
}

fn default_reflex_dir() -> PathBuf {
    PathBuf::from("reflexes")
}

fn default_plugin_dir() -> PathBuf {
    PathBuf::from("plugins")
}

impl Default for InstinctConfig {
    fn default() -> Self {
        Self {
            reflex_dir: default_reflex_dir(),
            plugin_dir: default_plugin_dir(),
            plugins: Vec::new(),
            server: ServerConfig::default(),
            handshake: HandshakeConfig::default(),
            plugin_call_timeout_secs: None,
            reflex_timeout_secs: None,
        }
    }
}

impl InstinctConfig {
    /// Load from `path`, falling back to defaults when the file does not
    /// exist, then apply `INSTINCT_*` environment overrides.
    pub fn load(path: &Path) -> Result<Self> {
        let mut cfg = if path.exists() {
            let data = std::fs::read_to_string(path)?;
            Self::from_yaml(&data)?
        } else {
            Self::default()
        };
        cfg.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(cfg)
    }

    pub fn from_yaml(data: &str) -> Result<Self> {
        if data.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(data)?)
    }

    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(dir) = lookup("INSTINCT_REFLEX_DIR") {
            self.reflex_dir = PathBuf::from(dir);
        }
        if let Some(dir) = lookup("INSTINCT_PLUGIN_DIR") {
            self.plugin_dir = PathBuf::from(dir);
        }
        if let Some(host) = lookup("INSTINCT_HOST") {
            self.server.host = host;
        }
        if let Some(port) = lookup("INSTINCT_PORT") {
            self.server.port = port.trim().parse().map_err(|_| {
                InstinctError::invalid_config("server", format!("INSTINCT_PORT is not a port: '{port}'"))
            })?;
        }
        Ok(())
    }

    pub fn plugin_call_timeout(&self) -> Option<Duration> {
        self.plugin_call_timeout_secs.map(Duration::from_secs)
    }

    pub fn reflex_timeout(&self) -> Option<Duration> {
        self.reflex_timeout_secs.map(Duration::from_secs)
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();

        if !self.reflex_dir.is_dir() {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: format!(
                    "reflex_dir '{}' does not exist or is not a directory",
                    self.reflex_dir.display()
                ),
            });
        }

        if self.server.port == 0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: "server.port is 0; the OS will pick a port".to_string(),
            });
        }

        if self.handshake.protocol_version == 0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "handshake.protocol_version must be at least 1".to_string(),
            });
        }

        if self.handshake.magic_cookie_key.trim().is_empty()
            || self.handshake.magic_cookie_value.trim().is_empty()
        {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "handshake magic cookie key and value must both be set".to_string(),
            });
        }

        for (field, value) in [
            ("plugin_call_timeout_secs", self.plugin_call_timeout_secs),
            ("reflex_timeout_secs", self.reflex_timeout_secs),
        ] {
            if value == Some(0) {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Warning,
                    message: format!("{field} is 0; every call will time out immediately"),
                });
            }
        }

        for plugin in &self.plugins {
            if plugin.trim().is_empty() {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Warning,
                    message: "empty entry in plugins".to_string(),
                });
            }
        }

        warnings
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
