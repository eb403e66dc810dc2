use std::time::Duration;

use instinct_core::InstinctError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PluginError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to start plugin '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("plugin command not found: {0}")]
    NotFound(String),

    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("failed to parse plugin message: {source}\n  line: {line}")]
    Parse {
        line: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("{0}")]
    Exited(String),

    #[error("plugin returned an error: {0}")]
    Remote(String),

    #[error("plugin call '{method}' timed out after {timeout:?}")]
    Timeout { method: String, timeout: Duration },
}

impl From<PluginError> for InstinctError {
    fn from(e: PluginError) -> Self {
        InstinctError::Plugin(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PluginError>;
