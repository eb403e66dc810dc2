//! Wire types for the host/plugin conversation.
//!
//! Every message is one line of JSON. The plugin speaks first with a
//! [`HandshakeConfig`] line; after that the host sends [`Request`]s and the
//! plugin answers each with exactly one [`Response`].

use std::collections::BTreeMap;

use instinct_core::config::HandshakeConfig;
use instinct_core::{ExecutionContext, Params, Status};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{PluginError, Result};

/// Environment variable carrying the host's protocol version to the child.
pub const PROTOCOL_VERSION_ENV: &str = "INSTINCT_PLUGIN_PROTOCOL_VERSION";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum Request {
    Execute { context: ExecutionContext },
    GetType,
    GetName,
    Validate,
}

impl Request {
    pub fn method(&self) -> &'static str {
        match self {
            Request::Execute { .. } => "execute",
            Request::GetType => "get_type",
            Request::GetName => "get_name",
            Request::Validate => "validate",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Response {
    pub fn success(value: Value) -> Self {
        Self {
            ok: true,
            value: (!value.is_null()).then_some(value),
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            value: None,
            error: Some(error.into()),
        }
    }

    pub fn into_result(self) -> Result<Value> {
        if self.ok {
            Ok(self.value.unwrap_or(Value::Null))
        } else {
            Err(PluginError::Remote(
                self.error
                    .unwrap_or_else(|| "unspecified plugin error".to_string()),
            ))
        }
    }
}

/// What a plugin hands back from `execute`: the variables and ledger entries
/// the host folds into its own context.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecuteResult {
    #[serde(default)]
    pub variables: Params,
    #[serde(default)]
    pub execution_status: BTreeMap<String, Status>,
}

impl From<ExecutionContext> for ExecuteResult {
    fn from(ctx: ExecutionContext) -> Self {
        Self {
            variables: ctx.variables,
            execution_status: ctx.execution_status,
        }
    }
}

pub fn verify_handshake(expected: &HandshakeConfig, received: &HandshakeConfig) -> Result<()> {
    if received.protocol_version != expected.protocol_version {
        return Err(PluginError::Handshake(format!(
            "incompatible protocol version: host speaks {}, plugin speaks {}",
            expected.protocol_version, received.protocol_version
        )));
    }
    if received.magic_cookie_key != expected.magic_cookie_key
        || received.magic_cookie_value != expected.magic_cookie_value
    {
        return Err(PluginError::Handshake(
            "magic cookie mismatch; the process is not an instinct plugin".to_string(),
        ));
    }
    Ok(())
}
