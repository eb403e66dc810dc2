use std::time::Duration;

use async_trait::async_trait;
use instinct_core::config::HandshakeConfig;
use instinct_core::{Action, ExecutionContext, InstinctError, Status};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::process::{PluginCommand, PluginProcess};
use crate::protocol::{ExecuteResult, Request};
use crate::{PluginError, Result};

/// An [`Action`] served by a plugin process.
///
/// Type and name are fetched once after the handshake and the plugin's own
/// validation result is cached, so only `execute` crosses the process
/// boundary afterwards. Calls are serialized: one request in flight per
/// process.
#[derive(Debug)]
pub struct PluginAction {
    action_type: String,
    name: String,
    validation: std::result::Result<(), String>,
    call_timeout: Option<Duration>,
    process: Mutex<PluginProcess>,
}

impl PluginAction {
    pub async fn connect(
        command: &PluginCommand,
        handshake: &HandshakeConfig,
        call_timeout: Option<Duration>,
    ) -> Result<Self> {
        let mut process = PluginProcess::spawn(command, handshake).await?;
        match Self::describe(&mut process, call_timeout).await {
            Ok((action_type, name, validation)) => {
                debug!(plugin = %command, %action_type, %name, "plugin connected");
                Ok(Self {
                    action_type,
                    name,
                    validation,
                    call_timeout,
                    process: Mutex::new(process),
                })
            }
            Err(e) => {
                process.kill().await;
                Err(e)
            }
        }
    }

    async fn describe(
        process: &mut PluginProcess,
        timeout: Option<Duration>,
    ) -> Result<(String, String, std::result::Result<(), String>)> {
        let action_type = expect_string(process.call(&Request::GetType, timeout).await?, "get_type")?;
        let name = expect_string(process.call(&Request::GetName, timeout).await?, "get_name")?;
        let validation = match process.call(&Request::Validate, timeout).await {
            Ok(_) => Ok(()),
            Err(PluginError::Remote(message)) => Err(message),
            Err(e) => return Err(e),
        };
        Ok((action_type, name, validation))
    }

    pub async fn command(&self) -> PluginCommand {
        self.process.lock().await.command().clone()
    }

    pub async fn is_alive(&self) -> bool {
        self.process.lock().await.is_alive()
    }

    pub async fn shutdown(&self) {
        self.process.lock().await.kill().await;
    }

    async fn call_execute(&self, ctx: &ExecutionContext) -> Result<ExecuteResult> {
        let request = Request::Execute {
            context: ctx.clone(),
        };
        let value = self
            .process
            .lock()
            .await
            .call(&request, self.call_timeout)
            .await?;
        match value {
            Value::Null => Ok(ExecuteResult::default()),
            other => serde_json::from_value(other).map_err(|e| {
                PluginError::Protocol(format!("unexpected execute result: {e}"))
            }),
        }
    }
}

fn expect_string(value: Value, method: &str) -> Result<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Ok(s),
        other => Err(PluginError::Protocol(format!(
            "'{method}' must return a non-empty string, got {other}"
        ))),
    }
}

#[async_trait]
impl Action for PluginAction {
    async fn execute(&self, ctx: &mut ExecutionContext) -> instinct_core::Result<()> {
        ctx.set_status(&self.name, Status::Running);
        match self.call_execute(ctx).await {
            Ok(result) => {
                ctx.variables.extend(result.variables);
                ctx.execution_status.extend(result.execution_status);
                ctx.set_status(&self.name, Status::Completed);
                Ok(())
            }
            Err(e) => {
                warn!(plugin = %self.name, error = %e, "plugin action failed");
                ctx.set_status(&self.name, Status::Failed);
                Err(e.into())
            }
        }
    }

    fn action_type(&self) -> &str {
        &self.action_type
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn validate(&self) -> instinct_core::Result<()> {
        self.validation.clone().map_err(|message| {
            InstinctError::Invalid(format!("plugin '{}': {message}", self.name))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::tests::{script, TICKET_PLUGIN};
    use instinct_core::action::PluginProxy;
    use instinct_core::Params;
    use serde_json::json;
    use std::sync::Arc;

    #[tokio::test]
    async fn describes_itself_once_connected() {
        let (command, _guard) = script(TICKET_PLUGIN);
        let action = PluginAction::connect(&command, &HandshakeConfig::default(), None)
            .await
            .unwrap();
        assert_eq!(action.action_type(), "ticket");
        assert_eq!(action.name(), "ticket-plugin");
        assert!(action.validate().is_ok());
        action.shutdown().await;
        assert!(!action.is_alive().await);
    }

    #[tokio::test]
    async fn execute_merges_remote_state_through_proxy() {
        let (command, _guard) = script(TICKET_PLUGIN);
        let action = PluginAction::connect(
            &command,
            &HandshakeConfig::default(),
            Some(Duration::from_secs(5)),
        )
        .await
        .unwrap();

        let mut config = Params::new();
        config.insert("target".into(), json!("soc"));
        let proxy = PluginProxy::new(Arc::new(action), config);

        let mut ctx = ExecutionContext::default();
        proxy.execute(&mut ctx).await.unwrap();
        assert_eq!(ctx.variable("ticket"), Some(&json!("T-1")));
        assert_eq!(ctx.status("remote-step"), Some(Status::Completed));
        assert_eq!(ctx.status("ticket-plugin"), Some(Status::Completed));
    }

    #[tokio::test]
    async fn remote_failure_is_a_plugin_error() {
        let (command, _guard) = script(TICKET_PLUGIN);
        let action = PluginAction::connect(&command, &HandshakeConfig::default(), None)
            .await
            .unwrap();

        let mut ctx = ExecutionContext::default();
        let err = action.execute(&mut ctx).await.unwrap_err();
        assert!(matches!(err, InstinctError::Plugin(ref m) if m.contains("no target configured")));
        assert_eq!(ctx.status("ticket-plugin"), Some(Status::Failed));
    }

    #[tokio::test]
    async fn remote_validation_failure_is_cached() {
        let body = r#"
echo '{"protocol_version":1,"magic_cookie_key":"INSTINCT_PLUGIN","magic_cookie_value":"reflex-action"}'
while IFS= read -r line; do
  case "$line" in
    *get_type*) echo '{"ok":true,"value":"ticket"}' ;;
    *get_name*) echo '{"ok":true,"value":"ticket-plugin"}' ;;
    *) echo '{"ok":false,"error":"THEHIVE_URL is not set"}' ;;
  esac
done
"#;
        let (command, _guard) = script(body);
        let action = PluginAction::connect(&command, &HandshakeConfig::default(), None)
            .await
            .unwrap();
        let err = action.validate().unwrap_err();
        assert!(err.to_string().contains("THEHIVE_URL is not set"));
    }

    #[tokio::test]
    async fn blank_type_is_a_protocol_error() {
        let body = r#"
echo '{"protocol_version":1,"magic_cookie_key":"INSTINCT_PLUGIN","magic_cookie_value":"reflex-action"}'
while IFS= read -r line; do
  echo '{"ok":true,"value":""}'
done
"#;
        let (command, _guard) = script(body);
        let err = PluginAction::connect(&command, &HandshakeConfig::default(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, PluginError::Protocol(_)));
    }
}
