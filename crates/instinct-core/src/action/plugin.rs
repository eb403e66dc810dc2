use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use super::Action;
use crate::context::ExecutionContext;
use crate::error::Result;
use crate::params::Params;

/// Wraps an out-of-process action and hands it a static configuration map
/// through `variables["config"]`.
#[derive(Debug, Clone)]
pub struct PluginProxy {
    inner: Arc<dyn Action>,
    config: Params,
}

impl PluginProxy {
    pub fn new(inner: Arc<dyn Action>, config: Params) -> Self {
        Self { inner, config }
    }

    pub fn config(&self) -> &Params {
        &self.config
    }
}

#[async_trait]
impl Action for PluginProxy {
    async fn execute(&self, ctx: &mut ExecutionContext) -> Result<()> {
        ctx.set_variable("config", Value::Object(self.config.clone()));
        self.inner.execute(ctx).await
    }

    fn action_type(&self) -> &str {
        self.inner.action_type()
    }

    fn name(&self) -> &str {
        self.inner.name()
    }

    fn validate(&self) -> Result<()> {
        self.inner.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::InstinctError;
    use serde_json::json;

    #[derive(Debug)]
    struct EchoConfig;

    #[async_trait]
    impl Action for EchoConfig {
        async fn execute(&self, ctx: &mut ExecutionContext) -> Result<()> {
            let target = ctx
                .variable("config")
                .and_then(|c| c.get("target"))
                .cloned()
                .ok_or_else(|| InstinctError::Plugin("no target configured".into()))?;
            ctx.set_variable("seen_target", target);
            Ok(())
        }

        fn action_type(&self) -> &str {
            "echo"
        }

        fn name(&self) -> &str {
            "echo-plugin"
        }

        fn validate(&self) -> Result<()> {
            Err(InstinctError::Invalid("plugin says no".into()))
        }
    }

    #[tokio::test]
    async fn injects_config_and_delegates() {
        let mut config = Params::new();
        config.insert("target".into(), json!("soc"));
        let proxy = PluginProxy::new(Arc::new(EchoConfig), config);

        let mut ctx = ExecutionContext::default();
        proxy.execute(&mut ctx).await.unwrap();
        assert_eq!(ctx.variable("config"), Some(&json!({"target": "soc"})));
        assert_eq!(ctx.variable("seen_target"), Some(&json!("soc")));

        assert_eq!(proxy.action_type(), "echo");
        assert_eq!(proxy.name(), "echo-plugin");
        assert!(proxy.validate().is_err());
    }
}
