use instinct_core::config::HandshakeConfig;
use instinct_core::Action;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, warn};

use crate::protocol::{ExecuteResult, Request, Response, PROTOCOL_VERSION_ENV};
use crate::{PluginError, Result};

/// Run `action` as a plugin over this process's stdin/stdout.
///
/// Refuses to start unless the host's magic cookie is present in the
/// environment, so running the binary by hand fails with a clear message.
pub async fn serve<A>(action: &A, handshake: &HandshakeConfig) -> Result<()>
where
    A: Action + ?Sized,
{
    check_environment(handshake, |key| std::env::var(key).ok())?;
    serve_io(action, handshake, tokio::io::stdin(), tokio::io::stdout()).await
}

fn check_environment(
    handshake: &HandshakeConfig,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<()> {
    if lookup(&handshake.magic_cookie_key).as_deref() != Some(handshake.magic_cookie_value.as_str()) {
        return Err(PluginError::Handshake(
            "this binary is an instinct plugin and must be launched by the instinct host"
                .to_string(),
        ));
    }
    if let Some(version) = lookup(PROTOCOL_VERSION_ENV) {
        if version.trim() != handshake.protocol_version.to_string() {
            return Err(PluginError::Handshake(format!(
                "host speaks protocol version {version}, plugin speaks {}",
                handshake.protocol_version
            )));
        }
    }
    Ok(())
}

/// Write the handshake, then answer requests from `reader` until it closes.
pub async fn serve_io<A, R, W>(
    action: &A,
    handshake: &HandshakeConfig,
    reader: R,
    mut writer: W,
) -> Result<()>
where
    A: Action + ?Sized,
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    write_line(&mut writer, &serde_json::to_value(handshake).map_err(protocol)?).await?;

    let mut lines = BufReader::new(reader).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let response = match serde_json::from_str::<Request>(line) {
            Ok(request) => {
                debug!(method = request.method(), "plugin request");
                answer(action, request).await
            }
            Err(e) => {
                warn!(error = %e, "malformed request");
                Response::failure(format!("malformed request: {e}"))
            }
        };
        write_line(&mut writer, &serde_json::to_value(&response).map_err(protocol)?).await?;
    }
    Ok(())
}

async fn answer<A: Action + ?Sized>(action: &A, request: Request) -> Response {
    match request {
        Request::Execute { mut context } => match action.execute(&mut context).await {
            Ok(()) => match serde_json::to_value(ExecuteResult::from(context)) {
                Ok(value) => Response::success(value),
                Err(e) => Response::failure(format!("failed to encode result: {e}")),
            },
            Err(e) => Response::failure(e.to_string()),
        },
        Request::GetType => Response::success(Value::String(action.action_type().to_string())),
        Request::GetName => Response::success(Value::String(action.name().to_string())),
        Request::Validate => match action.validate() {
            Ok(()) => Response::success(Value::Null),
            Err(e) => Response::failure(e.to_string()),
        },
    }
}

async fn write_line<W: AsyncWrite + Unpin>(writer: &mut W, value: &Value) -> Result<()> {
    let mut buf = serde_json::to_vec(value).map_err(protocol)?;
    buf.push(b'\n');
    writer.write_all(&buf).await?;
    writer.flush().await?;
    Ok(())
}

fn protocol(e: serde_json::Error) -> PluginError {
    PluginError::Protocol(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use instinct_core::{ExecutionContext, InstinctError, Status};
    use serde_json::json;
    use tokio::io::{duplex, split, DuplexStream, Lines, ReadHalf, WriteHalf};

    #[derive(Debug)]
    struct Greeter;

    #[async_trait]
    impl Action for Greeter {
        async fn execute(&self, ctx: &mut ExecutionContext) -> instinct_core::Result<()> {
            let who = ctx
                .event
                .get("user")
                .and_then(Value::as_str)
                .ok_or_else(|| InstinctError::ActionFailed {
                    action: "greeter".into(),
                    message: "event has no user".into(),
                })?
                .to_string();
            ctx.set_variable("greeting", json!(format!("hello {who}")));
            ctx.set_status("greeter", Status::Completed);
            Ok(())
        }

        fn action_type(&self) -> &str {
            "greet"
        }

        fn name(&self) -> &str {
            "greeter"
        }

        fn validate(&self) -> instinct_core::Result<()> {
            Ok(())
        }
    }

    struct Host {
        lines: Lines<BufReader<ReadHalf<DuplexStream>>>,
        writer: WriteHalf<DuplexStream>,
    }

    impl Host {
        async fn send(&mut self, line: &str) -> Value {
            self.writer.write_all(line.as_bytes()).await.unwrap();
            self.writer.write_all(b"\n").await.unwrap();
            let reply = self.lines.next_line().await.unwrap().unwrap();
            serde_json::from_str(&reply).unwrap()
        }
    }

    fn start() -> (Host, tokio::task::JoinHandle<Result<()>>, Value) {
        let (host_side, plugin_side) = duplex(64 * 1024);
        let (plugin_read, plugin_write) = split(plugin_side);
        let task = tokio::spawn(async move {
            serve_io(&Greeter, &HandshakeConfig::default(), plugin_read, plugin_write).await
        });
        let (host_read, host_write) = split(host_side);
        let host = Host {
            lines: BufReader::new(host_read).lines(),
            writer: host_write,
        };
        (host, task, serde_json::to_value(HandshakeConfig::default()).unwrap())
    }

    #[tokio::test]
    async fn answers_every_method() {
        let (mut host, task, expected_handshake) = start();
        let handshake: Value =
            serde_json::from_str(&host.lines.next_line().await.unwrap().unwrap()).unwrap();
        assert_eq!(handshake, expected_handshake);

        assert_eq!(
            host.send(r#"{"method":"get_type"}"#).await,
            json!({"ok": true, "value": "greet"})
        );
        assert_eq!(
            host.send(r#"{"method":"get_name"}"#).await,
            json!({"ok": true, "value": "greeter"})
        );
        assert_eq!(host.send(r#"{"method":"validate"}"#).await, json!({"ok": true}));

        let reply = host
            .send(r#"{"method":"execute","context":{"event":{"user":"ana"},"variables":{"x":1},"execution_status":{}}}"#)
            .await;
        assert_eq!(
            reply,
            json!({"ok": true, "value": {
                "variables": {"x": 1, "greeting": "hello ana"},
                "execution_status": {"greeter": "Completed"}
            }})
        );

        let reply = host
            .send(r#"{"method":"execute","context":{"event":{}}}"#)
            .await;
        assert_eq!(reply["ok"], json!(false));
        assert!(reply["error"].as_str().unwrap().contains("event has no user"));

        let reply = host.send(r#"{"method":"reboot"}"#).await;
        assert_eq!(reply["ok"], json!(false));

        drop(host);
        task.await.unwrap().unwrap();
    }

    #[test]
    fn environment_must_carry_the_cookie() {
        let handshake = HandshakeConfig::default();
        assert!(check_environment(&handshake, |_| None).is_err());

        let cookie = handshake.magic_cookie_value.clone();
        let ok = check_environment(&handshake, |key| match key {
            "INSTINCT_PLUGIN" => Some(cookie.clone()),
            PROTOCOL_VERSION_ENV => Some("1".to_string()),
            _ => None,
        });
        assert!(ok.is_ok());

        let cookie = handshake.magic_cookie_value.clone();
        let mismatch = check_environment(&handshake, |key| match key {
            "INSTINCT_PLUGIN" => Some(cookie.clone()),
            PROTOCOL_VERSION_ENV => Some("2".to_string()),
            _ => None,
        });
        assert!(matches!(mismatch, Err(PluginError::Handshake(_))));
    }
}
