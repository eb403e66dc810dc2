use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use instinct_core::config::HandshakeConfig;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::protocol::{verify_handshake, Request, Response, PROTOCOL_VERSION_ENV};
use crate::{PluginError, Result};

/// How long a freshly spawned plugin has to print its handshake line.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

// ─── PluginCommand ────────────────────────────────────────────────────────

/// A program plus arguments that starts one plugin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl PluginCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Parse a configured command line (`"python3 ticket.py --live"`). A
    /// bare program name is resolved on `PATH`.
    pub fn parse(line: &str) -> Result<Self> {
        let mut words = line.split_whitespace();
        let program = words
            .next()
            .ok_or_else(|| PluginError::NotFound("empty plugin command".to_string()))?;
        let program = if Path::new(program).components().count() > 1 {
            PathBuf::from(program)
        } else {
            which::which(program).map_err(|_| PluginError::NotFound(program.to_string()))?
        };
        Ok(Self {
            program,
            args: words.map(str::to_string).collect(),
        })
    }
}

impl fmt::Display for PluginCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

// ─── PluginProcess ────────────────────────────────────────────────────────

/// A running plugin child speaking line-delimited JSON on stdin/stdout.
///
/// Stderr is drained by a background task and attached to the error when
/// the child exits unexpectedly. After a call times out the conversation is
/// out of step, so the child is killed and every later call fails.
pub struct PluginProcess {
    command: PluginCommand,
    child: Child,
    stdin: ChildStdin,
    lines: Lines<BufReader<ChildStdout>>,
    stderr_buf: Arc<Mutex<String>>,
    stderr_task: Option<JoinHandle<()>>,
    alive: bool,
}

impl PluginProcess {
    /// Start the plugin and complete the handshake. The child is killed if
    /// the handshake fails.
    pub async fn spawn(command: &PluginCommand, handshake: &HandshakeConfig) -> Result<Self> {
        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .env(&handshake.magic_cookie_key, &handshake.magic_cookie_value)
            .env(PROTOCOL_VERSION_ENV, handshake.protocol_version.to_string());

        let mut process = Self::from_command(cmd, command.clone())?;
        if let Err(e) = process.handshake(handshake).await {
            process.kill().await;
            return Err(e);
        }
        Ok(process)
    }

    fn from_command(mut cmd: Command, command: PluginCommand) -> Result<Self> {
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|source| PluginError::Spawn {
            command: command.to_string(),
            source,
        })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| PluginError::Protocol("stdout not captured".into()))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| PluginError::Protocol("stdin not captured".into()))?;

        let stderr_buf = Arc::new(Mutex::new(String::new()));
        let stderr_task = child.stderr.take().map(|stderr| {
            let buf = Arc::clone(&stderr_buf);
            let label = command.to_string();
            tokio::spawn(async move {
                let mut reader = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = reader.next_line().await {
                    debug!(plugin = %label, "{line}");
                    if let Ok(mut b) = buf.lock() {
                        if !b.is_empty() {
                            b.push('\n');
                        }
                        b.push_str(&line);
                    }
                }
            })
        });

        Ok(Self {
            command,
            child,
            stdin,
            lines: BufReader::new(stdout).lines(),
            stderr_buf,
            stderr_task,
            alive: true,
        })
    }

    async fn handshake(&mut self, expected: &HandshakeConfig) -> Result<()> {
        let line = match tokio::time::timeout(HANDSHAKE_TIMEOUT, self.next_line()).await {
            Ok(line) => line?,
            Err(_) => {
                return Err(PluginError::Handshake(format!(
                    "no handshake from '{}' within {HANDSHAKE_TIMEOUT:?}",
                    self.command
                )))
            }
        };
        let received: HandshakeConfig = serde_json::from_str(&line).map_err(|_| {
            PluginError::Handshake(format!(
                "'{}' did not start with a handshake line; got: {line}",
                self.command
            ))
        })?;
        verify_handshake(expected, &received)?;
        debug!(plugin = %self.command, "handshake complete");
        Ok(())
    }

    /// Send one request and wait for its response.
    pub async fn call(&mut self, request: &Request, timeout: Option<Duration>) -> Result<Value> {
        if !self.alive {
            return Err(PluginError::Protocol(format!(
                "plugin '{}' is no longer running",
                self.command
            )));
        }
        let response = match timeout {
            Some(limit) => match tokio::time::timeout(limit, self.round_trip(request)).await {
                Ok(response) => response?,
                Err(_) => {
                    self.kill().await;
                    return Err(PluginError::Timeout {
                        method: request.method().to_string(),
                        timeout: limit,
                    });
                }
            },
            None => self.round_trip(request).await?,
        };
        response.into_result()
    }

    async fn round_trip(&mut self, request: &Request) -> Result<Response> {
        let mut buf = serde_json::to_vec(request)
            .map_err(|e| PluginError::Protocol(format!("failed to serialize request: {e}")))?;
        buf.push(b'\n');
        if let Err(e) = self.write(&buf).await {
            // A closed pipe usually means the child died; report that instead.
            return Err(match self.exit_error().await {
                Some(exit) => exit,
                None => e,
            });
        }

        let line = self.next_line().await?;
        match serde_json::from_str(&line) {
            Ok(response) => Ok(response),
            Err(source) => {
                // Responses are matched to requests by position only; once a
                // stray line is read every later response would be off by one.
                warn!(plugin = %self.command, line = %line, "unparseable response, stopping plugin");
                self.kill().await;
                Err(PluginError::Parse { line, source })
            }
        }
    }

    async fn write(&mut self, buf: &[u8]) -> Result<()> {
        self.stdin.write_all(buf).await?;
        self.stdin.flush().await?;
        Ok(())
    }

    /// Next non-empty stdout line. EOF is an error: a plugin never closes
    /// stdout while the host is still talking to it.
    async fn next_line(&mut self) -> Result<String> {
        loop {
            match self.lines.next_line().await? {
                Some(line) if line.trim().is_empty() => continue,
                Some(line) => return Ok(line.trim().to_string()),
                None => {
                    return Err(self.exit_error().await.unwrap_or_else(|| {
                        PluginError::Exited(format!(
                            "plugin '{}' closed stdout unexpectedly",
                            self.command
                        ))
                    }))
                }
            }
        }
    }

    /// Wait for the child and describe how it exited, with captured stderr.
    /// `None` when it exited cleanly.
    async fn exit_error(&mut self) -> Option<PluginError> {
        self.alive = false;
        let status = match self.child.wait().await {
            Ok(s) => s,
            Err(e) => return Some(PluginError::Io(e)),
        };
        if let Some(task) = self.stderr_task.take() {
            let _ = tokio::time::timeout(Duration::from_secs(1), task).await;
        }
        if status.success() {
            return None;
        }

        let stderr = self.stderr();
        let head = match status.code() {
            Some(code) => format!("plugin '{}' exited with code {code}", self.command),
            None => format!("plugin '{}' terminated by signal", self.command),
        };
        Some(PluginError::Exited(if stderr.is_empty() {
            head
        } else {
            format!("{head}\nstderr: {stderr}")
        }))
    }

    pub fn stderr(&self) -> String {
        self.stderr_buf
            .lock()
            .ok()
            .map(|b| b.clone())
            .unwrap_or_default()
    }

    pub fn command(&self) -> &PluginCommand {
        &self.command
    }

    pub fn is_alive(&self) -> bool {
        self.alive
    }

    /// Kill the child (best-effort; errors are ignored).
    pub async fn kill(&mut self) {
        self.alive = false;
        let _ = self.child.kill().await;
    }
}

impl fmt::Debug for PluginProcess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginProcess")
            .field("command", &self.command.to_string())
            .field("pid", &self.child.id())
            .field("alive", &self.alive)
            .finish()
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    /// Mock plugin: prints the default handshake, then answers by method.
    pub(crate) const TICKET_PLUGIN: &str = r#"
echo '{"protocol_version":1,"magic_cookie_key":"INSTINCT_PLUGIN","magic_cookie_value":"reflex-action"}'
while IFS= read -r line; do
  case "$line" in
    *'"method":"get_type"'*) echo '{"ok":true,"value":"ticket"}' ;;
    *'"method":"get_name"'*) echo '{"ok":true,"value":"ticket-plugin"}' ;;
    *'"method":"validate"'*) echo '{"ok":true}' ;;
    *'"method":"execute"'*'"target":"soc"'*)
      echo '{"ok":true,"value":{"variables":{"ticket":"T-1"},"execution_status":{"remote-step":"Completed"}}}' ;;
    *'"method":"execute"'*) echo '{"ok":false,"error":"no target configured"}' ;;
    *) echo '{"ok":false,"error":"unknown method"}' ;;
  esac
done
"#;

    /// Write a shell script to a temp file and return a command running it
    /// through `sh`, plus the file guard.
    pub(crate) fn script(body: &str) -> (PluginCommand, NamedTempFile) {
        let mut f = NamedTempFile::new().unwrap();
        write!(f, "{body}").unwrap();
        f.flush().unwrap();
        let command = PluginCommand::new("sh").arg(f.path().to_string_lossy());
        (command, f)
    }

    #[tokio::test]
    async fn handshake_then_calls() {
        let (command, _guard) = script(TICKET_PLUGIN);
        let mut process = PluginProcess::spawn(&command, &HandshakeConfig::default())
            .await
            .unwrap();

        let ty = process.call(&Request::GetType, None).await.unwrap();
        assert_eq!(ty, Value::String("ticket".into()));
        let valid = process
            .call(&Request::Validate, Some(Duration::from_secs(5)))
            .await
            .unwrap();
        assert_eq!(valid, Value::Null);

        process.kill().await;
        assert!(!process.is_alive());
        assert!(process.call(&Request::GetName, None).await.is_err());
    }

    #[tokio::test]
    async fn cookie_mismatch_is_rejected() {
        let (command, _guard) = script(TICKET_PLUGIN);
        let handshake = HandshakeConfig {
            magic_cookie_value: "other".into(),
            ..HandshakeConfig::default()
        };
        let err = PluginProcess::spawn(&command, &handshake).await.unwrap_err();
        assert!(matches!(err, PluginError::Handshake(_)));
    }

    #[tokio::test]
    async fn non_plugin_output_fails_handshake() {
        let (command, _guard) = script("echo 'hello there'\nsleep 5\n");
        let err = PluginProcess::spawn(&command, &HandshakeConfig::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("did not start with a handshake"));
    }

    #[tokio::test]
    async fn early_exit_reports_code_and_stderr() {
        let (command, _guard) = script("echo 'missing API key' >&2\nexit 3\n");
        let err = PluginProcess::spawn(&command, &HandshakeConfig::default())
            .await
            .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("exited with code 3"), "{msg}");
        assert!(msg.contains("missing API key"), "{msg}");
    }

    #[tokio::test]
    async fn slow_call_times_out_and_kills_the_process() {
        let body = r#"
echo '{"protocol_version":1,"magic_cookie_key":"INSTINCT_PLUGIN","magic_cookie_value":"reflex-action"}'
read -r line
sleep 5
"#;
        let (command, _guard) = script(body);
        let mut process = PluginProcess::spawn(&command, &HandshakeConfig::default())
            .await
            .unwrap();
        let err = process
            .call(&Request::GetType, Some(Duration::from_millis(100)))
            .await
            .unwrap_err();
        assert!(matches!(err, PluginError::Timeout { ref method, .. } if method == "get_type"));
        assert!(!process.is_alive());
    }

    #[tokio::test]
    async fn stray_stdout_line_stops_the_process() {
        let body = r#"
echo '{"protocol_version":1,"magic_cookie_key":"INSTINCT_PLUGIN","magic_cookie_value":"reflex-action"}'
while IFS= read -r line; do
  echo 'connecting to ticket backend...'
  echo '{"ok":true,"value":"ticket"}'
done
"#;
        let (command, _guard) = script(body);
        let mut process = PluginProcess::spawn(&command, &HandshakeConfig::default())
            .await
            .unwrap();

        let err = process.call(&Request::GetType, None).await.unwrap_err();
        assert!(matches!(err, PluginError::Parse { ref line, .. } if line.contains("connecting")));
        assert!(!process.is_alive());

        let err = process.call(&Request::GetName, None).await.unwrap_err();
        assert!(err.to_string().contains("no longer running"), "{err}");
    }

    #[test]
    fn commands_parse_and_display() {
        let cmd = PluginCommand::parse("./plugins/ticket --live").unwrap();
        assert_eq!(cmd.program, PathBuf::from("./plugins/ticket"));
        assert_eq!(cmd.args, vec!["--live".to_string()]);
        assert_eq!(cmd.to_string(), "./plugins/ticket --live");

        assert!(matches!(
            PluginCommand::parse("   "),
            Err(PluginError::NotFound(_))
        ));
        assert!(matches!(
            PluginCommand::parse("definitely-not-an-instinct-plugin-binary"),
            Err(PluginError::NotFound(_))
        ));
    }
}
