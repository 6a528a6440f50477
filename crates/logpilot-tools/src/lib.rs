pub mod tail;

use logpilot_core::{ToolCall, ToolDefinition, ToolOutcome, ToolsConfig};
use logpilot_remote::{HostEntry, HostRegistry, RemoteError, RemoteSession};
use rand::Rng;
use serde_json::{json, Value};
use std::fs;
use std::path::Path;
use std::process::{Command, Stdio};
use std::sync::Arc;

pub use tail::tail;

/// The closed set of tools the router can invoke. Anything outside this
/// enumeration is rejected at dispatch time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolKind {
    GetWeather,
    GenNumber,
    ReadLocalFile,
    Ping,
    LogTail,
    RemoteCommand,
}

impl ToolKind {
    pub const ALL: [Self; 6] = [
        Self::GetWeather,
        Self::GenNumber,
        Self::ReadLocalFile,
        Self::Ping,
        Self::LogTail,
        Self::RemoteCommand,
    ];

    #[must_use]
    pub fn api_name(self) -> &'static str {
        match self {
            Self::GetWeather => "get_weather",
            Self::GenNumber => "gen_number",
            Self::ReadLocalFile => "read_local_file",
            Self::Ping => "ping",
            Self::LogTail => "log_tail",
            Self::RemoteCommand => "remote_command",
        }
    }

    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|k| k.api_name() == name)
    }

    /// True for the one tool allowed to open a remote session. Everything
    /// else is local computation or local file I/O.
    #[must_use]
    pub fn is_remote(self) -> bool {
        matches!(self, Self::RemoteCommand)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("unknown tool {0:?}")]
    UnknownTool(String),
    #[error("invalid arguments: {0}")]
    BadArgs(String),
    #[error("{0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Remote(#[from] RemoteError),
}

/// Seam for executing a command on a resolved host, so tests can substitute
/// a recording double for the real SSH transport.
pub trait RemoteExec {
    fn run(&self, host: &str, entry: &HostEntry, command: &str) -> Result<String, RemoteError>;
}

/// Production transport: one `RemoteSession` per invocation, opened and
/// released inside this call on every path.
pub struct SshRemoteExec;

impl RemoteExec for SshRemoteExec {
    fn run(&self, host: &str, entry: &HostEntry, command: &str) -> Result<String, RemoteError> {
        let mut session = RemoteSession::open(host, &entry.username, Path::new(&entry.key_path))?;
        let result = session.run(command);
        session.close();
        result
    }
}

/// Fixed, schema-typed tool set. Invocations are pure with respect to the
/// router; the remote transport is the only shared seam and it is scoped
/// per call.
pub struct ToolRegistry {
    hosts: HostRegistry,
    cfg: ToolsConfig,
    remote: Arc<dyn RemoteExec + Send + Sync>,
}

impl ToolRegistry {
    pub fn new(hosts: HostRegistry, cfg: ToolsConfig) -> Self {
        Self::with_remote(hosts, cfg, Arc::new(SshRemoteExec))
    }

    pub fn with_remote(
        hosts: HostRegistry,
        cfg: ToolsConfig,
        remote: Arc<dyn RemoteExec + Send + Sync>,
    ) -> Self {
        Self { hosts, cfg, remote }
    }

    /// Tool definitions advertised to the reasoning service.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        vec![
            ToolDefinition::function(
                "get_weather",
                "Get weather information for a city.",
                json!({
                    "type": "object",
                    "properties": {
                        "city": {"type": "string", "enum": ["nyc", "sf"]}
                    },
                    "required": ["city"]
                }),
            ),
            ToolDefinition::function(
                "gen_number",
                "Get a random number between a and b inclusive.",
                json!({
                    "type": "object",
                    "properties": {
                        "a": {"type": "integer"},
                        "b": {"type": "integer"}
                    },
                    "required": ["a", "b"]
                }),
            ),
            ToolDefinition::function(
                "read_local_file",
                "Read the contents of a file on the local system.",
                json!({
                    "type": "object",
                    "properties": {
                        "file_path": {"type": "string"}
                    },
                    "required": ["file_path"]
                }),
            ),
            ToolDefinition::function(
                "ping",
                "Check whether a server answers an ICMP ping.",
                json!({
                    "type": "object",
                    "properties": {
                        "target": {"type": "string", "description": "IP address or hostname"}
                    },
                    "required": ["target"]
                }),
            ),
            ToolDefinition::function(
                "log_tail",
                "Read the last N lines of a local log file without loading the whole file.",
                json!({
                    "type": "object",
                    "properties": {
                        "path": {"type": "string"},
                        "lines": {"type": "integer", "minimum": 0}
                    },
                    "required": ["path"]
                }),
            ),
            ToolDefinition::function(
                "remote_command",
                "Run a shell command on a registered remote host over SSH and return its output.",
                json!({
                    "type": "object",
                    "properties": {
                        "host": {"type": "string", "description": "registered host name"},
                        "command": {"type": "string"}
                    },
                    "required": ["host", "command"]
                }),
            ),
        ]
    }

    /// Invoke one tool call. Errors are rendered into the outcome text so
    /// the transcript always records what happened; nothing is silently
    /// dropped.
    pub fn invoke(&self, call: &ToolCall) -> ToolOutcome {
        match self.run_tool(&call.name, &call.args) {
            Ok(content) => ToolOutcome {
                name: call.name.clone(),
                success: true,
                content,
            },
            Err(e) => ToolOutcome {
                name: call.name.clone(),
                success: false,
                content: format!("Error: {e}"),
            },
        }
    }

    fn run_tool(&self, name: &str, args: &Value) -> Result<String, ToolError> {
        let kind =
            ToolKind::from_name(name).ok_or_else(|| ToolError::UnknownTool(name.to_string()))?;
        match kind {
            ToolKind::GetWeather => {
                let city = require_str(args, "city")?;
                match city {
                    "nyc" => Ok("It might be cloudy in nyc".to_string()),
                    "sf" => Ok("It's always sunny in sf".to_string()),
                    other => Err(ToolError::BadArgs(format!("unknown city {other:?}"))),
                }
            }
            ToolKind::GenNumber => {
                let a = require_i64(args, "a")?;
                let b = require_i64(args, "b")?;
                if a > b {
                    return Err(ToolError::BadArgs(format!("empty range {a}..={b}")));
                }
                let n = rand::thread_rng().gen_range(a..=b);
                Ok(n.to_string())
            }
            ToolKind::ReadLocalFile => {
                let path = require_str(args, "file_path")?;
                Ok(fs::read_to_string(path)?)
            }
            ToolKind::Ping => {
                let target = require_str(args, "target")?;
                let reachable = ping_once(target, self.cfg.ping_timeout_seconds)?;
                Ok(if reachable {
                    format!("{target} is reachable")
                } else {
                    format!("{target} is not reachable")
                })
            }
            ToolKind::LogTail => {
                let path = require_str(args, "path")?;
                let lines = match args.get("lines") {
                    Some(v) => v
                        .as_u64()
                        .ok_or_else(|| ToolError::BadArgs("lines must be an integer".into()))?
                        as usize,
                    None => self.cfg.tail_default_lines,
                };
                let collected = tail(Path::new(path), lines)?;
                Ok(collected.join("\n"))
            }
            ToolKind::RemoteCommand => {
                let host = require_str(args, "host")?;
                let command = require_str(args, "command")?;
                // Host resolution happens before any connection attempt;
                // a miss never opens a session.
                let entry = self.hosts.lookup(host)?;
                Ok(self.remote.run(host, entry, command)?)
            }
        }
    }
}

fn require_str<'a>(args: &'a Value, key: &str) -> Result<&'a str, ToolError> {
    args.get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| ToolError::BadArgs(format!("missing string argument {key:?}")))
}

fn require_i64(args: &Value, key: &str) -> Result<i64, ToolError> {
    args.get(key)
        .and_then(|v| v.as_i64())
        .ok_or_else(|| ToolError::BadArgs(format!("missing integer argument {key:?}")))
}

fn ping_once(target: &str, timeout_seconds: u64) -> Result<bool, ToolError> {
    let status = Command::new("ping")
        .args(["-c", "1", "-W", &timeout_seconds.to_string(), target])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()?;
    Ok(status.success())
}

// The unit tests for the registry live in tests/registry.rs: they exercise
// only the public API and need `logpilot_testkit::RecordingRemote`, whose
// `RemoteExec` impl refers to the externally built copy of this crate. A
// `#[cfg(test)]` module here would see a second, distinct `RemoteExec`
// (dev-dependency cycle), so they must link as an integration test.
