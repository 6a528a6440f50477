use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use uuid::Uuid;

pub type Result<T> = anyhow::Result<T>;

/// Per-workspace runtime directory holding config and the observer log.
pub fn runtime_dir(workspace: &Path) -> PathBuf {
    workspace.join(".logpilot")
}

// ── Conversation model ─────────────────────────────────────────────

/// One message in a conversation transcript. Turns are immutable once
/// appended; a `Session` owns them as an append-only sequence.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "role")]
pub enum Turn {
    #[serde(rename = "system")]
    System { content: String },
    #[serde(rename = "user")]
    User { content: String },
    #[serde(rename = "assistant")]
    Assistant {
        #[serde(skip_serializing_if = "Option::is_none", default)]
        content: Option<String>,
        #[serde(skip_serializing_if = "Vec::is_empty", default)]
        tool_calls: Vec<ToolCall>,
    },
    #[serde(rename = "tool")]
    Tool {
        /// Name of the tool that produced this result.
        source: String,
        /// Id of the tool call this result answers.
        call_id: String,
        content: String,
    },
}

/// A tool invocation requested by the reasoning service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub args: serde_json::Value,
}

/// Outcome of one tool invocation, rendered into the transcript as a
/// `Turn::Tool`. Error text goes through the same field as success output
/// so the model always sees what happened.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolOutcome {
    pub name: String,
    pub success: bool,
    pub content: String,
}

/// Verdict from the safety guard for one literal command string.
/// Never cached across commands.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafetyVerdict {
    pub dangerous: bool,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub reason: Option<String>,
}

impl SafetyVerdict {
    pub fn safe() -> Self {
        Self {
            dangerous: false,
            reason: None,
        }
    }

    pub fn dangerous(reason: impl Into<String>) -> Self {
        Self {
            dangerous: true,
            reason: Some(reason.into()),
        }
    }
}

// ── Router state machine ───────────────────────────────────────────

/// States of the dialogue router. `Done` is terminal for one user turn;
/// the next user turn re-enters via `RouterEvent::UserTurnStarted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RouterState {
    Chatting,
    Routing,
    VerifyingCommand,
    InvokingTool,
    Explaining,
    Done,
}

/// Events that drive the router between states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouterEvent {
    /// A new user turn entered the router.
    UserTurnStarted,
    /// The reasoning service replied with no tool calls.
    ReplyWithoutTools,
    /// The reply's first tool call names the remote-command tool.
    ReplyWithRemoteCommand,
    /// The reply's first tool call names any other tool.
    ReplyWithLocalTool,
    /// The safety guard approved the candidate command.
    CommandApproved,
    /// The safety guard rejected the candidate command.
    CommandRejected,
    /// The tool result turn was appended to the transcript.
    ToolResultAppended,
    /// The explanation reply was appended to the transcript.
    ExplanationAppended,
    /// The prior turn was abandoned mid-flight (e.g. a reasoning-service
    /// outage) and a new user turn is taking over the session.
    TurnAbandoned,
}

#[derive(Debug, thiserror::Error)]
#[error("invalid router transition: {state:?} on {event:?}")]
pub struct TransitionError {
    pub state: RouterState,
    pub event: RouterEvent,
}

/// The transition function. Every legal edge of the router is listed here;
/// anything else is a `TransitionError`.
pub fn next_state(
    state: RouterState,
    event: RouterEvent,
) -> std::result::Result<RouterState, TransitionError> {
    use RouterEvent as E;
    use RouterState as S;
    match (state, event) {
        (S::Done, E::UserTurnStarted) | (S::Chatting, E::UserTurnStarted) => Ok(S::Chatting),
        (S::Chatting, E::ReplyWithoutTools) => Ok(S::Routing),
        (S::Chatting, E::ReplyWithRemoteCommand) => Ok(S::Routing),
        (S::Chatting, E::ReplyWithLocalTool) => Ok(S::Routing),
        (S::Routing, E::ReplyWithoutTools) => Ok(S::Done),
        (S::Routing, E::ReplyWithRemoteCommand) => Ok(S::VerifyingCommand),
        (S::Routing, E::ReplyWithLocalTool) => Ok(S::InvokingTool),
        (S::VerifyingCommand, E::CommandApproved) => Ok(S::InvokingTool),
        (S::VerifyingCommand, E::CommandRejected) => Ok(S::Done),
        (S::InvokingTool, E::ToolResultAppended) => Ok(S::Explaining),
        (S::Explaining, E::ExplanationAppended) => Ok(S::Done),
        // Any mid-turn state can be abandoned back to Chatting; without
        // this edge a failed reasoning call would wedge the session.
        (S::Routing, E::TurnAbandoned)
        | (S::VerifyingCommand, E::TurnAbandoned)
        | (S::InvokingTool, E::TurnAbandoned)
        | (S::Explaining, E::TurnAbandoned) => Ok(S::Chatting),
        (state, event) => Err(TransitionError { state, event }),
    }
}

/// One ongoing conversation: a stable id, the ordered transcript, and the
/// router's current state. Processed by a single logical flow of control
/// at a time; distinct sessions are independent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_id: Uuid,
    pub turns: Vec<Turn>,
    pub state: RouterState,
}

impl Session {
    pub fn new() -> Self {
        Self {
            session_id: Uuid::now_v7(),
            turns: Vec::new(),
            state: RouterState::Chatting,
        }
    }

    pub fn push(&mut self, turn: Turn) {
        self.turns.push(turn);
    }

    /// The most recent user turn, if any. The remote-command explanation
    /// quotes this verbatim.
    pub fn last_user_question(&self) -> Option<&str> {
        self.turns.iter().rev().find_map(|t| match t {
            Turn::User { content } => Some(content.as_str()),
            _ => None,
        })
    }

    /// Text of the final assistant turn, if any.
    pub fn last_assistant_text(&self) -> Option<&str> {
        self.turns.iter().rev().find_map(|t| match t {
            Turn::Assistant {
                content: Some(content),
                ..
            } => Some(content.as_str()),
            _ => None,
        })
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

// ── Tool definitions sent to the reasoning service ─────────────────

/// A tool (function) definition on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    #[serde(rename = "type")]
    pub tool_type: String,
    pub function: FunctionDefinition,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionDefinition {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

impl ToolDefinition {
    pub fn function(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: serde_json::Value,
    ) -> Self {
        Self {
            tool_type: "function".to_string(),
            function: FunctionDefinition {
                name: name.into(),
                description: description.into(),
                parameters,
            },
        }
    }
}

// ── Observer events ────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub at: DateTime<Utc>,
    pub session_id: Uuid,
    pub kind: EventKind,
}

impl EventEnvelope {
    pub fn now(session_id: Uuid, kind: EventKind) -> Self {
        Self {
            at: Utc::now(),
            session_id,
            kind,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum EventKind {
    TurnAppended {
        role: String,
    },
    StateChanged {
        from: RouterState,
        to: RouterState,
    },
    ToolProposed {
        name: String,
    },
    /// Additional tool calls in the same reply were ignored
    /// (single-invocation-per-turn policy).
    ToolCallsIgnored {
        count: usize,
    },
    ToolCompleted {
        name: String,
        success: bool,
    },
    GuardVerdict {
        command: String,
        dangerous: bool,
    },
    RemoteExec {
        host: String,
    },
    FileFetched {
        remote_path: String,
        bytes: u64,
    },
}

// ── Configuration ──────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub llm: LlmConfig,
    pub guard: GuardConfig,
    pub tools: ToolsConfig,
    /// Path to the TOML host book, relative to the workspace unless absolute.
    pub hosts_file: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub endpoint: String,
    pub model: String,
    /// Name of the environment variable holding the API key.
    pub api_key_env: String,
    pub max_tokens: u32,
    pub temperature: Option<f32>,
    pub timeout_seconds: u64,
    pub max_retries: u8,
    pub retry_base_ms: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.deepseek.com/chat/completions".to_string(),
            model: "deepseek-chat".to_string(),
            api_key_env: "LOGPILOT_API_KEY".to_string(),
            max_tokens: 4096,
            temperature: None,
            timeout_seconds: 120,
            max_retries: 2,
            retry_base_ms: 500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardConfig {
    /// Model override for safety classification. Empty = same as llm.model.
    pub model: String,
    pub max_tokens: u32,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            model: String::new(),
            max_tokens: 256,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    /// Default line count for the log tail tool.
    pub tail_default_lines: usize,
    /// Seconds to wait for a ping reply.
    pub ping_timeout_seconds: u64,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            tail_default_lines: 100,
            ping_timeout_seconds: 5,
        }
    }
}

impl AppConfig {
    pub fn config_path(workspace: &Path) -> PathBuf {
        runtime_dir(workspace).join("config.toml")
    }

    /// Load from the workspace runtime dir, falling back to defaults when
    /// no config file exists.
    pub fn load(workspace: &Path) -> Result<Self> {
        let path = Self::config_path(workspace);
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(&path)?;
        Ok(toml::from_str(&raw)?)
    }

    pub fn save(&self, workspace: &Path) -> Result<()> {
        let dir = runtime_dir(workspace);
        fs::create_dir_all(&dir)?;
        fs::write(Self::config_path(workspace), toml::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Resolve the host book path against the workspace.
    pub fn hosts_path(&self, workspace: &Path) -> PathBuf {
        let p = Path::new(&self.hosts_file);
        if p.is_absolute() {
            p.to_path_buf()
        } else if self.hosts_file.is_empty() {
            runtime_dir(workspace).join("hosts.toml")
        } else {
            workspace.join(p)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn router_follows_the_plain_chat_path() {
        let s = next_state(RouterState::Chatting, RouterEvent::ReplyWithoutTools).unwrap();
        assert_eq!(s, RouterState::Routing);
        let s = next_state(s, RouterEvent::ReplyWithoutTools).unwrap();
        assert_eq!(s, RouterState::Done);
    }

    #[test]
    fn remote_command_is_verified_before_invocation() {
        let s = next_state(RouterState::Chatting, RouterEvent::ReplyWithRemoteCommand).unwrap();
        let s = next_state(s, RouterEvent::ReplyWithRemoteCommand).unwrap();
        assert_eq!(s, RouterState::VerifyingCommand);
        let approved = next_state(s, RouterEvent::CommandApproved).unwrap();
        assert_eq!(approved, RouterState::InvokingTool);
        let rejected = next_state(s, RouterEvent::CommandRejected).unwrap();
        assert_eq!(rejected, RouterState::Done);
    }

    #[test]
    fn tool_result_leads_to_explanation_then_done() {
        let s = next_state(RouterState::InvokingTool, RouterEvent::ToolResultAppended).unwrap();
        assert_eq!(s, RouterState::Explaining);
        let s = next_state(s, RouterEvent::ExplanationAppended).unwrap();
        assert_eq!(s, RouterState::Done);
    }

    #[test]
    fn done_reenters_chatting_on_new_user_turn() {
        let s = next_state(RouterState::Done, RouterEvent::UserTurnStarted).unwrap();
        assert_eq!(s, RouterState::Chatting);
    }

    #[test]
    fn illegal_transitions_are_rejected() {
        assert!(next_state(RouterState::Done, RouterEvent::CommandApproved).is_err());
        assert!(next_state(RouterState::Explaining, RouterEvent::ReplyWithLocalTool).is_err());
        assert!(next_state(RouterState::Chatting, RouterEvent::ToolResultAppended).is_err());
    }

    #[test]
    fn any_mid_turn_state_can_be_abandoned_back_to_chatting() {
        for stale in [
            RouterState::Routing,
            RouterState::VerifyingCommand,
            RouterState::InvokingTool,
            RouterState::Explaining,
        ] {
            let s = next_state(stale, RouterEvent::TurnAbandoned).unwrap();
            assert_eq!(s, RouterState::Chatting);
        }
        // Chatting and Done have nothing in flight to abandon.
        assert!(next_state(RouterState::Chatting, RouterEvent::TurnAbandoned).is_err());
        assert!(next_state(RouterState::Done, RouterEvent::TurnAbandoned).is_err());
    }

    #[test]
    fn session_tracks_last_user_question() {
        let mut session = Session::new();
        session.push(Turn::User {
            content: "what is in the syslog?".to_string(),
        });
        session.push(Turn::Assistant {
            content: Some("checking".to_string()),
            tool_calls: vec![],
        });
        assert_eq!(session.last_user_question(), Some("what is in the syslog?"));
        assert_eq!(session.last_assistant_text(), Some("checking"));
    }

    #[test]
    fn config_defaults_load_without_a_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cfg = AppConfig::load(dir.path()).expect("load");
        assert_eq!(cfg.llm.model, "deepseek-chat");
        assert_eq!(cfg.tools.tail_default_lines, 100);
    }

    #[test]
    fn config_roundtrips_through_toml() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut cfg = AppConfig::default();
        cfg.llm.model = "deepseek-reasoner".to_string();
        cfg.hosts_file = "hosts.toml".to_string();
        cfg.save(dir.path()).expect("save");
        let loaded = AppConfig::load(dir.path()).expect("load");
        assert_eq!(loaded.llm.model, "deepseek-reasoner");
        assert_eq!(
            loaded.hosts_path(dir.path()),
            dir.path().join("hosts.toml")
        );
    }

    #[test]
    fn turn_serde_uses_role_tags() {
        let turn = Turn::Tool {
            source: "log_tail".to_string(),
            call_id: "call_1".to_string(),
            content: "line".to_string(),
        };
        let json = serde_json::to_value(&turn).expect("serialize");
        assert_eq!(json["role"], "tool");
        assert_eq!(json["source"], "log_tail");
    }
}
